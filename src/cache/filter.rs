//! Typed filter predicates.
//!
//! A query's `WHERE` clause is captured as a [`FilterNode`] tree: comparison
//! leaves joined by `AND`/`OR` combinators, with optional negation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar value compared in a predicate or carried by a written row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Value {
    /// Canonical text form used when a tag is matched against a written row.
    ///
    /// Matching is textual, so `Int(5)` and `Text("5")` are the same tag value.
    pub fn canonical(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(value) => if *value { "1" } else { "0" }.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Text(value) => value.clone(),
        }
    }

    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            _ => self.canonical() == other.canonical(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(value) => write!(f, "{}", if *value { "TRUE" } else { "FALSE" }),
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{}'", value.replace('\'', "''")),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Right-hand side of a comparison: one value or a list of alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Scalar(Value),
    List(Vec<Value>),
}

impl Operand {
    /// Every alternative this operand stands for.
    pub fn alternatives(&self) -> &[Value] {
        match self {
            Self::Scalar(value) => std::slice::from_ref(value),
            Self::List(values) => values,
        }
    }
}

macro_rules! scalar_operand {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for Operand {
                fn from(value: $source) -> Self {
                    Self::Scalar(value.into())
                }
            }
        )*
    };
}

scalar_operand!(Value, &str, String, i64, i32, bool);

impl From<Vec<Value>> for Operand {
    fn from(values: Vec<Value>) -> Self {
        Self::List(values)
    }
}

impl<T: Into<Value>> FromIterator<T> for Operand {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::List(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => write!(f, "{value}"),
            Self::List(values) => {
                f.write_str("(")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Comparison operator of a predicate leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    In,
    NotIn,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
    NotLike,
}

impl Operator {
    /// Operators whose satisfaction a write cannot be checked against by
    /// value equality. Leaves using them never become tags.
    pub fn is_excluded(self) -> bool {
        !matches!(self, Self::Eq | Self::In)
    }

    /// Operator of the logically negated comparison.
    pub fn negate(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::In => Self::NotIn,
            Self::NotIn => Self::In,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Like => Self::NotLike,
            Self::NotLike => Self::Like,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
        }
    }

    fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

/// Filter predicate tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterNode {
    Compare {
        column: String,
        op: Operator,
        value: Operand,
    },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
}

impl FilterNode {
    pub fn compare(column: impl Into<String>, op: Operator, value: impl Into<Operand>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::Eq, Operand::Scalar(value.into()))
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::Ne, Operand::Scalar(value.into()))
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::Gt, Operand::Scalar(value.into()))
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Operator::Lt, Operand::Scalar(value.into()))
    }

    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::compare(column, Operator::In, values.into_iter().collect::<Operand>())
    }

    pub fn not_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::compare(column, Operator::NotIn, values.into_iter().collect::<Operand>())
    }

    pub fn and(nodes: impl IntoIterator<Item = FilterNode>) -> Self {
        Self::And(nodes.into_iter().collect())
    }

    pub fn or(nodes: impl IntoIterator<Item = FilterNode>) -> Self {
        Self::Or(nodes.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(node: FilterNode) -> Self {
        Self::Not(Box::new(node))
    }

    /// Conjoin another predicate, flattening nested `AND`s.
    pub fn and_also(self, other: FilterNode) -> Self {
        match self {
            Self::And(mut nodes) => {
                nodes.push(other);
                Self::And(nodes)
            }
            node => Self::And(vec![node, other]),
        }
    }

    /// Deterministic textual rendering, used as the query text of cache keys.
    pub fn to_sql(&self) -> String {
        match self {
            Self::Compare { column, op, value } => {
                if op.takes_list() && matches!(value, Operand::Scalar(_)) {
                    format!("{column} {} ({value})", op.as_sql())
                } else {
                    format!("{column} {} {value}", op.as_sql())
                }
            }
            Self::And(nodes) => join_nodes(nodes, " AND "),
            Self::Or(nodes) => join_nodes(nodes, " OR "),
            Self::Not(node) => format!("NOT ({})", node.to_sql()),
        }
    }
}

fn join_nodes(nodes: &[FilterNode], separator: &str) -> String {
    let parts: Vec<String> = nodes
        .iter()
        .map(|node| format!("({})", node.to_sql()))
        .collect();
    parts.join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excluded_operators() {
        assert!(!Operator::Eq.is_excluded());
        assert!(!Operator::In.is_excluded());
        for op in [
            Operator::Ne,
            Operator::NotIn,
            Operator::Gt,
            Operator::Lt,
            Operator::Ge,
            Operator::Le,
            Operator::Like,
            Operator::NotLike,
        ] {
            assert!(op.is_excluded(), "{op:?} should be excluded");
        }
    }

    #[test]
    fn negation_is_an_involution() {
        for op in [Operator::Eq, Operator::In, Operator::Gt, Operator::Lt, Operator::Like] {
            assert_eq!(op.negate().negate(), op);
        }
        assert_eq!(Operator::Gt.negate(), Operator::Le);
    }

    #[test]
    fn value_matching_is_textual() {
        assert!(Value::Int(5).matches(&Value::from("5")));
        assert!(Value::Bool(true).matches(&Value::Int(1)));
        assert!(!Value::Null.matches(&Value::from("null")));
        assert!(Value::Null.matches(&Value::Null));
    }

    #[test]
    fn sql_rendering_is_deterministic() {
        let filter = FilterNode::and([
            FilterNode::eq("status", "active"),
            FilterNode::or([FilterNode::is_in("kind", [1, 2]), FilterNode::gt("age", 18)]),
        ]);
        assert_eq!(
            filter.to_sql(),
            "(status = 'active') AND ((kind IN (1, 2)) OR (age > 18))"
        );
        assert_eq!(filter.to_sql(), filter.clone().to_sql());
    }

    #[test]
    fn text_values_escape_quotes() {
        assert_eq!(Value::from("o'neil").to_string(), "'o''neil'");
    }

    #[test]
    fn and_also_flattens() {
        let filter = FilterNode::eq("a", 1).and_also(FilterNode::eq("b", 2));
        let filter = filter.and_also(FilterNode::eq("c", 3));
        assert!(matches!(filter, FilterNode::And(ref nodes) if nodes.len() == 3));
    }
}
