//! Condition extraction.
//!
//! Flattens a [`FilterNode`] tree into `(column, operator, value)` leaves and
//! answers whether a table's equality leaves cover every row the predicate
//! can match. Excluded operators are reported, not dropped; the tag builder
//! decides what to do with them.

use super::error::CacheError;
use super::filter::{FilterNode, Operand, Operator};

/// One flattened predicate leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Table qualifier as written in the predicate, if any.
    pub qualifier: Option<String>,
    pub column: String,
    /// Operator after negations above the leaf have been applied.
    pub op: Operator,
    pub value: Operand,
}

impl Condition {
    fn parse(column: &str, op: Operator, value: &Operand) -> Result<Self, CacheError> {
        let (qualifier, column) = split_qualified(column)?;
        if matches!(value, Operand::List(_)) && !matches!(op, Operator::In | Operator::NotIn) {
            return Err(CacheError::invalid_predicate(format!(
                "operator `{}` on `{column}` takes a single value, got a list",
                op.as_sql()
            )));
        }
        Ok(Self {
            qualifier,
            column,
            op,
            value: value.clone(),
        })
    }
}

/// Tables a query reads from, used to attribute leaves to a table.
#[derive(Debug, Clone, Copy)]
pub struct TableScope<'a> {
    tables: &'a [String],
}

impl<'a> TableScope<'a> {
    pub fn new(tables: &'a [String]) -> Self {
        Self { tables }
    }

    /// Table a leaf belongs to.
    ///
    /// Qualified leaves must name a table of the scope; unqualified leaves
    /// are only accepted when the scope holds exactly one table.
    pub fn resolve(&self, condition: &Condition) -> Result<&'a str, CacheError> {
        match condition.qualifier.as_deref() {
            Some(qualifier) => self
                .tables
                .iter()
                .find(|table| table.as_str() == qualifier)
                .map(String::as_str)
                .ok_or_else(|| {
                    CacheError::invalid_predicate(format!(
                        "column `{qualifier}.{}` references a table the query does not read",
                        condition.column
                    ))
                }),
            None => match self.tables {
                [table] => Ok(table.as_str()),
                [] => Err(CacheError::invalid_predicate(format!(
                    "column `{}` used in a query without tables",
                    condition.column
                ))),
                _ => Err(CacheError::invalid_predicate(format!(
                    "column `{}` is ambiguous across tables {:?}; qualify it",
                    condition.column, self.tables
                ))),
            },
        }
    }
}

pub struct ConditionExtractor;

impl ConditionExtractor {
    /// Flatten a predicate tree into its leaves, in source order.
    pub fn extract(filter: &FilterNode) -> Result<Vec<Condition>, CacheError> {
        let mut leaves = Vec::new();
        collect(filter, false, &mut leaves)?;
        Ok(leaves)
    }

    /// Whether every row of `table` satisfying `filter` also satisfies at least
    /// one non-excluded leaf attributed to `table`.
    ///
    /// When this is false, tags derived from the leaves alone would miss
    /// some writes, and the table needs the create sentinel.
    pub fn covers(
        filter: &FilterNode,
        table: &str,
        scope: TableScope<'_>,
    ) -> Result<bool, CacheError> {
        covered(filter, false, table, scope)
    }
}

fn collect(node: &FilterNode, negated: bool, out: &mut Vec<Condition>) -> Result<(), CacheError> {
    match node {
        FilterNode::Compare { column, op, value } => {
            let op = if negated { op.negate() } else { *op };
            out.push(Condition::parse(column, op, value)?);
        }
        FilterNode::And(nodes) | FilterNode::Or(nodes) => {
            if nodes.is_empty() {
                return Err(CacheError::invalid_predicate("empty AND/OR group"));
            }
            for child in nodes {
                collect(child, negated, out)?;
            }
        }
        FilterNode::Not(child) => collect(child, !negated, out)?,
    }
    Ok(())
}

fn covered(
    node: &FilterNode,
    negated: bool,
    table: &str,
    scope: TableScope<'_>,
) -> Result<bool, CacheError> {
    match node {
        FilterNode::Compare { column, op, value } => {
            let op = if negated { op.negate() } else { *op };
            let condition = Condition::parse(column, op, value)?;
            Ok(scope.resolve(&condition)? == table && !op.is_excluded())
        }
        FilterNode::And(nodes) | FilterNode::Or(nodes) => {
            if nodes.is_empty() {
                return Err(CacheError::invalid_predicate("empty AND/OR group"));
            }
            // De Morgan: a negated AND behaves as an OR and vice versa.
            let conjunction = matches!(node, FilterNode::And(_)) != negated;
            let mut any = false;
            let mut all = true;
            for child in nodes {
                let child_covered = covered(child, negated, table, scope)?;
                any |= child_covered;
                all &= child_covered;
            }
            Ok(if conjunction { any } else { all })
        }
        FilterNode::Not(child) => covered(child, !negated, table, scope),
    }
}

/// Split `table.column`, stripping quoting from both parts.
pub(crate) fn split_qualified(column: &str) -> Result<(Option<String>, String), CacheError> {
    let trimmed = column.trim();
    let (qualifier, name) = match trimmed.rsplit_once('.') {
        Some((qualifier, name)) => (Some(unquote(qualifier)), unquote(name)),
        None => (None, unquote(trimmed)),
    };
    if name.is_empty() || qualifier.as_deref().is_some_and(str::is_empty) {
        return Err(CacheError::invalid_predicate(format!(
            "malformed column reference `{column}`"
        )));
    }
    Ok((qualifier, name))
}

/// Strip `{{table}}`, `"table"` and `` `table` `` quoting.
fn unquote(part: &str) -> String {
    let part = part.trim();
    let part = part
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .unwrap_or(part);
    let part = part.trim_matches(|c| c == '"' || c == '`');
    part.to_string()
}
