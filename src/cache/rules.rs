//! Explicit invalidation rules declared by callers.
//!
//! Rules complement what the tag builder derives from a query's predicate:
//! "drop on create" (optionally scoped to a column value) and "drop on update
//! of a column" (optionally scoped by dependent column values).

use serde::{Deserialize, Serialize};

use super::filter::Operand;

/// A dependent condition of an update rule.
///
/// The column may be qualified with the rule's table (`child.type`). A list
/// of values means "any of these", and each alternative becomes its own tag
/// group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub column: String,
    pub values: Operand,
}

impl Dependency {
    pub fn new(column: impl Into<String>, values: impl Into<Operand>) -> Self {
        Self {
            column: column.into(),
            values: values.into(),
        }
    }

    pub fn any_of<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<super::filter::Value>,
    {
        Self {
            column: column.into(),
            values: values.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum DropRule {
    /// Drop when a row is written to `table`; with a scope, only rows whose
    /// `param` column holds one of the scoped values.
    OnCreate {
        table: String,
        scope: Option<(String, Operand)>,
    },
    /// Drop when an update changes `column` on `table`; with dependencies,
    /// only when the written row also satisfies them.
    OnUpdate {
        table: String,
        column: String,
        dependencies: Vec<Dependency>,
    },
}

impl DropRule {
    pub fn table(&self) -> &str {
        match self {
            Self::OnCreate { table, .. } | Self::OnUpdate { table, .. } => table,
        }
    }
}

/// Ordered collection of rules, built by value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DropRules(Vec<DropRule>);

impl DropRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create(self, table: impl Into<String>) -> Self {
        self.with(DropRule::OnCreate {
            table: table.into(),
            scope: None,
        })
    }

    pub fn on_create_where(
        self,
        table: impl Into<String>,
        param: impl Into<String>,
        value: impl Into<Operand>,
    ) -> Self {
        self.with(DropRule::OnCreate {
            table: table.into(),
            scope: Some((param.into(), value.into())),
        })
    }

    pub fn on_update(self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.with(DropRule::OnUpdate {
            table: table.into(),
            column: column.into(),
            dependencies: Vec::new(),
        })
    }

    pub fn on_update_when(
        self,
        table: impl Into<String>,
        column: impl Into<String>,
        dependencies: impl IntoIterator<Item = Dependency>,
    ) -> Self {
        self.with(DropRule::OnUpdate {
            table: table.into(),
            column: column.into(),
            dependencies: dependencies.into_iter().collect(),
        })
    }

    pub fn with(mut self, rule: DropRule) -> Self {
        self.0.push(rule);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &DropRule> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether any rule targets `table`.
    pub fn covers_table(&self, table: &str) -> bool {
        self.0.iter().any(|rule| rule.table() == table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_in_order() {
        let rules = DropRules::new()
            .on_create("orders")
            .on_update("orders", "status")
            .on_update_when("items", "parent_id", [Dependency::any_of("type", ["A", "B"])]);

        assert_eq!(rules.len(), 3);
        let tables: Vec<_> = rules.iter().map(DropRule::table).collect();
        assert_eq!(tables, vec!["orders", "orders", "items"]);
        assert!(rules.covers_table("items"));
        assert!(!rules.covers_table("users"));
    }

    #[test]
    fn builder_returns_new_values() {
        let base = DropRules::new().on_create("orders");
        let extended = base.clone().on_update("orders", "status");
        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);
    }
}
