//! Tag derivation.
//!
//! Merges a query's predicate leaves and the caller's explicit rules into
//! per-table, per-column buckets, then materializes the buckets into a
//! [`TagSet`]. Every table the query reads ends up in the set; a table with
//! no usable scope falls back to the create sentinel.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::error::CacheError;
use super::extract::{ConditionExtractor, TableScope, split_qualified};
use super::filter::{FilterNode, Operand};
use super::rules::{Dependency, DropRule, DropRules};
use super::tags::{Tag, TagGroup, TagSet};

#[derive(Debug)]
enum Entry {
    /// Column holds one of the operand's values.
    Value(Operand),
    /// Any update of the column.
    AnyChange,
    /// Update of the column while the row satisfies every dependency.
    Dependent(Vec<(String, Operand)>),
}

#[derive(Debug, Default)]
struct Bucket {
    create: bool,
    columns: Vec<(String, Vec<Entry>)>,
}

impl Bucket {
    fn push(&mut self, column: &str, entry: Entry) {
        match self.columns.iter_mut().find(|(name, _)| name == column) {
            Some((_, entries)) => entries.push(entry),
            None => self.columns.push((column.to_string(), vec![entry])),
        }
    }

    fn is_empty(&self) -> bool {
        !self.create && self.columns.is_empty()
    }
}

pub struct TagBuilder<'a> {
    tables: &'a [String],
    touched: BTreeSet<&'a str>,
    buckets: BTreeMap<String, Bucket>,
}

impl<'a> TagBuilder<'a> {
    /// Derive the tag set of a query reading `tables`, filtered by `filter`,
    /// with the caller's explicit `rules`.
    pub fn build(
        tables: &'a [String],
        filter: Option<&FilterNode>,
        rules: &'a DropRules,
    ) -> Result<TagSet, CacheError> {
        if tables.is_empty() && rules.is_empty() {
            return Err(CacheError::invalid_query(
                "query reads no tables and declares no invalidation rules",
            ));
        }

        let mut builder = Self {
            tables,
            touched: tables
                .iter()
                .map(String::as_str)
                .chain(rules.iter().map(DropRule::table))
                .collect(),
            buckets: BTreeMap::new(),
        };
        for table in tables {
            if table.trim().is_empty() {
                return Err(CacheError::invalid_query("empty table name"));
            }
            builder.buckets.entry(table.clone()).or_default();
        }

        for rule in rules.iter() {
            builder.apply_rule(rule)?;
        }

        let filtered = match filter {
            Some(filter) => builder.apply_filter(filter)?,
            None => BTreeSet::new(),
        };

        for table in tables {
            if filtered.contains(table.as_str()) {
                continue;
            }
            let bucket = builder.buckets.entry(table.clone()).or_default();
            if bucket.is_empty() {
                bucket.create = true;
            }
        }

        let tags = builder.materialize();
        debug!(
            tables = tables.len(),
            rules = rules.len(),
            tags = %tags,
            "derived invalidation tags"
        );
        Ok(tags)
    }

    fn apply_rule(&mut self, rule: &DropRule) -> Result<(), CacheError> {
        let table = rule.table();
        if table.trim().is_empty() {
            return Err(CacheError::invalid_rule(table, "empty table name"));
        }

        match rule {
            DropRule::OnCreate { scope: None, .. } => {
                self.buckets.entry(table.to_string()).or_default().create = true;
            }
            DropRule::OnCreate {
                scope: Some((param, value)),
                ..
            } => {
                let column = self.rule_column(table, param)?;
                require_alternatives(table, &column, value)?;
                self.buckets
                    .entry(table.to_string())
                    .or_default()
                    .push(&column, Entry::Value(value.clone()));
            }
            DropRule::OnUpdate {
                column,
                dependencies,
                ..
            } => {
                let column = self.rule_column(table, column)?;
                let entry = if dependencies.is_empty() {
                    Entry::AnyChange
                } else {
                    Entry::Dependent(self.resolve_dependencies(table, dependencies)?)
                };
                self.buckets
                    .entry(table.to_string())
                    .or_default()
                    .push(&column, entry);
            }
        }
        Ok(())
    }

    fn resolve_dependencies(
        &self,
        table: &str,
        dependencies: &[Dependency],
    ) -> Result<Vec<(String, Operand)>, CacheError> {
        dependencies
            .iter()
            .map(|dependency| {
                let column = self.rule_column(table, &dependency.column)?;
                require_alternatives(table, &column, &dependency.values)?;
                Ok((column, dependency.values.clone()))
            })
            .collect()
    }

    /// Strip the qualifier of a rule column; it must name the rule's table.
    fn rule_column(&self, table: &str, column: &str) -> Result<String, CacheError> {
        let (qualifier, name) = split_qualified(column).map_err(|_| {
            CacheError::invalid_rule(table, format!("malformed column `{column}`"))
        })?;
        match qualifier.as_deref() {
            Some(qualifier) if qualifier != table => {
                let reason = if self.touched.contains(qualifier) {
                    "a row of one table cannot satisfy conditions on another"
                } else {
                    "the query never touches that table"
                };
                Err(CacheError::invalid_rule(
                    table,
                    format!("condition `{column}` references table `{qualifier}`: {reason}"),
                ))
            }
            _ => Ok(name),
        }
    }

    /// Add the predicate's usable leaves. Returns the tables that own at
    /// least one leaf.
    fn apply_filter(&mut self, filter: &FilterNode) -> Result<BTreeSet<&'a str>, CacheError> {
        let scope = TableScope::new(self.tables);
        let mut filtered = BTreeSet::new();

        for leaf in ConditionExtractor::extract(filter)? {
            let table = scope.resolve(&leaf)?;
            filtered.insert(table);
            if leaf.op.is_excluded() {
                continue;
            }
            self.buckets
                .entry(table.to_string())
                .or_default()
                .push(&leaf.column, Entry::Value(leaf.value));
        }

        for table in &filtered {
            if !ConditionExtractor::covers(filter, table, scope)? {
                self.buckets.entry((*table).to_string()).or_default().create = true;
            }
        }

        Ok(filtered)
    }

    fn materialize(self) -> TagSet {
        let mut tags = TagSet::new();
        for (table, bucket) in self.buckets {
            tags.touch(&table);
            if bucket.create {
                tags.push(&table, TagGroup::create());
            }
            for (column, entries) in &bucket.columns {
                for entry in entries {
                    for group in expand(&table, column, entry) {
                        tags.push(&table, group);
                    }
                }
            }
            if tags.groups(&table).is_empty() {
                tags.push(&table, TagGroup::create());
            }
        }
        tags
    }
}

fn expand(table: &str, column: &str, entry: &Entry) -> Vec<TagGroup> {
    match entry {
        Entry::Value(operand) => operand
            .alternatives()
            .iter()
            .map(|value| TagGroup::new([Tag::exact(table, column, value.clone())]))
            .collect(),
        Entry::AnyChange => vec![TagGroup::new([Tag::any(table, column)])],
        Entry::Dependent(dependencies) => {
            let mut combinations: Vec<Vec<Tag>> = vec![Vec::new()];
            for (dependency, operand) in dependencies {
                combinations = combinations
                    .iter()
                    .flat_map(|combination| {
                        operand.alternatives().iter().map(move |value| {
                            let mut next = combination.clone();
                            next.push(Tag::exact(table, dependency.as_str(), value.clone()));
                            next
                        })
                    })
                    .collect();
            }
            let scoped_on_trigger = dependencies.iter().any(|(name, _)| name == column);
            combinations
                .into_iter()
                .map(|mut combination| {
                    if !scoped_on_trigger {
                        combination.push(Tag::any(table, column));
                    }
                    TagGroup::new(combination)
                })
                .collect()
        }
    }
}

fn require_alternatives(table: &str, column: &str, operand: &Operand) -> Result<(), CacheError> {
    if operand.alternatives().is_empty() {
        return Err(CacheError::invalid_rule(
            table,
            format!("condition on `{column}` lists no values"),
        ));
    }
    Ok(())
}
