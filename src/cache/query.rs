//! Read queries and their cache configuration.
//!
//! [`Query`] is a plain query-builder value handed to the executor.
//! [`CachedQuery`] wraps one together with explicit invalidation rules and
//! bypass flags; both are built by value.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::builder::TagBuilder;
use super::error::CacheError;
use super::filter::{FilterNode, Operand};
use super::keys::{CacheKey, CacheKeyGenerator, FetchMode};
use super::rules::{Dependency, DropRules};
use super::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    model: String,
    tables: Vec<String>,
    filter: Option<FilterNode>,
    order_by: Vec<(String, SortOrder)>,
    limit: Option<u64>,
    offset: Option<u64>,
    with: Vec<String>,
    index_by: Option<String>,
    as_array: bool,
}

impl Query {
    /// Query for `model` rows stored in `table`.
    pub fn new(model: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            tables: vec![table.into()],
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            with: Vec::new(),
            index_by: None,
            as_array: false,
        }
    }

    /// Add a joined table to the `FROM` set.
    pub fn join(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        if !self.tables.contains(&table) {
            self.tables.push(table);
        }
        self
    }

    /// Add a predicate, conjoined with any existing one.
    pub fn filter(mut self, node: FilterNode) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and_also(node),
            None => node,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Eager-load a relation.
    pub fn with(mut self, relation: impl Into<String>) -> Self {
        self.with.push(relation.into());
        self
    }

    /// Key collection results by this column.
    pub fn index_by(mut self, column: impl Into<String>) -> Self {
        self.index_by = Some(column.into());
        self
    }

    /// Request raw, non-hydrated rows. Such queries never use the cache.
    pub fn as_array(mut self) -> Self {
        self.as_array = true;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn primary_table(&self) -> &str {
        self.tables.first().map_or("", String::as_str)
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn predicate(&self) -> Option<&FilterNode> {
        self.filter.as_ref()
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn relations(&self) -> &[String] {
        &self.with
    }

    pub fn index_column(&self) -> Option<&str> {
        self.index_by.as_deref()
    }

    pub fn is_array(&self) -> bool {
        self.as_array
    }

    /// Query text without pagination, eager loads or indexing.
    pub fn normalized_text(&self) -> String {
        let mut text = format!("SELECT * FROM {}", self.tables.join(", "));
        if let Some(filter) = &self.filter {
            let _ = write!(text, " WHERE {}", filter.to_sql());
        }
        if !self.order_by.is_empty() {
            let parts: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, order)| match order {
                    SortOrder::Asc => format!("{column} ASC"),
                    SortOrder::Desc => format!("{column} DESC"),
                })
                .collect();
            let _ = write!(text, " ORDER BY {}", parts.join(", "));
        }
        text
    }
}

/// A query plus its cache behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedQuery {
    query: Query,
    rules: DropRules,
    no_cache: bool,
}

impl From<Query> for CachedQuery {
    fn from(query: Query) -> Self {
        Self::new(query)
    }
}

impl CachedQuery {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            rules: DropRules::new(),
            no_cache: false,
        }
    }

    /// Drop cached results on any write to `table`.
    pub fn drop_cache_on_create(mut self, table: impl Into<String>) -> Self {
        self.rules = self.rules.on_create(table);
        self
    }

    /// Drop cached results on writes to `table` whose `param` holds `value`.
    pub fn drop_cache_on_create_where(
        mut self,
        table: impl Into<String>,
        param: impl Into<String>,
        value: impl Into<Operand>,
    ) -> Self {
        self.rules = self.rules.on_create_where(table, param, value);
        self
    }

    /// Drop cached results when an update changes `column` on `table`.
    pub fn drop_cache_on_update(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        self.rules = self.rules.on_update(table, column);
        self
    }

    /// Drop cached results when an update changes `column` on a row that
    /// satisfies every dependency.
    pub fn drop_cache_on_update_when(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        dependencies: impl IntoIterator<Item = Dependency>,
    ) -> Self {
        self.rules = self.rules.on_update_when(table, column, dependencies);
        self
    }

    /// Bypass the cache for this query.
    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    /// Adjust the wrapped query.
    pub fn map_query(mut self, f: impl FnOnce(Query) -> Query) -> Self {
        self.query = f(self.query);
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn rules(&self) -> &DropRules {
        &self.rules
    }

    /// Whether this query may read from or populate the cache.
    pub fn is_cacheable(&self) -> bool {
        !self.no_cache && !self.query.is_array()
    }

    pub fn cache_key(&self, mode: FetchMode) -> CacheKey {
        CacheKeyGenerator::generate(
            mode,
            self.query.model(),
            &self.query.normalized_text(),
            self.query.limit_value(),
            self.query.offset_value(),
        )
    }

    /// Invalidation scope of this query's cached result.
    pub fn tags(&self) -> Result<TagSet, CacheError> {
        TagBuilder::build(self.query.tables(), self.query.predicate(), &self.rules)
    }
}
