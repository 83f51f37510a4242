//! Database-facing seam of the cache.
//!
//! The cache never talks to a database itself. Applications implement
//! [`QueryExecutor`] for their persistence layer and [`Entity`] for the
//! records it hydrates.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::filter::Value;
use super::query::Query;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("query failed: {0}")]
    Query(String),
    #[error("relation `{relation}` could not be loaded: {message}")]
    Relation { relation: String, message: String },
    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

impl ExecutorError {
    pub fn query(err: impl std::fmt::Display) -> Self {
        Self::Query(err.to_string())
    }

    pub fn relation(relation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Relation {
            relation: relation.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// A hydrated record.
///
/// The serialized form is what the cache stores, so it must carry raw
/// column data only. Eagerly loaded relations are re-attached on every read.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Value of a column, used for `index_by`.
    fn attribute(&self, column: &str) -> Option<Value>;

    /// Post-load hook, run after every hydration whether from the database
    /// or from the cache.
    fn after_load(&mut self) {}
}

#[async_trait]
pub trait QueryExecutor<T: Entity>: Send + Sync {
    /// Rows matching `query`, without relations.
    async fn fetch_rows(&self, query: &Query) -> Result<Vec<T>, ExecutorError>;

    /// Attach the relations named by `query.relations()`.
    async fn populate_relations(
        &self,
        _query: &Query,
        _rows: &mut [T],
    ) -> Result<(), ExecutorError> {
        Ok(())
    }

    /// Delete rows matching `query`, returning the number deleted.
    async fn delete_matching(&self, query: &Query) -> Result<u64, ExecutorError>;
}
