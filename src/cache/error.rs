use thiserror::Error;

use super::backend::StoreError;
use super::executor::ExecutorError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid predicate: {message}")]
    InvalidPredicate { message: String },
    #[error("invalid invalidation rule for table `{table}`: {message}")]
    InvalidRule { table: String, message: String },
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },
    #[error("cache store error: {0}")]
    Store(#[from] StoreError),
    #[error("query execution failed: {0}")]
    Executor(#[from] ExecutorError),
    #[error("cache payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl CacheError {
    pub fn invalid_predicate(message: impl Into<String>) -> Self {
        Self::InvalidPredicate {
            message: message.into(),
        }
    }

    pub fn invalid_rule(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRule {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }
}
