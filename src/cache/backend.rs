//! Cache store interface.
//!
//! The store owns payload storage, TTL expiry and the tag index. Both
//! mutating operations must be atomic from the point of view of concurrent
//! readers and writers.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::keys::CacheKey;
use super::tags::{TableWrite, TagSet};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is absent. Readers treat this exactly like a miss.
    #[error("cache entry not found")]
    NotFound,
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache store script failed: {0}")]
    Script(String),
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn script(err: impl std::fmt::Display) -> Self {
        Self::Script(err.to_string())
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Payload stored under `key`, if present and not expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError>;

    /// Store `payload` under `key` and index it by `tags`, as one atomic step.
    ///
    /// Re-inserting the same key replaces the payload and its tag index.
    async fn insert_with_tags(
        &self,
        key: &CacheKey,
        payload: Bytes,
        tags: &TagSet,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Evict every entry whose tags match `write`, as one atomic step.
    /// Returns the number of evicted entries.
    async fn evict_by_tags(&self, write: &TableWrite) -> Result<usize, StoreError>;
}
