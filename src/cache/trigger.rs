//! Write-path eviction.
//!
//! Call one of these after a write commits. Each call is a single
//! `evict_by_tags` round trip, however many rows the statement touched.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument};

use super::backend::CacheStore;
use super::error::CacheError;
use super::tags::{RowImage, TableWrite, WriteKind};

const METRIC_EVICT: &str = "predicate_cache_evict_total";

/// Cache trigger for evicting entries invalidated by writes.
///
/// Eviction runs even while reads bypass the cache, so entries populated
/// before the switch was turned off never outlive a write.
///
/// # Usage
///
/// ```ignore
/// // After a successful status update:
/// trigger
///     .rows_updated("orders", [RowImage::new([("status", "closed")])
///         .with_previous([("status", "active")])])
///     .await?;
/// ```
pub struct CacheTrigger<S> {
    store: Arc<S>,
}

impl<S> Clone for CacheTrigger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: CacheStore> CacheTrigger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Evict every entry invalidated by `write`.
    ///
    /// Returns the number of evicted entries.
    #[instrument(skip_all, fields(table = %write.table, kind = ?write.kind))]
    pub async fn apply(&self, write: &TableWrite) -> Result<usize, CacheError> {
        let evicted = self.store.evict_by_tags(write).await?;
        if evicted > 0 {
            counter!(METRIC_EVICT, "table" => write.table.clone()).increment(evicted as u64);
        }
        debug!(
            table = %write.table,
            rows = write.rows.len(),
            unscoped = write.is_unscoped(),
            evicted,
            "Cache eviction complete"
        );
        Ok(evicted)
    }

    pub async fn rows_inserted(
        &self,
        table: &str,
        rows: impl IntoIterator<Item = RowImage>,
    ) -> Result<usize, CacheError> {
        self.apply(&TableWrite::insert(table, rows)).await
    }

    /// Rows should carry previous values for the columns the update changed.
    pub async fn rows_updated(
        &self,
        table: &str,
        rows: impl IntoIterator<Item = RowImage>,
    ) -> Result<usize, CacheError> {
        self.apply(&TableWrite::update(table, rows)).await
    }

    /// Rows carry the values as they were before the delete.
    pub async fn rows_deleted(
        &self,
        table: &str,
        rows: impl IntoIterator<Item = RowImage>,
    ) -> Result<usize, CacheError> {
        self.apply(&TableWrite::delete(table, rows)).await
    }

    /// A bulk statement whose rows are unknown.
    pub async fn table_written(&self, table: &str, kind: WriteKind) -> Result<usize, CacheError> {
        self.apply(&TableWrite::unscoped(table, kind)).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::cache::builder::TagBuilder;
    use crate::cache::config::CacheConfig;
    use crate::cache::filter::FilterNode;
    use crate::cache::keys::{CacheKeyGenerator, FetchMode};
    use crate::cache::rules::DropRules;
    use crate::cache::store::MemoryStore;

    async fn seeded(filter: FilterNode) -> (Arc<MemoryStore>, CacheTrigger<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(&CacheConfig::default()));
        let tables = vec!["orders".to_string()];
        let tags = TagBuilder::build(&tables, Some(&filter), &DropRules::new()).expect("tags");
        let key =
            CacheKeyGenerator::generate(FetchMode::All, "Order", &filter.to_sql(), None, None);
        store
            .insert_with_tags(&key, Bytes::from_static(b"[]"), &tags, Duration::from_secs(60))
            .await
            .expect("insert");
        let trigger = CacheTrigger::new(Arc::clone(&store));
        (store, trigger)
    }

    #[tokio::test]
    async fn matching_insert_evicts() {
        let (store, trigger) = seeded(FilterNode::eq("status", "active")).await;

        let evicted = trigger
            .rows_inserted("orders", [RowImage::new([("status", "active")])])
            .await
            .expect("evict");

        assert_eq!(evicted, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unrelated_insert_keeps_entry() {
        let (store, trigger) = seeded(FilterNode::eq("status", "active")).await;

        let evicted = trigger
            .rows_inserted("orders", [RowImage::new([("status", "closed")])])
            .await
            .expect("evict");

        assert_eq!(evicted, 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn row_leaving_result_set_evicts() {
        let (store, trigger) = seeded(FilterNode::eq("status", "active")).await;

        trigger
            .rows_updated(
                "orders",
                [RowImage::new([("status", "closed")]).with_previous([("status", "active")])],
            )
            .await
            .expect("evict");

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn bulk_write_evicts_everything_on_table() {
        let (store, trigger) = seeded(FilterNode::eq("status", "active")).await;

        trigger
            .table_written("orders", WriteKind::Delete)
            .await
            .expect("evict");

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn writes_to_other_tables_are_ignored() {
        let (store, trigger) = seeded(FilterNode::eq("status", "active")).await;

        trigger
            .table_written("users", WriteKind::Update)
            .await
            .expect("evict");

        assert_eq!(store.len(), 1);
    }
}
