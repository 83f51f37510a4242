//! Read-path facade.
//!
//! Every read walks `CHECKING -> HIT` or
//! `CHECKING -> MISS -> EXECUTING -> POPULATING -> RETURNED`. The store holds
//! raw rows only; post-load hooks, eager-loaded relations and `index_by`
//! are reapplied on every read, hit or miss.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::backend::{CacheStore, StoreError};
use super::config::CacheConfig;
use super::error::CacheError;
use super::executor::{Entity, QueryExecutor};
use super::keys::{CacheKey, FetchMode};
use super::query::{CachedQuery, Query};
use super::tags::{TableWrite, TagSet, WriteKind};
use super::trigger::CacheTrigger;

const METRIC_HIT: &str = "predicate_cache_hit_total";
const METRIC_MISS: &str = "predicate_cache_miss_total";
const METRIC_BYPASS: &str = "predicate_cache_bypass_total";
const METRIC_POPULATE_ERROR: &str = "predicate_cache_populate_error_total";
const METRIC_FETCH_MS: &str = "predicate_cache_fetch_ms";

/// A read result and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded<T> {
    pub value: T,
    pub from_cache: bool,
}

impl<T> Loaded<T> {
    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loaded<U> {
        Loaded {
            value: f(self.value),
            from_cache: self.from_cache,
        }
    }
}

/// Rows returned by [`QueryCache::fetch_all`].
///
/// `Indexed` keeps the first position of each key and the last row written
/// to it, matching how an associative array indexed by a column behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collection<T> {
    List(Vec<T>),
    Indexed(Vec<(String, T)>),
}

impl<T> Collection<T> {
    pub fn len(&self) -> usize {
        match self {
            Self::List(rows) => rows.len(),
            Self::Indexed(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row stored under `key` in an indexed collection.
    pub fn get(&self, key: &str) -> Option<&T> {
        match self {
            Self::List(_) => None,
            Self::Indexed(rows) => rows.iter().find(|(k, _)| k == key).map(|(_, row)| row),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            Self::List(rows) => Box::new(rows.iter()),
            Self::Indexed(rows) => Box::new(rows.iter().map(|(_, row)| row)),
        }
    }

    pub fn into_rows(self) -> Vec<T> {
        match self {
            Self::List(rows) => rows,
            Self::Indexed(rows) => rows.into_iter().map(|(_, row)| row).collect(),
        }
    }
}

/// Stored form of a cached result. `NoRow` is a cached empty single-row
/// read, distinct from an absent entry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
enum Payload<T> {
    Rows(Vec<T>),
    One(T),
    NoRow,
}

impl<T> Payload<T> {
    fn from_rows(rows: Vec<T>, mode: FetchMode) -> Self {
        match mode {
            FetchMode::All => Self::Rows(rows),
            FetchMode::One => rows.into_iter().next().map_or(Self::NoRow, Self::One),
        }
    }

    fn fits(&self, mode: FetchMode) -> bool {
        matches!(
            (self, mode),
            (Self::Rows(_), FetchMode::All) | (Self::One(_) | Self::NoRow, FetchMode::One)
        )
    }

    fn into_rows(self) -> Vec<T> {
        match self {
            Self::Rows(rows) => rows,
            Self::One(row) => vec![row],
            Self::NoRow => Vec::new(),
        }
    }
}

/// Query result cache.
///
/// Reads consult `S` before running `E`; writes evict through
/// [`CacheTrigger`].
pub struct QueryCache<S, E> {
    config: CacheConfig,
    store: Arc<S>,
    executor: Arc<E>,
    trigger: CacheTrigger<S>,
}

impl<S: CacheStore, E> QueryCache<S, E> {
    pub fn new(config: CacheConfig, store: Arc<S>, executor: Arc<E>) -> Self {
        let trigger = CacheTrigger::new(Arc::clone(&store));
        Self {
            config,
            store,
            executor,
            trigger,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Turn the global switch on or off. Reads bypass the cache while off;
    /// writes keep evicting.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    pub fn trigger(&self) -> &CacheTrigger<S> {
        &self.trigger
    }

    /// Fetch every row matching `query`.
    #[instrument(skip_all, fields(model = %query.query().model()))]
    pub async fn fetch_all<T>(
        &self,
        query: &CachedQuery,
    ) -> Result<Loaded<Collection<T>>, CacheError>
    where
        T: Entity,
        E: QueryExecutor<T>,
    {
        let started_at = Instant::now();
        let (payload, from_cache) = self.load::<T>(query, FetchMode::All).await?;

        let mut rows = payload.into_rows();
        self.hydrate(query.query(), &mut rows).await?;
        let value = index_rows(query.query(), rows)?;

        record_fetch(FetchMode::All, from_cache, started_at);
        Ok(Loaded { value, from_cache })
    }

    /// Fetch the first row matching `query`.
    ///
    /// An empty result is cached too, so repeated lookups of a missing row
    /// do not reach the executor.
    #[instrument(skip_all, fields(model = %query.query().model()))]
    pub async fn fetch_one<T>(&self, query: &CachedQuery) -> Result<Loaded<Option<T>>, CacheError>
    where
        T: Entity,
        E: QueryExecutor<T>,
    {
        let started_at = Instant::now();
        let (payload, from_cache) = self.load::<T>(query, FetchMode::One).await?;

        let mut row = payload.into_rows().into_iter().next();
        if let Some(row) = row.as_mut() {
            self.hydrate(query.query(), std::slice::from_mut(row)).await?;
        }

        record_fetch(FetchMode::One, from_cache, started_at);
        Ok(Loaded {
            value: row,
            from_cache,
        })
    }

    /// Any row matching `query`, read straight from the executor with
    /// `limit 1`.
    pub async fn any<T>(&self, query: &CachedQuery) -> Result<Option<T>, CacheError>
    where
        T: Entity,
        E: QueryExecutor<T>,
    {
        let query = query.clone().no_cache().map_query(|q| q.limit(1));
        Ok(self.fetch_one::<T>(&query).await?.into_inner())
    }

    /// Delete every row matching `query` and evict cached results over its
    /// primary table.
    #[instrument(skip_all, fields(table = %query.primary_table()))]
    pub async fn delete_all<T>(&self, query: &Query) -> Result<u64, CacheError>
    where
        T: Entity,
        E: QueryExecutor<T>,
    {
        let deleted = self.executor.delete_matching(query).await?;
        if deleted > 0 {
            self.trigger
                .table_written(query.primary_table(), WriteKind::Delete)
                .await?;
        }
        Ok(deleted)
    }

    /// Evict entries invalidated by `write`.
    pub async fn invalidate(&self, write: &TableWrite) -> Result<usize, CacheError> {
        self.trigger.apply(write).await
    }

    async fn load<T>(
        &self,
        query: &CachedQuery,
        mode: FetchMode,
    ) -> Result<(Payload<T>, bool), CacheError>
    where
        T: Entity,
        E: QueryExecutor<T>,
    {
        if !self.config.enabled || !query.is_cacheable() {
            let reason = if !self.config.enabled {
                "disabled"
            } else if query.query().is_array() {
                "raw"
            } else {
                "no_cache"
            };
            counter!(METRIC_BYPASS, "reason" => reason).increment(1);
            debug!(mode = %mode, reason, "Query cache bypassed");
            let rows = self.executor.fetch_rows(query.query()).await?;
            return Ok((Payload::from_rows(rows, mode), false));
        }

        let tags = query.tags()?;
        let key = query.cache_key(mode);

        if let Some(payload) = self.lookup::<T>(&key, mode).await? {
            counter!(METRIC_HIT, "mode" => mode.as_str()).increment(1);
            debug!(cache_key = %key, mode = %mode, outcome = "hit", "Query cache lookup");
            return Ok((payload, true));
        }

        counter!(METRIC_MISS, "mode" => mode.as_str()).increment(1);
        debug!(cache_key = %key, mode = %mode, outcome = "miss", "Query cache lookup");

        let rows = self.executor.fetch_rows(query.query()).await?;
        let payload = Payload::from_rows(rows, mode);

        if let Err(err) = self.populate(&key, &payload, &tags).await {
            counter!(METRIC_POPULATE_ERROR).increment(1);
            warn!(cache_key = %key, error = %err, "Query cache populate failed");
        }

        Ok((payload, false))
    }

    /// Cached payload under `key`. Absent, undecodable and wrong-shape
    /// entries are misses; other store failures propagate.
    async fn lookup<T: Entity>(
        &self,
        key: &CacheKey,
        mode: FetchMode,
    ) -> Result<Option<Payload<T>>, CacheError> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) | Err(StoreError::NotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_slice::<Payload<T>>(&bytes) {
            Ok(payload) if payload.fits(mode) => Ok(Some(payload)),
            Ok(_) => {
                warn!(cache_key = %key, mode = %mode, "Cached payload has the wrong shape");
                Ok(None)
            }
            Err(err) => {
                warn!(cache_key = %key, error = %err, "Cached payload could not be decoded");
                Ok(None)
            }
        }
    }

    async fn populate<T: Entity>(
        &self,
        key: &CacheKey,
        payload: &Payload<T>,
        tags: &TagSet,
    ) -> Result<(), CacheError> {
        let encoded = Bytes::from(serde_json::to_vec(payload)?);
        let stored = self
            .store
            .insert_with_tags(key, encoded, tags, self.config.ttl)
            .await?;
        debug!(cache_key = %key, stored, tags = %tags, "Query cache populated");
        Ok(())
    }

    async fn hydrate<T>(&self, query: &Query, rows: &mut [T]) -> Result<(), CacheError>
    where
        T: Entity,
        E: QueryExecutor<T>,
    {
        if !query.is_array() {
            for row in rows.iter_mut() {
                row.after_load();
            }
        }
        if !query.relations().is_empty() && !rows.is_empty() {
            self.executor.populate_relations(query, rows).await?;
        }
        Ok(())
    }
}

fn index_rows<T: Entity>(query: &Query, rows: Vec<T>) -> Result<Collection<T>, CacheError> {
    let Some(column) = query.index_column() else {
        return Ok(Collection::List(rows));
    };

    let mut positions: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut indexed: Vec<(String, T)> = Vec::with_capacity(rows.len());
    for row in rows {
        let key = row
            .attribute(column)
            .ok_or_else(|| {
                CacheError::invalid_query(format!("index column `{column}` missing from row"))
            })?
            .canonical();
        match positions.get(&key) {
            Some(&at) => indexed[at].1 = row,
            None => {
                positions.insert(key.clone(), indexed.len());
                indexed.push((key, row));
            }
        }
    }
    Ok(Collection::Indexed(indexed))
}

fn record_fetch(mode: FetchMode, from_cache: bool, started_at: Instant) {
    histogram!(
        METRIC_FETCH_MS,
        "mode" => mode.as_str(),
        "outcome" => if from_cache { "hit" } else { "executed" }
    )
    .record(started_at.elapsed().as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::filter::Value;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: i64,
        group: String,
    }

    impl Entity for Row {
        fn attribute(&self, column: &str) -> Option<Value> {
            match column {
                "id" => Some(Value::Int(self.id)),
                "group" => Some(Value::from(self.group.as_str())),
                _ => None,
            }
        }
    }

    fn row(id: i64, group: &str) -> Row {
        Row {
            id,
            group: group.to_string(),
        }
    }

    #[test]
    fn single_row_payload_distinguishes_no_row() {
        let none: Payload<Row> = Payload::from_rows(Vec::new(), FetchMode::One);
        assert!(matches!(none, Payload::NoRow));

        let some = Payload::from_rows(vec![row(1, "a"), row(2, "b")], FetchMode::One);
        assert!(matches!(some, Payload::One(Row { id: 1, .. })));
    }

    #[test]
    fn payload_shape_is_checked_against_mode() {
        let rows: Payload<Row> = Payload::Rows(Vec::new());
        assert!(rows.fits(FetchMode::All));
        assert!(!rows.fits(FetchMode::One));
        assert!(Payload::<Row>::NoRow.fits(FetchMode::One));
    }

    #[test]
    fn no_row_survives_serialization() {
        let encoded = serde_json::to_vec(&Payload::<Row>::NoRow).expect("encode");
        let decoded: Payload<Row> = serde_json::from_slice(&encoded).expect("decode");
        assert!(matches!(decoded, Payload::NoRow));
    }

    #[test]
    fn index_keeps_first_position_and_last_row() {
        let query = Query::new("Row", "rows").index_by("group");
        let rows = vec![row(1, "a"), row(2, "b"), row(3, "a")];

        let Collection::Indexed(indexed) = index_rows(&query, rows).expect("index") else {
            panic!("expected indexed collection");
        };

        assert_eq!(
            indexed,
            vec![("a".to_string(), row(3, "a")), ("b".to_string(), row(2, "b"))]
        );
    }

    #[test]
    fn index_on_unknown_column_fails() {
        let query = Query::new("Row", "rows").index_by("missing");
        let err = index_rows(&query, vec![row(1, "a")]).expect_err("missing column");
        assert!(matches!(err, CacheError::InvalidQuery { .. }));
    }

    #[test]
    fn collection_accessors() {
        let list = Collection::List(vec![row(1, "a")]);
        assert_eq!(list.len(), 1);
        assert!(list.get("a").is_none());

        let indexed = Collection::Indexed(vec![("7".to_string(), row(7, "x"))]);
        assert_eq!(indexed.get("7"), Some(&row(7, "x")));
        assert_eq!(indexed.into_rows(), vec![row(7, "x")]);
    }
}
