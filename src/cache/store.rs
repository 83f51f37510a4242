//! In-process cache store.
//!
//! Payloads live in an LRU map bounded by `CacheConfig::store_capacity`; a
//! secondary index maps each table to the keys whose tag sets mention it.
//! Insertion and eviction hold the same write lock, so no reader observes a
//! key before its tags are indexed.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;

use super::backend::{CacheStore, StoreError};
use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::tags::{TableWrite, TagSet};

const SOURCE: &str = "cache::store";
const METRIC_CAPACITY_EVICT: &str = "predicate_cache_capacity_evict_total";

struct StoredEntry {
    payload: Bytes,
    tags: TagSet,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

struct Inner {
    entries: LruCache<CacheKey, StoredEntry>,
    by_table: HashMap<String, HashSet<CacheKey>>,
}

impl Inner {
    fn index(&mut self, key: &CacheKey, tags: &TagSet) {
        for table in tags.tables() {
            self.by_table
                .entry(table.to_string())
                .or_default()
                .insert(key.clone());
        }
    }

    fn unindex(&mut self, key: &CacheKey, tags: &TagSet) {
        for table in tags.tables() {
            if let Some(keys) = self.by_table.get_mut(table) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_table.remove(table);
                }
            }
        }
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        match self.entries.pop(key) {
            Some(entry) => {
                self.unindex(key, &entry.tags);
                true
            }
            None => false,
        }
    }
}

/// [`CacheStore`] kept in process memory.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: LruCache::new(config.store_capacity_non_zero()),
                by_table: HashMap::new(),
            }),
        }
    }

    /// Number of stored entries, expired ones included until touched.
    pub fn len(&self) -> usize {
        rw_read(&self.inner, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        rw_read(&self.inner, SOURCE, "contains")
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Tag set an entry was inserted with.
    pub fn tags_of(&self, key: &CacheKey) -> Option<TagSet> {
        rw_read(&self.inner, SOURCE, "tags_of")
            .entries
            .peek(key)
            .map(|entry| entry.tags.clone())
    }

    /// Number of keys indexed under `table`.
    pub fn indexed_keys(&self, table: &str) -> usize {
        rw_read(&self.inner, SOURCE, "indexed_keys")
            .by_table
            .get(table)
            .map_or(0, HashSet::len)
    }

    pub fn clear(&self) {
        let mut inner = rw_write(&self.inner, SOURCE, "clear");
        inner.entries.clear();
        inner.by_table.clear();
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let mut inner = rw_write(&self.inner, SOURCE, "get");
        let now = Instant::now();
        let expired = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.payload.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.remove(key);
        }
        Ok(None)
    }

    async fn insert_with_tags(
        &self,
        key: &CacheKey,
        payload: Bytes,
        tags: &TagSet,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        // Zero, or a deadline past what `Instant` can represent, never expires.
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };
        let mut inner = rw_write(&self.inner, SOURCE, "insert_with_tags");

        inner.remove(key);
        let entry = StoredEntry {
            payload,
            tags: tags.clone(),
            expires_at,
        };
        if let Some((evicted_key, evicted)) = inner.entries.push(key.clone(), entry) {
            inner.unindex(&evicted_key, &evicted.tags);
            counter!(METRIC_CAPACITY_EVICT).increment(1);
        }
        inner.index(key, tags);
        Ok(true)
    }

    async fn evict_by_tags(&self, write: &TableWrite) -> Result<usize, StoreError> {
        let mut inner = rw_write(&self.inner, SOURCE, "evict_by_tags");
        let Some(candidates) = inner.by_table.get(&write.table).cloned() else {
            return Ok(0);
        };

        let now = Instant::now();
        let mut evicted = 0;
        for key in candidates {
            let (matched, expired) = match inner.entries.peek(&key) {
                Some(entry) => (entry.tags.is_invalidated_by(write), entry.is_expired(now)),
                None => (false, false),
            };
            if (matched || expired) && inner.remove(&key) && matched {
                evicted += 1;
            }
        }
        Ok(evicted)
    }
}
