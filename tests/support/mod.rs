//! In-memory executor and store doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use predicate_cache::cache::{
    CacheKey, CacheStore, Entity, ExecutorError, FilterNode, MemoryStore, Operator, Query,
    QueryExecutor, RowImage, StoreError, TableWrite, TagSet, Value,
};
use serde::{Deserialize, Serialize};

pub const ORDERS: &str = "orders";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub status: String,
    pub customer_id: i64,
    /// Filled by relation loading, never stored.
    #[serde(skip)]
    pub items: Vec<String>,
    #[serde(skip)]
    pub loaded: bool,
}

impl Order {
    pub fn new(id: i64, status: &str, customer_id: i64) -> Self {
        Self {
            id,
            status: status.to_string(),
            customer_id,
            items: Vec::new(),
            loaded: false,
        }
    }

    pub fn image(&self) -> RowImage {
        RowImage::new([
            ("id", Value::Int(self.id)),
            ("status", Value::from(self.status.as_str())),
            ("customer_id", Value::Int(self.customer_id)),
        ])
    }
}

impl Entity for Order {
    fn attribute(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(Value::Int(self.id)),
            "status" => Some(Value::from(self.status.as_str())),
            "customer_id" => Some(Value::Int(self.customer_id)),
            _ => None,
        }
    }

    fn after_load(&mut self) {
        self.loaded = true;
    }
}

/// Orders table with call counters.
#[derive(Default)]
pub struct OrderTable {
    rows: Mutex<Vec<Order>>,
    fetches: AtomicUsize,
    relation_loads: AtomicUsize,
}

impl OrderTable {
    pub fn with_rows(rows: impl IntoIterator<Item = Order>) -> Self {
        Self {
            rows: Mutex::new(rows.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn relation_loads(&self) -> usize {
        self.relation_loads.load(Ordering::SeqCst)
    }

    /// Insert a row and describe the write.
    pub fn insert(&self, order: Order) -> TableWrite {
        let write = TableWrite::insert(ORDERS, [order.image()]);
        self.rows.lock().expect("rows").push(order);
        write
    }

    /// Change an order's status and describe the write.
    pub fn set_status(&self, id: i64, status: &str) -> TableWrite {
        let mut rows = self.rows.lock().expect("rows");
        let row = rows.iter_mut().find(|row| row.id == id).expect("known order");
        let previous = std::mem::replace(&mut row.status, status.to_string());
        TableWrite::update(ORDERS, [row.image().with_previous([("status", previous)])])
    }
}

#[async_trait]
impl QueryExecutor<Order> for OrderTable {
    async fn fetch_rows(&self, query: &Query) -> Result<Vec<Order>, ExecutorError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock().map_err(ExecutorError::unavailable)?;
        let offset = query.offset_value().unwrap_or(0) as usize;
        let limit = query.limit_value().map_or(usize::MAX, |limit| limit as usize);
        Ok(rows
            .iter()
            .filter(|row| query.predicate().is_none_or(|filter| matches(filter, row)))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn populate_relations(
        &self,
        query: &Query,
        rows: &mut [Order],
    ) -> Result<(), ExecutorError> {
        self.relation_loads.fetch_add(1, Ordering::SeqCst);
        for row in rows {
            row.items = query.relations().to_vec();
        }
        Ok(())
    }

    async fn delete_matching(&self, query: &Query) -> Result<u64, ExecutorError> {
        let mut rows = self.rows.lock().map_err(ExecutorError::unavailable)?;
        let before = rows.len();
        rows.retain(|row| !query.predicate().is_none_or(|filter| matches(filter, row)));
        Ok((before - rows.len()) as u64)
    }
}

fn matches(filter: &FilterNode, row: &Order) -> bool {
    match filter {
        FilterNode::Compare { column, op, value } => {
            let column = column.rsplit('.').next().unwrap_or(column);
            let Some(actual) = row.attribute(column) else {
                return false;
            };
            let alternatives = value.alternatives();
            let any = alternatives.iter().any(|v| v.matches(&actual));
            match op {
                Operator::Eq | Operator::In => any,
                Operator::Ne | Operator::NotIn => !any,
                Operator::Gt => compare(&actual, alternatives, |a, b| a > b),
                Operator::Lt => compare(&actual, alternatives, |a, b| a < b),
                Operator::Ge => compare(&actual, alternatives, |a, b| a >= b),
                Operator::Le => compare(&actual, alternatives, |a, b| a <= b),
                Operator::Like | Operator::NotLike => false,
            }
        }
        FilterNode::And(nodes) => nodes.iter().all(|node| matches(node, row)),
        FilterNode::Or(nodes) => nodes.iter().any(|node| matches(node, row)),
        FilterNode::Not(node) => !matches(node, row),
    }
}

fn compare(actual: &Value, expected: &[Value], cmp: fn(i64, i64) -> bool) -> bool {
    match (actual, expected.first()) {
        (Value::Int(a), Some(Value::Int(b))) => cmp(*a, *b),
        _ => false,
    }
}

/// Store whose reads fail with the given error.
pub struct FailingReads(pub fn() -> StoreError);

#[async_trait]
impl CacheStore for FailingReads {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        Err((self.0)())
    }

    async fn insert_with_tags(
        &self,
        _key: &CacheKey,
        _payload: Bytes,
        _tags: &TagSet,
        _ttl: Duration,
    ) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn evict_by_tags(&self, _write: &TableWrite) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// Memory store that refuses to populate.
pub struct FailingWrites(pub MemoryStore);

#[async_trait]
impl CacheStore for FailingWrites {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        self.0.get(key).await
    }

    async fn insert_with_tags(
        &self,
        _key: &CacheKey,
        _payload: Bytes,
        _tags: &TagSet,
        _ttl: Duration,
    ) -> Result<bool, StoreError> {
        Err(StoreError::script("tag index update rejected"))
    }

    async fn evict_by_tags(&self, write: &TableWrite) -> Result<usize, StoreError> {
        self.0.evict_by_tags(write).await
    }
}
