//! Query result cache with predicate-derived invalidation.
//!
//! Reads go through [`QueryCache`]: a miss executes the query, stores the raw
//! rows and indexes them by a [`TagSet`] derived from the query's predicate
//! and explicit [`DropRules`]. Writes describe what they changed as a
//! [`TableWrite`]; the store evicts every entry with a matching tag group.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via the `[cache]` settings section:
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_seconds = 3600
//! store_capacity = 10000
//! ```

mod backend;
mod builder;
mod config;
mod error;
mod executor;
mod extract;
mod filter;
mod keys;
mod lock;
mod query;
mod query_cache;
mod rules;
mod store;
mod tags;
mod trigger;

pub use backend::{CacheStore, StoreError};
pub use builder::TagBuilder;
pub use config::CacheConfig;
pub use error::CacheError;
pub use executor::{Entity, ExecutorError, QueryExecutor};
pub use extract::{Condition, ConditionExtractor, TableScope};
pub use filter::{FilterNode, Operand, Operator, Value};
pub use keys::{CacheKey, CacheKeyGenerator, FetchMode, KEY_PREFIX};
pub use query::{CachedQuery, Query, SortOrder};
pub use query_cache::{Collection, Loaded, QueryCache};
pub use rules::{Dependency, DropRule, DropRules};
pub use store::MemoryStore;
pub use tags::{RowImage, TableWrite, Tag, TagGroup, TagSet, TagValue, WriteKind};
pub use trigger::CacheTrigger;
