//! Cache key generation.
//!
//! Keys are a fixed namespace marker followed by the hex SHA-256 digest of
//! the fetch mode, model identity, normalized query text and pagination.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Namespace marker separating query-cache keys from other key families.
pub const KEY_PREFIX: &str = "q:";

/// Shape of the cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    All,
    One,
}

impl FetchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::One => "one",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque key of one cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct CacheKeyGenerator;

impl CacheKeyGenerator {
    pub fn generate(
        mode: FetchMode,
        model: &str,
        query_text: &str,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> CacheKey {
        let mut material = String::with_capacity(model.len() + query_text.len() + 32);
        material.push_str(mode.as_str());
        material.push_str(&model.to_lowercase());
        material.push_str(query_text);
        if let Some(limit) = limit.filter(|limit| *limit > 0) {
            material.push_str("limit");
            material.push_str(&limit.to_string());
        }
        if let Some(offset) = offset.filter(|offset| *offset > 0) {
            material.push_str("offset");
            material.push_str(&offset.to_string());
        }

        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        CacheKey(format!("{KEY_PREFIX}{}", hex::encode(hasher.finalize())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQL: &str = "SELECT * FROM orders WHERE status = 'active'";

    #[test]
    fn generation_is_deterministic() {
        let first = CacheKeyGenerator::generate(FetchMode::All, "Order", SQL, Some(10), None);
        let second = CacheKeyGenerator::generate(FetchMode::All, "Order", SQL, Some(10), None);
        assert_eq!(first, second);
        assert!(first.as_str().starts_with(KEY_PREFIX));
        assert_eq!(first.as_str().len(), KEY_PREFIX.len() + 64);
    }

    #[test]
    fn mode_always_distinguishes_keys() {
        let all = CacheKeyGenerator::generate(FetchMode::All, "Order", SQL, None, None);
        let one = CacheKeyGenerator::generate(FetchMode::One, "Order", SQL, None, None);
        assert_ne!(all, one);
    }

    #[test]
    fn model_identity_is_case_insensitive() {
        let upper = CacheKeyGenerator::generate(FetchMode::All, "App\\Order", SQL, None, None);
        let lower = CacheKeyGenerator::generate(FetchMode::All, "app\\order", SQL, None, None);
        assert_eq!(upper, lower);
    }

    #[test]
    fn pagination_changes_the_key() {
        let base = CacheKeyGenerator::generate(FetchMode::All, "Order", SQL, None, None);
        let limited = CacheKeyGenerator::generate(FetchMode::All, "Order", SQL, Some(5), None);
        let paged = CacheKeyGenerator::generate(FetchMode::All, "Order", SQL, Some(5), Some(5));
        assert_ne!(base, limited);
        assert_ne!(limited, paged);
    }

    #[test]
    fn zero_pagination_is_ignored() {
        let base = CacheKeyGenerator::generate(FetchMode::All, "Order", SQL, None, None);
        let zero = CacheKeyGenerator::generate(FetchMode::All, "Order", SQL, Some(0), Some(0));
        assert_eq!(base, zero);
    }
}
