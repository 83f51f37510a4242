//! Cache configuration.
//!
//! Built from the `[cache]` section of the settings file and passed
//! explicitly into [`QueryCache`](super::QueryCache) and
//! [`MemoryStore`](super::MemoryStore).

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_TTL_SECONDS: u64 = 3600;
const DEFAULT_STORE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Global switch; when off every query bypasses the cache.
    pub enabled: bool,
    /// Lifetime of a populated entry.
    pub ttl: Duration,
    /// Maximum entries held by the in-process store.
    pub store_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(DEFAULT_TTL_SECONDS),
            store_capacity: DEFAULT_STORE_CAPACITY,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl: settings.ttl,
            store_capacity: settings.store_capacity.get(),
        }
    }
}

impl CacheConfig {
    /// A configuration with caching switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn store_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.store_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.store_capacity, 10_000);
    }

    #[test]
    fn disabled_keeps_other_defaults() {
        let config = CacheConfig::disabled();
        assert!(!config.enabled);
        assert_eq!(config.store_capacity, DEFAULT_STORE_CAPACITY);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            store_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.store_capacity_non_zero().get(), 1);
    }
}
