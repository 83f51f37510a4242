//! Configuration layer: typed settings with layered precedence (file → env).

use std::{num::NonZeroUsize, path::Path, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "predicate-cache";
const ENV_PREFIX: &str = "PREDICATE_CACHE";
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const MAX_CACHE_TTL_SECS: u64 = 10 * 365 * 24 * 3600;
const DEFAULT_STORE_CAPACITY: usize = 10_000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Global switch honoured by every read.
    pub enabled: bool,
    pub ttl: Duration,
    pub store_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (files → explicit file → environment).
///
/// `config/default` and `predicate-cache` in the working directory are
/// optional; an explicit `path` must exist. Environment variables use the
/// `PREDICATE_CACHE` prefix with `__` between sections, e.g.
/// `PREDICATE_CACHE__CACHE__TTL_SECONDS=60`.
pub fn load(path: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_seconds: Option<u64>,
    store_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { cache, logging } = raw;

        let cache = build_cache_settings(cache)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self { cache, logging })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_secs = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }
    if ttl_secs > MAX_CACHE_TTL_SECS {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            format!("must not exceed {MAX_CACHE_TTL_SECS} seconds"),
        ));
    }

    let store_capacity = NonZeroUsize::new(cache.store_capacity.unwrap_or(DEFAULT_STORE_CAPACITY))
        .ok_or_else(|| LoadError::invalid("cache.store_capacity", "must be greater than zero"))?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl: Duration::from_secs(ttl_secs),
        store_capacity,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}
