use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings, Settings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Load settings from `path` and the environment, then install logging.
pub fn bootstrap(path: Option<&std::path::Path>) -> Result<Settings, InfraError> {
    let settings = crate::config::load(path)?;
    init(&settings.logging)?;
    Ok(settings)
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "predicate_cache_hit_total",
            Unit::Count,
            "Total number of query cache hits."
        );
        describe_counter!(
            "predicate_cache_miss_total",
            Unit::Count,
            "Total number of query cache misses."
        );
        describe_counter!(
            "predicate_cache_bypass_total",
            Unit::Count,
            "Total number of reads that skipped the query cache."
        );
        describe_counter!(
            "predicate_cache_populate_error_total",
            Unit::Count,
            "Total number of failed query cache populates."
        );
        describe_counter!(
            "predicate_cache_evict_total",
            Unit::Count,
            "Total number of entries evicted by writes."
        );
        describe_counter!(
            "predicate_cache_capacity_evict_total",
            Unit::Count,
            "Total number of in-process store evictions due to capacity."
        );
        describe_histogram!(
            "predicate_cache_fetch_ms",
            Unit::Milliseconds,
            "Cached read latency in milliseconds."
        );
    });
}
