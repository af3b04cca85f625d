use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Installs the global subscriber. `RUST_LOG` directives refine the configured level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::Telemetry(err.to_string()))
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    let layer = fmt::layer().with_target(true);
    match format {
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// Registers descriptions for every metric the service emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pennant_cache_hit_total",
            Unit::Count,
            "Banner reads answered from the cache."
        );
        describe_counter!(
            "pennant_cache_miss_total",
            Unit::Count,
            "Banner reads that found no usable cache entry."
        );
        describe_counter!(
            "pennant_cache_evict_total",
            Unit::Count,
            "Cache entries evicted due to capacity."
        );
        describe_counter!(
            "pennant_cache_populate_dropped_total",
            Unit::Count,
            "Cache population requests dropped because the populate queue was full."
        );
        describe_counter!(
            "pennant_cache_populate_failed_total",
            Unit::Count,
            "Cache population writes that failed."
        );
        describe_gauge!(
            "pennant_cache_populate_queue_len",
            Unit::Count,
            "Banners waiting to be written to the cache."
        );
        describe_counter!(
            "pennant_delete_completed_total",
            Unit::Count,
            "Banner delete tasks that removed a banner."
        );
        describe_counter!(
            "pennant_delete_retry_total",
            Unit::Count,
            "Banner delete attempts that failed and were retried."
        );
        describe_counter!(
            "pennant_delete_failed_total",
            Unit::Count,
            "Banner delete tasks dropped after exhausting every attempt."
        );
        describe_histogram!(
            "pennant_delete_task_ms",
            Unit::Milliseconds,
            "Time from first attempt to successful banner deletion."
        );
        describe_counter!(
            "pennant_delete_worker_restart_total",
            Unit::Count,
            "Delete job monitor restarts after a failure or panic."
        );
    });
}
