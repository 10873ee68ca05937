//! Prometheus exporter and store metric descriptions.
//!
//! The server installs the recorder once at startup and serves
//! [`PrometheusHandle::render`] from its `/metrics` route.
//!
//! # Exported Metrics
//!
//! - `store_actions_total` - actions reduced
//! - `store_reducer_duration_seconds` - time spent inside the reducer (under the write lock)
//! - `store_effects_spawned_total` - effects handed to the executor
//! - `store_dead_letters_total` / `store_dead_letters` - dead letter pushes / current size
//! - `circuit_breaker_rejections_total{breaker}` - calls rejected by an open breaker

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the global Prometheus recorder.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
/// already installed in this process.
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_store_metrics();
    tracing::info!("Prometheus recorder installed");
    Ok(handle)
}

/// Register descriptions for the metrics this crate records.
pub fn register_store_metrics() {
    describe_counter!("store_actions_total", "Total number of actions reduced by stores");
    describe_histogram!(
        "store_reducer_duration_seconds",
        "Time spent running reducers under the state write lock"
    );
    describe_counter!(
        "store_effects_spawned_total",
        "Total number of effects handed to the effect executor"
    );
    describe_counter!(
        "store_dead_letters_total",
        "Total number of operations parked in a dead letter queue"
    );
    describe_counter!(
        "store_dead_letters_dropped_total",
        "Dead letters dropped because the queue was full"
    );
    describe_gauge!("store_dead_letters", "Current dead letter queue size");
    describe_counter!(
        "circuit_breaker_rejections_total",
        "Calls rejected without reaching the collaborator because the breaker was open"
    );
}
