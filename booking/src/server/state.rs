//! Application state for the booking HTTP server.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::app::{BookingEngine, SharedEngine};

/// State shared across all HTTP handlers.
///
/// Cloned per request; every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The booking engine
    pub engine: SharedEngine,

    /// Prometheus recorder handle; `/metrics` is empty without one
    pub metrics: Option<PrometheusHandle>,

    /// Persistence backend label for the health report
    pub backend: &'static str,
}

impl AppState {
    /// Create state over an engine.
    #[must_use]
    pub fn new(engine: BookingEngine, backend: &'static str) -> Self {
        Self {
            engine: Arc::new(engine),
            metrics: None,
            backend,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
