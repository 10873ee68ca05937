//! Health and metrics endpoints.

use axum::{Json, extract::State, http::StatusCode};
use booking_runtime::circuit_breaker::State as BreakerState;
use serde::Serialize;

use super::state::AppState;

/// Health report.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while a dependency is impaired
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Per-component detail
    pub components: Components,
}

/// Component detail of the health report.
#[derive(Debug, Serialize)]
pub struct Components {
    /// Catalog breaker state (`closed`, `open`, `half_open`)
    pub catalog: &'static str,
    /// Persistence backend
    pub repository: &'static str,
    /// Tickets held by the ledger
    pub tickets: usize,
    /// Side effects still running
    pub pending_effects: usize,
    /// Side effects awaiting reconciliation
    pub dead_letters: usize,
    /// Whether verification payloads are signed
    pub payload_signing: bool,
}

/// Liveness plus a component report.
///
/// Always 200 while the process serves requests; `status` turns `degraded`
/// when the catalog breaker is not closed or side effects are parked.
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"ok","version":"0.1.0","components":{"catalog":"closed",...}}
/// ```
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let engine = &state.engine;
    let breaker = engine.catalog().breaker_state();
    let dead_letters = engine.dead_letters().len();
    let tickets = engine.store().state(|s| s.ledger.len()).await;

    let degraded = breaker != BreakerState::Closed || dead_letters > 0;

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: if degraded { "degraded" } else { "ok" },
            version: env!("CARGO_PKG_VERSION"),
            components: Components {
                catalog: breaker.as_str(),
                repository: state.backend,
                tickets,
                pending_effects: engine.store().pending_effects(),
                dead_letters,
                payload_signing: engine.store().environment().signer.is_signing(),
            },
        }),
    )
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed\n".to_string()),
    }
}
