//! Gate-scan verification endpoint.
//!
//! - POST /api/verify - Check a scanned payload against the ticket record

use axum::{Json, extract::State};
use serde::Deserialize;

use super::error::ApiError;
use crate::app::GateScan;
use crate::server::state::AppState;

/// Scanned payload.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    /// Payload exactly as read from the ticket's code
    pub payload: String,
}

/// Verify a scanned payload.
///
/// A decodable payload always yields 200; `admissible` says whether the
/// party may enter now.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/verify \
///   -H "Content-Type: application/json" \
///   -d '{"payload": "eyJyZWZlcmVuY2UiOi..."}'
/// ```
///
/// # Errors
///
/// 422 for a malformed or tampered payload, 404 when the ticket is unknown.
pub async fn verify_payload(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<GateScan>, ApiError> {
    let scan = state.engine.verify_payload(&request.payload).await?;
    Ok(Json(scan))
}
