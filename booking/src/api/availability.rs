//! Slot availability query endpoint.
//!
//! - GET /api/sites/:site_id/slots?date=YYYY-MM-DD - windows with free places

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::availability::SlotAvailability;
use crate::server::state::AppState;
use crate::types::SiteId;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query string for the slots endpoint.
#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    /// Site-local visit date
    pub date: NaiveDate,
}

/// Response for the slots endpoint.
#[derive(Debug, Serialize)]
pub struct SlotsResponse {
    /// Site
    pub site_id: SiteId,
    /// Requested date
    pub date: NaiveDate,
    /// Windows with at least one free place, in start order
    pub slots: Vec<SlotAvailability>,
    /// Free places across all listed windows
    pub total_available: u32,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the bookable windows of a site on a date.
///
/// Public endpoint. The counts are a snapshot; a reservation re-checks
/// capacity when it commits.
///
/// # Example
///
/// ```bash
/// curl 'http://localhost:8080/api/sites/taj-mahal/slots?date=2025-03-15'
/// ```
///
/// Response:
/// ```json
/// {
///   "site_id": "taj-mahal",
///   "date": "2025-03-15",
///   "slots": [
///     {
///       "slot": { "start": "06:00", "end": "08:00" },
///       "capacity": 40,
///       "committed": 12,
///       "available": 28,
///       "price": 5000
///     }
///   ],
///   "total_available": 28
/// }
/// ```
///
/// # Errors
///
/// 404 for an unknown site, 503 while the catalog is unreachable.
pub async fn list_slots(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<SlotsResponse>, ApiError> {
    let site_id = SiteId::new(site_id);
    let slots = state.engine.available_slots(&site_id, query.date).await?;
    let total_available = slots.iter().map(|s| s.available).fold(0u32, u32::saturating_add);

    Ok(Json(SlotsResponse {
        site_id,
        date: query.date,
        slots,
        total_available,
    }))
}
