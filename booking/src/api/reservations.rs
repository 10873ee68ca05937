//! Ticket API endpoints.
//!
//! - POST /api/tickets - Reserve a slot (requires `x-user-id`)
//! - GET /api/tickets - List the caller's tickets
//! - GET /api/tickets/:reference - Ticket detail (owner only)
//! - POST /api/tickets/:reference/cancel - Cancel with policy refund (owner only)
//! - POST /api/tickets/:reference/check-in - Admit at the gate (staff)
//! - POST /api/tickets/:reference/complete - Close a visit (staff)
//! - POST /api/tickets/:reference/feedback - Rate a completed visit (owner only)
//!
//! # Lifecycle
//!
//! ```text
//! booked → confirmed → checked_in → completed
//!   ↓          ↓
//! expired   cancelled
//! ```

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::caller::CallerId;
use super::error::ApiError;
use crate::app::{CancelReceipt, ReserveRequest, TicketPage, TicketQuery};
use crate::error::BookingError;
use crate::server::state::AppState;
use crate::types::{AddonItem, BookingReference, SiteId, StaffId, Ticket, TicketStatus, TimeSlot, UserId, Visitor};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to reserve a slot.
#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    /// Site to visit
    pub site_id: SiteId,
    /// Site-local visit date
    pub visit_date: NaiveDate,
    /// Window as returned by the slots endpoint
    pub slot: TimeSlot,
    /// Party, one entry per visitor
    pub visitors: Vec<Visitor>,
    /// Optional extras
    #[serde(default)]
    pub addons: Vec<AddonItem>,
}

/// Query string for listing tickets.
#[derive(Debug, Default, Deserialize)]
pub struct ListTicketsQuery {
    /// Only tickets in this status
    pub status: Option<TicketStatus>,
    /// One-based page (default 1)
    pub page: Option<usize>,
    /// Page size (default 10, at most 100)
    pub limit: Option<usize>,
}

/// Request to cancel a ticket.
#[derive(Debug, Default, Deserialize)]
pub struct CancelTicketRequest {
    /// Free-form reason recorded on the ticket
    #[serde(default)]
    pub reason: String,
}

/// Request to check a party in.
#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    /// Staff member at the gate
    pub staff_id: StaffId,
    /// Headcount at the gate, if different from the booking
    pub actual_visitors: Option<u32>,
}

/// Request to rate a visit.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    /// 1 to 5
    pub rating: u8,
    /// Optional review text
    pub review: Option<String>,
}

/// Response for a cancellation.
#[derive(Debug, Serialize)]
pub struct CancelTicketResponse {
    /// Ticket after cancellation
    #[serde(flatten)]
    pub receipt: CancelReceipt,
    /// Message for the user
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Reserve a slot and create a `booked` ticket.
///
/// The payment order is created in the background; the ticket expires if
/// payment does not arrive within the payment window.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/tickets \
///   -H "x-user-id: user-42" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "site_id": "taj-mahal",
///     "visit_date": "2025-03-15",
///     "slot": { "start": "06:00", "end": "08:00" },
///     "visitors": [
///       { "name": "Asha Rao", "age": 34, "nationality": "IN" },
///       { "name": "Ravi Rao", "age": 15, "nationality": "IN" }
///     ],
///     "addons": [{ "name": "Audio guide", "price": 20000, "quantity": 1 }]
///   }'
/// ```
///
/// # Errors
///
/// 422 for invalid input, 409 when the window lacks capacity, 404 for an
/// unknown site.
#[tracing::instrument(skip(state, request), fields(user_id = %user_id))]
pub async fn create_ticket(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(request): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<Ticket>), ApiError> {
    let ticket = state
        .engine
        .reserve(ReserveRequest {
            user_id,
            site_id: request.site_id,
            visit_date: request.visit_date,
            slot: request.slot,
            visitors: request.visitors,
            addons: request.addons,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(ticket)))
}

/// List the caller's tickets, newest first.
///
/// # Example
///
/// ```bash
/// curl 'http://localhost:8080/api/tickets?status=confirmed&page=1&limit=20' \
///   -H "x-user-id: user-42"
/// ```
pub async fn list_tickets(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Query(query): Query<ListTicketsQuery>,
) -> Json<TicketPage> {
    let page = state
        .engine
        .list_user_tickets(
            &user_id,
            TicketQuery {
                status: query.status,
                page: query.page,
                limit: query.limit,
            },
        )
        .await;
    Json(page)
}

/// Ticket detail.
///
/// # Errors
///
/// 404 when the ticket does not exist or belongs to someone else.
pub async fn get_ticket(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(reference): Path<String>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = owned_ticket(&state, &user_id, &BookingReference::new(reference)).await?;
    Ok(Json(ticket))
}

/// Cancel a ticket.
///
/// Cancelling an already cancelled ticket returns the original outcome.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/tickets/TAJ-20250315-7QK2M9/cancel \
///   -H "x-user-id: user-42" \
///   -H "Content-Type: application/json" \
///   -d '{"reason": "change of plans"}'
/// ```
///
/// # Errors
///
/// 409 inside the minimum notice window or after check-in.
#[tracing::instrument(skip(state, request), fields(user_id = %user_id))]
pub async fn cancel_ticket(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(reference): Path<String>,
    Json(request): Json<CancelTicketRequest>,
) -> Result<Json<CancelTicketResponse>, ApiError> {
    let reference = BookingReference::new(reference);
    owned_ticket(&state, &user_id, &reference).await?;

    let receipt = state.engine.cancel(reference, request.reason).await?;
    let message = if receipt.refund.refund.is_zero() {
        "Ticket cancelled".to_string()
    } else {
        format!("Ticket cancelled; {} will be refunded", receipt.refund.refund)
    };

    Ok(Json(CancelTicketResponse { receipt, message }))
}

/// Admit a party at the gate.
///
/// # Errors
///
/// 409 unless the ticket is confirmed, paid and for today.
#[tracing::instrument(skip(state, request))]
pub async fn check_in_ticket(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Json(request): Json<CheckInRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state
        .engine
        .check_in(BookingReference::new(reference), request.staff_id, request.actual_visitors)
        .await?;
    Ok(Json(ticket))
}

/// Mark a checked-in visit as completed.
///
/// # Errors
///
/// 409 unless the ticket is checked in.
pub async fn complete_ticket(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state.engine.complete(BookingReference::new(reference)).await?;
    Ok(Json(ticket))
}

/// Rate a completed visit. One submission per ticket.
///
/// # Errors
///
/// 422 for a rating outside 1..=5, 409 before completion or on resubmission.
pub async fn submit_feedback(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(reference): Path<String>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let reference = BookingReference::new(reference);
    owned_ticket(&state, &user_id, &reference).await?;

    let ticket = state
        .engine
        .submit_feedback(reference, request.rating, request.review)
        .await?;
    Ok(Json(ticket))
}

async fn owned_ticket(state: &AppState, user_id: &UserId, reference: &BookingReference) -> Result<Ticket, ApiError> {
    let ticket = state.engine.get_ticket(reference).await?;
    if &ticket.user_id != user_id {
        // Indistinguishable from an unknown reference
        return Err(BookingError::ticket_not_found(reference).into());
    }
    Ok(ticket)
}
