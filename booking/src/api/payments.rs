//! Payment gateway callback endpoint.
//!
//! - POST /api/payments/callback - Apply a signed payment notification
//!
//! # Payment Flow
//!
//! 1. **Reserve**: the ticket is created `booked` and a gateway order is opened
//! 2. **Pay**: the visitor pays on the gateway's page
//! 3. **Callback**: the gateway (or the client relaying it) posts the signed
//!    order/payment pair here
//! 4. **Confirm**: a valid signature confirms the ticket; an invalid one marks
//!    the payment failed and the ticket stays `booked` until it expires
//!
//! Replaying a valid callback is a no-op that returns the confirmed ticket.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::server::state::AppState;
use crate::types::{BookingReference, OrderId, PaymentId, PaymentStatus, Ticket, TicketStatus};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Signed payment notification.
#[derive(Debug, Deserialize)]
pub struct PaymentCallbackRequest {
    /// Booking reference the order was opened for
    #[serde(alias = "ticketId")]
    pub reference: BookingReference,
    /// Gateway order id
    #[serde(alias = "orderId")]
    pub order_id: OrderId,
    /// Gateway payment id
    #[serde(alias = "paymentId")]
    pub payment_id: PaymentId,
    /// Hex HMAC-SHA256 of `order_id|payment_id`
    pub signature: String,
}

/// Response after applying a callback.
#[derive(Debug, Serialize)]
pub struct PaymentCallbackResponse {
    /// Booking reference
    pub reference: BookingReference,
    /// Ticket status after the callback
    pub status: TicketStatus,
    /// Payment status after the callback
    pub payment_status: PaymentStatus,
    /// Message for the user
    pub message: String,
}

impl From<Ticket> for PaymentCallbackResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            reference: ticket.reference,
            status: ticket.status,
            payment_status: ticket.payment.status,
            message: "Payment verified successfully".to_string(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Apply a payment callback.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/payments/callback \
///   -H "Content-Type: application/json" \
///   -d '{
///     "reference": "TAJ-20250315-7QK2M9",
///     "order_id": "order_8f2c",
///     "payment_id": "pay_19ab",
///     "signature": "5d41402abc4b2a76b9719d911017c592..."
///   }'
/// ```
///
/// # Errors
///
/// 400 when the signature or order does not match, 409 when the ticket can
/// no longer be paid, 404 for an unknown reference.
#[tracing::instrument(skip(state, request), fields(reference = %request.reference))]
pub async fn payment_callback(
    State(state): State<AppState>,
    Json(request): Json<PaymentCallbackRequest>,
) -> Result<Json<PaymentCallbackResponse>, ApiError> {
    let ticket = state
        .engine
        .confirm_payment(request.reference, request.order_id, request.payment_id, request.signature)
        .await?;

    Ok(Json(ticket.into()))
}
