//! Router configuration for the booking server.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use super::health::{health_check, metrics};
use super::state::AppState;
use crate::api::{availability, payments, reservations, verification};

/// Build the complete Axum router.
///
/// Health and metrics live at the root; everything else is under `/api`.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Availability (read side)
        .route("/sites/:site_id/slots", get(availability::list_slots))
        // Ticket lifecycle
        .route(
            "/tickets",
            post(reservations::create_ticket).get(reservations::list_tickets),
        )
        .route("/tickets/:reference", get(reservations::get_ticket))
        .route("/tickets/:reference/cancel", post(reservations::cancel_ticket))
        .route("/tickets/:reference/check-in", post(reservations::check_in_ticket))
        .route("/tickets/:reference/complete", post(reservations::complete_ticket))
        .route("/tickets/:reference/feedback", post(reservations::submit_feedback))
        // Payments
        .route("/payments/callback", post(payments::payment_callback))
        // Gate scans
        .route("/verify", post(verification::verify_payload));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
