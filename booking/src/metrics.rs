//! Business metrics for the booking engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `booking_reservations_total{outcome}` - reservation attempts (accepted, `capacity_exceeded`)
//! - `booking_visitors_reserved_total` - visitors on accepted reservations
//! - `booking_payments_total{status}` - payment callbacks (completed, failed)
//! - `booking_revenue_cents_total` - captured revenue in minor units
//! - `booking_refunds_cents_total` - refunds owed in minor units
//! - `booking_cancellations_total`, `booking_check_ins_total`,
//!   `booking_expirations_total`, `booking_completions_total`
//! - `booking_side_effect_failures_total{kind}` - work parked in the dead letter queue
//!
//! ## Gauges
//! - `booking_tickets_loaded` - tickets restored into the ledger at startup
//!
//! ## Histograms
//! - `booking_catalog_lookup_duration_seconds` - catalog lookups through the breaker

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register descriptions for every business metric.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_business_metrics() {
    // Reservations
    describe_counter!(
        "booking_reservations_total",
        "Reservation attempts by outcome (accepted, capacity_exceeded)"
    );
    describe_counter!(
        "booking_visitors_reserved_total",
        "Visitors covered by accepted reservations"
    );

    // Payments
    describe_counter!(
        "booking_payments_total",
        "Payment callbacks by status (completed, failed)"
    );
    describe_counter!(
        "booking_revenue_cents_total",
        "Revenue from completed payments in minor units"
    );
    describe_counter!("booking_refunds_cents_total", "Refunds owed on cancellation in minor units");

    // Lifecycle
    describe_counter!("booking_cancellations_total", "Tickets cancelled");
    describe_counter!("booking_check_ins_total", "Parties admitted at the gate");
    describe_counter!("booking_expirations_total", "Unpaid reservations released");
    describe_counter!("booking_completions_total", "Visits completed");
    describe_gauge!("booking_tickets_loaded", "Tickets restored into the ledger at startup");

    // Collaborators
    describe_counter!(
        "booking_side_effect_failures_total",
        "Side effects that exhausted their retries, by kind"
    );
    describe_histogram!(
        "booking_catalog_lookup_duration_seconds",
        "Catalog lookups through the circuit breaker"
    );

    tracing::info!("Business metrics registered");
}
