//! HTTP API handlers, organized by resource:
//! - Availability: bookable windows per site and date
//! - Reservations: the ticket lifecycle
//! - Payments: gateway callbacks
//! - Verification: gate scans

pub mod availability;
pub mod caller;
pub mod error;
pub mod payments;
pub mod reservations;
pub mod verification;

pub use availability::list_slots;
pub use caller::{CallerId, USER_ID_HEADER};
pub use error::ApiError;
pub use payments::payment_callback;
pub use reservations::{
    cancel_ticket, check_in_ticket, complete_ticket, create_ticket, get_ticket, list_tickets, submit_feedback,
};
pub use verification::verify_payload;
