//! Aggregate reducers.
//!
//! - Ticket: reservation, payment, check-in, cancellation and housekeeping
//!   over the shared capacity ledger

pub mod ticket;

pub use ticket::{
    BookingState, CommandOutcome, FailedSideEffect, SweepReport, TicketAction, TicketEnvironment,
    TicketReducer,
};
