//! Application layer: the engine facade, its wiring from configuration and
//! the housekeeping sweeper.

mod coordinator;
pub mod engine;
mod sweeper;

pub use coordinator::{AppError, BookingApp, Collaborators};
pub use engine::{
    BookingEngine, CancelReceipt, GateScan, ReserveRequest, SharedEngine, TicketPage, TicketQuery, TicketStore,
};
pub use sweeper::spawn_sweeper;
