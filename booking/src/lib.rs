//! Visit booking and capacity management engine.
//!
//! Visitors reserve a time slot at a heritage site, pay for it, and are
//! admitted at the gate. The engine guarantees that a slot is never
//! oversold, prices each party deterministically, and moves every ticket
//! through a strict lifecycle.
//!
//! # Architecture
//!
//! ```text
//!  HTTP (axum)          Sweeper
//!      │                   │
//!      └──────┬────────────┘
//!             ▼
//!      ┌──────────────┐   catalog lookup   ┌──────────────┐
//!      │BookingEngine │ ─────────────────▶ │GuardedCatalog│
//!      └──────────────┘  (circuit breaker) └──────────────┘
//!             │ send
//!             ▼
//!      ┌──────────────┐   effects   ┌──────────────────────────────┐
//!      │ Store        │ ──────────▶ │ repository · payments ·      │
//!      │ TicketReducer│ ◀────────── │ notifier (retry, dead letter) │
//!      └──────────────┘   actions   └──────────────────────────────┘
//!             │
//!             ▼
//!      ┌──────────────┐
//!      │ LedgerState  │  tickets + per-slot committed occupancy
//!      └──────────────┘
//! ```
//!
//! ## Capacity
//!
//! Every command runs the reducer under the store's write lock, so the
//! capacity check and the occupancy increment for a slot are one atomic step:
//!
//! ```text
//! if committed + party > capacity {
//!     return CapacityExceeded   // one wins, the rest fail cleanly
//! }
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! booked ──pay──▶ confirmed ──check-in──▶ checked_in ──▶ completed
//!   │                 │
//!   └─expire          └─cancel
//! ```
//!
//! Persistence, payment orders, refunds and notifications run as effects
//! after the state change commits; failures are retried and then parked in
//! a dead letter queue.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod api;
pub mod app;
pub mod availability;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod notification;
pub mod payment_gateway;
pub mod persistence;
pub mod policy;
pub mod pricing;
pub mod reference;
pub mod server;
pub mod types;

pub use aggregates::{BookingState, CommandOutcome, TicketAction, TicketEnvironment, TicketReducer};
pub use app::{BookingApp, BookingEngine, ReserveRequest};
pub use config::Config;
pub use error::{BookingError, BookingResult};
pub use types::*;
