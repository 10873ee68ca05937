//! HTTP server module for the booking engine:
//! - Application state
//! - Health and metrics endpoints
//! - Router configuration

pub mod health;
pub mod routes;
pub mod state;

pub use health::health_check;
pub use routes::build_router;
pub use state::AppState;
