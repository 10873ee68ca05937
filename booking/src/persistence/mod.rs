//! Ticket persistence.
//!
//! The ledger is the authority while the process runs. Repository writes
//! happen as effects after a transition commits, and the ledger is rebuilt
//! from [`TicketRepository::load_all`] at startup.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BookingReference, SlotKey, Ticket, TicketStatus};

mod memory;
mod postgres;

pub use memory::InMemoryTicketRepository;
pub use postgres::PostgresTicketRepository;

/// Boxed repository future
pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Repository failures
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// Database error
    #[error("storage error: {0}")]
    Storage(String),
    /// Stored record could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable ticket storage
pub trait TicketRepository: Send + Sync {
    /// Insert or replace a ticket
    fn save(&self, ticket: Ticket) -> RepoFuture<'_, ()>;

    /// Ticket by reference
    fn find(&self, reference: &BookingReference) -> RepoFuture<'_, Option<Ticket>>;

    /// Every stored ticket
    fn load_all(&self) -> RepoFuture<'_, Vec<Ticket>>;

    /// Tickets on a slot whose status is in `statuses`
    fn by_slot(&self, key: &SlotKey, statuses: &[TicketStatus]) -> RepoFuture<'_, Vec<Ticket>>;
}

/// Which repository the engine runs against, chosen at construction time
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistenceBackend {
    /// Process memory only
    #[default]
    InMemory,
    /// `PostgreSQL` with the bundled migrations
    Postgres {
        /// Connection URL
        url: String,
        /// Pool size
        max_connections: u32,
    },
}

impl PersistenceBackend {
    /// Short label for logs and health output
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::Postgres { .. } => "postgres",
        }
    }

    /// Open the repository, running migrations for Postgres.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] if the database is unreachable or migrations fail.
    pub async fn connect(&self) -> Result<Arc<dyn TicketRepository>, RepositoryError> {
        match self {
            Self::InMemory => Ok(Arc::new(InMemoryTicketRepository::new())),
            Self::Postgres { url, max_connections } => {
                let repository = PostgresTicketRepository::connect(url, *max_connections).await?;
                repository.migrate().await?;
                Ok(Arc::new(repository))
            },
        }
    }
}
