//! PostgreSQL-backed ticket repository using JSONB.
//!
//! Stores the full `Ticket` as JSONB next to the columns the slot query and
//! user listing filter on.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use super::{RepoFuture, RepositoryError, TicketRepository};
use crate::types::{BookingReference, SlotKey, Ticket, TicketStatus};

/// Ticket repository over a `PgPool`
#[derive(Clone, Debug)]
pub struct PostgresTicketRepository {
    pool: Arc<PgPool>,
}

impl PostgresTicketRepository {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Open a pool.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if the connection fails.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Failed to connect: {e}")))?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Create the `tickets` table and indexes.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if migration fails.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| RepositoryError::Storage(format!("Migration failed: {e}")))
    }

    fn decode(rows: Vec<(sqlx::types::JsonValue,)>) -> Result<Vec<Ticket>, RepositoryError> {
        rows.into_iter()
            .map(|(json,)| serde_json::from_value(json))
            .collect::<Result<Vec<Ticket>, _>>()
            .map_err(|e| RepositoryError::Serialization(format!("Failed to deserialize tickets: {e}")))
    }
}

impl TicketRepository for PostgresTicketRepository {
    fn save(&self, ticket: Ticket) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let json = serde_json::to_value(&ticket)
                .map_err(|e| RepositoryError::Serialization(format!("Failed to serialize ticket: {e}")))?;

            sqlx::query(
                "INSERT INTO tickets
                     (reference, ticket_id, user_id, site_id, visit_date, slot_start, slot_end,
                      status, data, created_at, updated_at, version)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                 ON CONFLICT (reference) DO UPDATE
                 SET status = EXCLUDED.status,
                     data = EXCLUDED.data,
                     updated_at = EXCLUDED.updated_at,
                     version = EXCLUDED.version
                 WHERE tickets.version <= EXCLUDED.version",
            )
            .bind(ticket.reference.as_str())
            .bind(ticket.id.as_uuid())
            .bind(ticket.user_id.as_str())
            .bind(ticket.site_id.as_str())
            .bind(ticket.visit_date)
            .bind(ticket.slot.start)
            .bind(ticket.slot.end)
            .bind(ticket.status.as_str())
            .bind(&json)
            .bind(ticket.created_at)
            .bind(ticket.updated_at)
            .bind(i64::try_from(ticket.version).unwrap_or(i64::MAX))
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| RepositoryError::Storage(format!("Failed to save ticket: {e}")))?;

            Ok(())
        })
    }

    fn find(&self, reference: &BookingReference) -> RepoFuture<'_, Option<Ticket>> {
        let reference = reference.clone();
        Box::pin(async move {
            let row: Option<(sqlx::types::JsonValue,)> =
                sqlx::query_as("SELECT data FROM tickets WHERE reference = $1")
                    .bind(reference.as_str())
                    .fetch_optional(self.pool.as_ref())
                    .await
                    .map_err(|e| RepositoryError::Storage(format!("Failed to query ticket: {e}")))?;

            Ok(Self::decode(row.into_iter().collect())?.pop())
        })
    }

    fn load_all(&self) -> RepoFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows: Vec<(sqlx::types::JsonValue,)> =
                sqlx::query_as("SELECT data FROM tickets ORDER BY created_at")
                    .fetch_all(self.pool.as_ref())
                    .await
                    .map_err(|e| RepositoryError::Storage(format!("Failed to load tickets: {e}")))?;
            Self::decode(rows)
        })
    }

    fn by_slot(&self, key: &SlotKey, statuses: &[TicketStatus]) -> RepoFuture<'_, Vec<Ticket>> {
        let key = key.clone();
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        Box::pin(async move {
            let rows: Vec<(sqlx::types::JsonValue,)> = sqlx::query_as(
                "SELECT data FROM tickets
                 WHERE site_id = $1 AND visit_date = $2 AND slot_start = $3
                   AND status = ANY($4)
                 ORDER BY created_at",
            )
            .bind(key.site_id.as_str())
            .bind(key.date)
            .bind(key.slot.start)
            .bind(&statuses)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(|e| RepositoryError::Storage(format!("Failed to query slot: {e}")))?;
            Self::decode(rows)
        })
    }
}
