//! In-memory ticket repository for development and tests.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{RepoFuture, TicketRepository};
use crate::types::{BookingReference, SlotKey, Ticket, TicketStatus};

/// `HashMap` behind an async lock. Clones share the map.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketRepository {
    tickets: Arc<RwLock<HashMap<BookingReference, Ticket>>>,
}

impl InMemoryTicketRepository {
    /// Empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored record count
    pub async fn len(&self) -> usize {
        self.tickets.read().await.len()
    }

    /// No records
    pub async fn is_empty(&self) -> bool {
        self.tickets.read().await.is_empty()
    }
}

impl TicketRepository for InMemoryTicketRepository {
    fn save(&self, ticket: Ticket) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let mut tickets = self.tickets.write().await;
            // Effects may finish out of order; never overwrite a newer version
            let stale = tickets
                .get(&ticket.reference)
                .is_some_and(|existing| existing.version > ticket.version);
            if !stale {
                tickets.insert(ticket.reference.clone(), ticket);
            }
            Ok(())
        })
    }

    fn find(&self, reference: &BookingReference) -> RepoFuture<'_, Option<Ticket>> {
        let reference = reference.clone();
        Box::pin(async move { Ok(self.tickets.read().await.get(&reference).cloned()) })
    }

    fn load_all(&self) -> RepoFuture<'_, Vec<Ticket>> {
        Box::pin(async move { Ok(self.tickets.read().await.values().cloned().collect()) })
    }

    fn by_slot(&self, key: &SlotKey, statuses: &[TicketStatus]) -> RepoFuture<'_, Vec<Ticket>> {
        let key = key.clone();
        let statuses = statuses.to_vec();
        Box::pin(async move {
            Ok(self
                .tickets
                .read()
                .await
                .values()
                .filter(|t| t.slot_key() == key && statuses.contains(&t.status))
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ledger::tests::ticket;

    #[tokio::test]
    async fn save_replaces_by_reference() {
        let repository = InMemoryTicketRepository::new();
        let mut record = ticket("A", "u1", 2);
        repository.save(record.clone()).await.unwrap();

        record.status = TicketStatus::Cancelled;
        repository.save(record.clone()).await.unwrap();

        assert_eq!(repository.len().await, 1);
        let found = repository.find(&record.reference).await.unwrap().unwrap();
        assert_eq!(found.status, TicketStatus::Cancelled);
    }

    #[tokio::test]
    async fn older_write_does_not_overwrite_newer() {
        let repository = InMemoryTicketRepository::new();
        let older = ticket("A", "u1", 1);
        let mut newer = older.clone();
        newer.status = TicketStatus::Confirmed;
        newer.version = older.version + 1;

        repository.save(newer).await.unwrap();
        repository.save(older.clone()).await.unwrap();

        let found = repository.find(&older.reference).await.unwrap().unwrap();
        assert_eq!(found.status, TicketStatus::Confirmed);
    }

    #[tokio::test]
    async fn same_instant_writes_keep_the_later_version() {
        let mut ledger = crate::ledger::LedgerState::new();
        let reserved = ticket("A", "u1", 1);
        ledger.admit(reserved.clone(), 10).unwrap();
        let with_order = ledger
            .update(&reserved.reference, |t| {
                t.payment.order_id = Some(crate::types::OrderId::from("order_1"));
            })
            .unwrap()
            .clone();
        assert_eq!(with_order.updated_at, reserved.updated_at);

        let repository = InMemoryTicketRepository::new();
        repository.save(with_order).await.unwrap();
        repository.save(reserved.clone()).await.unwrap();

        let found = repository.find(&reserved.reference).await.unwrap().unwrap();
        assert_eq!(found.version, 1);
        assert!(found.payment.order_id.is_some());
    }

    #[tokio::test]
    async fn slot_query_filters_status() {
        let repository = InMemoryTicketRepository::new();
        let mut cancelled = ticket("B", "u1", 1);
        cancelled.status = TicketStatus::Cancelled;
        repository.save(ticket("A", "u1", 1)).await.unwrap();
        repository.save(cancelled).await.unwrap();

        let key = ticket("X", "u1", 1).slot_key();
        let active = repository.by_slot(&key, &TicketStatus::ACTIVE).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(repository.load_all().await.unwrap().len(), 2);
    }
}
