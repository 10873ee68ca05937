//! Reservation ledger: the authoritative store of tickets.
//!
//! The ledger owns committed occupancy per (site, date, slot). [`LedgerState::admit`]
//! is the only code path that increases it, and it checks capacity and inserts
//! in one step. Occupancy only decreases when [`LedgerState::update`] moves a
//! ticket out of an active status, so the counters always equal the sum of
//! active visitor counts.
//!
//! The ledger lives inside the booking store, whose write lock serializes
//! every reserve and release.

use std::collections::HashMap;

use thiserror::Error;

use crate::availability::CommittedOccupancy;
use crate::types::{BookingReference, SlotKey, Ticket, TicketStatus, UserId};

/// Outcome of an admission attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReservationResult {
    /// Committed; `available` is what remains afterwards
    Accepted {
        /// Occupancy after the admission
        committed: u32,
        /// Remaining places after the admission
        available: u32,
    },
    /// Not enough room; nothing was changed
    CapacityExceeded {
        /// Visitors requested
        requested: u32,
        /// Places free at the instant of the check
        available: u32,
    },
}

/// Ledger integrity errors
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Reference already present
    #[error("booking reference {0} already exists")]
    DuplicateReference(BookingReference),
    /// Reference not present
    #[error("ticket {0} not found")]
    UnknownTicket(BookingReference),
    /// Only active tickets can be admitted
    #[error("ticket {0} must be active to be admitted")]
    InactiveAdmission(BookingReference),
    /// Terminal tickets never hold capacity again
    #[error("ticket {0} cannot return to an active status")]
    Reactivation(BookingReference),
    /// Slot, site, party size and reference are fixed at admission
    #[error("ticket {0} cannot change slot, party size or reference")]
    ImmutableField(BookingReference),
}

/// A slot whose maintained counter disagrees with its tickets
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OccupancyMismatch {
    /// Slot
    pub key: SlotKey,
    /// Maintained counter
    pub counted: u32,
    /// Sum over active tickets
    pub derived: u32,
}

/// Ticket records plus indexes and occupancy counters
#[derive(Clone, Debug, Default)]
pub struct LedgerState {
    tickets: HashMap<BookingReference, Ticket>,
    by_slot: HashMap<SlotKey, Vec<BookingReference>>,
    by_user: HashMap<UserId, Vec<BookingReference>>,
    occupancy: HashMap<SlotKey, u32>,
}

impl LedgerState {
    /// Empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check capacity and commit the ticket atomically.
    ///
    /// # Errors
    ///
    /// [`LedgerError::DuplicateReference`] if the reference is taken,
    /// [`LedgerError::InactiveAdmission`] for a ticket not in an active status.
    pub fn admit(&mut self, ticket: Ticket, capacity: u32) -> Result<ReservationResult, LedgerError> {
        if self.tickets.contains_key(&ticket.reference) {
            return Err(LedgerError::DuplicateReference(ticket.reference));
        }
        if !ticket.is_active() {
            return Err(LedgerError::InactiveAdmission(ticket.reference));
        }

        let key = ticket.slot_key();
        let requested = ticket.visitor_count();
        let committed = self.committed(&key);
        let available = capacity.saturating_sub(committed);

        // CRITICAL: the check and the increment below happen under the same
        // &mut borrow; no other admission can interleave.
        if requested > available {
            return Ok(ReservationResult::CapacityExceeded { requested, available });
        }

        let committed = committed + requested;
        self.occupancy.insert(key, committed);
        self.index(&ticket);
        self.tickets.insert(ticket.reference.clone(), ticket);

        Ok(ReservationResult::Accepted {
            committed,
            available: available - requested,
        })
    }

    /// Re-insert a previously committed ticket (startup hydration).
    ///
    /// Capacity is not re-checked; the record was admitted when it was created.
    ///
    /// # Errors
    ///
    /// [`LedgerError::DuplicateReference`] if the reference is already loaded.
    pub fn restore(&mut self, ticket: Ticket) -> Result<(), LedgerError> {
        if self.tickets.contains_key(&ticket.reference) {
            return Err(LedgerError::DuplicateReference(ticket.reference));
        }
        if ticket.is_active() {
            let counter = self.occupancy.entry(ticket.slot_key()).or_insert(0);
            *counter = counter.saturating_add(ticket.visitor_count());
        }
        self.index(&ticket);
        self.tickets.insert(ticket.reference.clone(), ticket);
        Ok(())
    }

    /// Apply a mutation to one ticket, releasing capacity if it leaves an active status.
    ///
    /// Every accepted mutation bumps [`Ticket::version`].
    ///
    /// The mutation runs on a copy and is committed only if it passes the
    /// integrity checks, so a rejected update leaves the ledger untouched.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownTicket`], [`LedgerError::ImmutableField`] or
    /// [`LedgerError::Reactivation`].
    pub fn update<F>(&mut self, reference: &BookingReference, mutate: F) -> Result<&Ticket, LedgerError>
    where
        F: FnOnce(&mut Ticket),
    {
        let current = self
            .tickets
            .get(reference)
            .ok_or_else(|| LedgerError::UnknownTicket(reference.clone()))?;

        let mut next = current.clone();
        mutate(&mut next);
        next.version = current.version + 1;

        if next.reference != current.reference
            || next.slot_key() != current.slot_key()
            || next.visitor_count() != current.visitor_count()
            || next.user_id != current.user_id
        {
            return Err(LedgerError::ImmutableField(reference.clone()));
        }

        match (current.is_active(), next.is_active()) {
            (false, true) => return Err(LedgerError::Reactivation(reference.clone())),
            (true, false) => self.release(&next.slot_key(), next.visitor_count()),
            _ => {},
        }

        let slot = self
            .tickets
            .get_mut(reference)
            .ok_or_else(|| LedgerError::UnknownTicket(reference.clone()))?;
        *slot = next;
        Ok(slot)
    }

    fn release(&mut self, key: &SlotKey, visitors: u32) {
        if let Some(counter) = self.occupancy.get_mut(key) {
            *counter = counter.saturating_sub(visitors);
            if *counter == 0 {
                self.occupancy.remove(key);
            }
        }
    }

    fn index(&mut self, ticket: &Ticket) {
        self.by_slot
            .entry(ticket.slot_key())
            .or_default()
            .push(ticket.reference.clone());
        self.by_user
            .entry(ticket.user_id.clone())
            .or_default()
            .push(ticket.reference.clone());
    }

    /// Ticket by reference
    #[must_use]
    pub fn get(&self, reference: &BookingReference) -> Option<&Ticket> {
        self.tickets.get(reference)
    }

    /// Is the reference taken?
    #[must_use]
    pub fn contains(&self, reference: &BookingReference) -> bool {
        self.tickets.contains_key(reference)
    }

    /// Number of tickets ever admitted or restored
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// No tickets at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Every ticket, unordered
    pub fn tickets(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    /// Tickets on a slot whose status is in `statuses`
    pub fn tickets_for_slot<'a>(
        &'a self,
        key: &SlotKey,
        statuses: &'a [TicketStatus],
    ) -> impl Iterator<Item = &'a Ticket> + 'a {
        self.by_slot
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|reference| self.tickets.get(reference))
            .filter(move |ticket| statuses.contains(&ticket.status))
    }

    /// A user's tickets, newest first
    #[must_use]
    pub fn tickets_for_user(&self, user_id: &UserId) -> Vec<&Ticket> {
        let mut tickets: Vec<&Ticket> = self
            .by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|reference| self.tickets.get(reference))
            .collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.reference.cmp(&b.reference)));
        tickets
    }

    /// Compare every maintained counter with the sum over active tickets
    #[must_use]
    pub fn audit_occupancy(&self) -> Vec<OccupancyMismatch> {
        let mut keys: Vec<&SlotKey> = self.by_slot.keys().chain(self.occupancy.keys()).collect();
        keys.sort();
        keys.dedup();

        keys.into_iter()
            .filter_map(|key| {
                let counted = self.committed(key);
                let expected: u32 = self
                    .tickets_for_slot(key, &TicketStatus::ACTIVE)
                    .map(Ticket::visitor_count)
                    .sum();
                (counted != expected).then(|| OccupancyMismatch {
                    key: key.clone(),
                    counted,
                    derived: expected,
                })
            })
            .collect()
    }
}

impl CommittedOccupancy for LedgerState {
    fn committed(&self, key: &SlotKey) -> u32 {
        self.occupancy.get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::pricing::PricingPolicy;
    use crate::types::{Money, Payment, SiteId, TicketId, TimeSlot, Visitor, parse_time};
    use chrono::{NaiveDate, TimeZone, Utc};

    pub(crate) fn slot() -> TimeSlot {
        TimeSlot::new(parse_time("10:00").unwrap(), parse_time("12:00").unwrap())
    }

    pub(crate) fn ticket(reference: &str, user: &str, visitors: usize) -> Ticket {
        let people: Vec<Visitor> = (0..visitors).map(|i| Visitor::new(format!("Guest {i}"), 30, "Indian")).collect();
        let pricing = PricingPolicy::default().quote(Money::from_minor(5_000), &people, &[]).unwrap();
        let created_at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        Ticket {
            id: TicketId::new(),
            reference: BookingReference::from(reference),
            user_id: UserId::from(user),
            site_id: SiteId::from("red-fort"),
            visitors: people,
            visit_date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
            slot: slot(),
            visit_starts_at: Utc.with_ymd_and_hms(2025, 3, 15, 10, 0, 0).unwrap(),
            visit_ends_at: Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap(),
            utc_offset_minutes: 0,
            payment: Payment::pending(pricing.total, "INR"),
            pricing,
            status: TicketStatus::Booked,
            cancellation: None,
            check_in: None,
            feedback: None,
            verification_payload: String::new(),
            created_at,
            updated_at: created_at,
            version: 0,
        }
    }

    #[test]
    fn admit_commits_until_capacity() {
        let mut ledger = LedgerState::new();
        let key = ticket("A", "u1", 1).slot_key();

        assert_eq!(
            ledger.admit(ticket("A", "u1", 3), 5).unwrap(),
            ReservationResult::Accepted { committed: 3, available: 2 }
        );
        assert_eq!(
            ledger.admit(ticket("B", "u2", 3), 5).unwrap(),
            ReservationResult::CapacityExceeded { requested: 3, available: 2 }
        );
        assert_eq!(
            ledger.admit(ticket("C", "u2", 2), 5).unwrap(),
            ReservationResult::Accepted { committed: 5, available: 0 }
        );

        assert_eq!(ledger.committed(&key), 5);
        assert!(!ledger.contains(&BookingReference::from("B")));
        assert!(ledger.audit_occupancy().is_empty());
    }

    #[test]
    fn duplicate_reference_is_rejected() {
        let mut ledger = LedgerState::new();
        ledger.admit(ticket("A", "u1", 1), 5).unwrap();
        assert_eq!(
            ledger.admit(ticket("A", "u2", 1), 5),
            Err(LedgerError::DuplicateReference(BookingReference::from("A")))
        );
    }

    #[test]
    fn leaving_active_status_releases_capacity_once() {
        let mut ledger = LedgerState::new();
        let reference = BookingReference::from("A");
        ledger.admit(ticket("A", "u1", 4), 5).unwrap();
        let key = ledger.get(&reference).unwrap().slot_key();

        ledger.update(&reference, |t| t.status = TicketStatus::Cancelled).unwrap();
        assert_eq!(ledger.committed(&key), 0);

        // Touching a terminal ticket again does not release twice
        ledger.update(&reference, |t| t.cancellation = None).unwrap();
        assert_eq!(ledger.committed(&key), 0);
        assert!(ledger.audit_occupancy().is_empty());
    }

    #[test]
    fn terminal_tickets_cannot_reactivate() {
        let mut ledger = LedgerState::new();
        let reference = BookingReference::from("A");
        ledger.admit(ticket("A", "u1", 1), 5).unwrap();
        ledger.update(&reference, |t| t.status = TicketStatus::Expired).unwrap();

        assert_eq!(
            ledger.update(&reference, |t| t.status = TicketStatus::Booked).map(|_| ()),
            Err(LedgerError::Reactivation(reference.clone()))
        );
        assert_eq!(ledger.get(&reference).unwrap().status, TicketStatus::Expired);
    }

    #[test]
    fn party_size_is_immutable() {
        let mut ledger = LedgerState::new();
        let reference = BookingReference::from("A");
        ledger.admit(ticket("A", "u1", 2), 5).unwrap();

        let result = ledger.update(&reference, |t| {
            t.visitors.pop();
        });
        assert_eq!(result.map(|_| ()), Err(LedgerError::ImmutableField(reference.clone())));
        assert_eq!(ledger.get(&reference).unwrap().visitor_count(), 2);
    }

    #[test]
    fn slot_query_filters_by_status() {
        let mut ledger = LedgerState::new();
        ledger.admit(ticket("A", "u1", 1), 10).unwrap();
        ledger.admit(ticket("B", "u1", 1), 10).unwrap();
        ledger
            .update(&BookingReference::from("B"), |t| t.status = TicketStatus::Cancelled)
            .unwrap();

        let key = ticket("X", "u1", 1).slot_key();
        let active: Vec<_> = ledger
            .tickets_for_slot(&key, &TicketStatus::ACTIVE)
            .map(|t| t.reference.as_str().to_string())
            .collect();
        assert_eq!(active, vec!["A"]);
        assert_eq!(ledger.tickets_for_slot(&key, &[TicketStatus::Cancelled]).count(), 1);
    }

    #[test]
    fn updates_bump_version() {
        let mut ledger = LedgerState::new();
        let reference = BookingReference::from("A");
        ledger.admit(ticket("A", "u1", 1), 5).unwrap();
        assert_eq!(ledger.get(&reference).unwrap().version, 0);

        ledger.update(&reference, |t| t.status = TicketStatus::Confirmed).unwrap();
        let bumped = ledger.update(&reference, |t| t.status = TicketStatus::CheckedIn).unwrap();
        assert_eq!(bumped.version, 2);

        // A rejected mutation leaves the version alone
        let _ = ledger.update(&reference, |t| {
            t.visitors.clear();
        });
        assert_eq!(ledger.get(&reference).unwrap().version, 2);
    }

    #[test]
    fn audit_reports_counter_drift() {
        let mut ledger = LedgerState::new();
        ledger.admit(ticket("A", "u1", 2), 5).unwrap();
        let key = ticket("X", "u1", 1).slot_key();
        ledger.occupancy.insert(key.clone(), 4);

        assert_eq!(
            ledger.audit_occupancy(),
            vec![OccupancyMismatch {
                key,
                counted: 4,
                derived: 2,
            }]
        );
    }

    #[test]
    fn restore_rebuilds_counters() {
        let mut ledger = LedgerState::new();
        let mut cancelled = ticket("B", "u1", 2);
        cancelled.status = TicketStatus::Cancelled;

        ledger.restore(ticket("A", "u1", 3)).unwrap();
        ledger.restore(cancelled).unwrap();

        assert_eq!(ledger.committed(&ticket("X", "u1", 1).slot_key()), 3);
        assert_eq!(ledger.tickets_for_user(&UserId::from("u1")).len(), 2);
        assert!(ledger.audit_occupancy().is_empty());
    }

    #[test]
    fn counters_match_slice_derivation() {
        let mut ledger = LedgerState::new();
        for (i, size) in [1usize, 2, 3, 4].into_iter().enumerate() {
            ledger.admit(ticket(&format!("T{i}"), "u", size), 8).unwrap();
        }
        let snapshot: Vec<Ticket> = ledger.tickets().cloned().collect();
        let key = ticket("X", "u", 1).slot_key();
        assert_eq!(ledger.committed(&key), snapshot.as_slice().committed(&key));
    }
}
