//! Booking engine facade.
//!
//! Owns the store that serializes every command through [`TicketReducer`],
//! plus the catalog lookups that must succeed before a reservation is
//! attempted. Request handlers and the sweeper only talk to this type.

use std::sync::Arc;
use std::time::Duration;

use booking_runtime::{DeadLetter, DeadLetterQueue, Store};
use chrono::NaiveDate;
use serde::Serialize;

use crate::aggregates::{
    BookingState, CommandOutcome, FailedSideEffect, SweepReport, TicketAction, TicketEnvironment,
    TicketReducer,
};
use crate::availability::{SlotAvailability, available_slots};
use crate::catalog::GuardedCatalog;
use crate::error::{BookingError, BookingResult};
use crate::ledger::LedgerState;
use crate::policy::RefundBreakdown;
use crate::reference::{Integrity, PayloadError, VerificationClaims, new_reference};
use crate::types::{
    AddonItem, BookingReference, OrderId, PaymentId, SiteId, StaffId, Ticket, TicketStatus, TimeSlot,
    UserId, Visitor,
};

/// Store running the ticket reducer
pub type TicketStore = Store<BookingState, TicketAction, TicketEnvironment, TicketReducer>;

/// Attempts at drawing an unused booking reference
pub const DEFAULT_REFERENCE_ATTEMPTS: usize = 5;
/// Page size when none is requested
pub const DEFAULT_PAGE_LIMIT: usize = 10;
/// Largest page size served
pub const MAX_PAGE_LIMIT: usize = 100;

/// A booking request
#[derive(Clone, Debug)]
pub struct ReserveRequest {
    /// Booking user
    pub user_id: UserId,
    /// Site to visit
    pub site_id: SiteId,
    /// Site-local visit date
    pub visit_date: NaiveDate,
    /// Requested window
    pub slot: TimeSlot,
    /// Party
    pub visitors: Vec<Visitor>,
    /// Extras
    pub addons: Vec<AddonItem>,
}

/// Result of a cancellation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CancelReceipt {
    /// Ticket after cancellation
    pub ticket: Ticket,
    /// Refund owed
    pub refund: RefundBreakdown,
    /// The ticket was already cancelled
    pub replayed: bool,
}

/// Filter and paging for a user's tickets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TicketQuery {
    /// Only tickets in this status
    pub status: Option<TicketStatus>,
    /// One-based page number
    pub page: Option<usize>,
    /// Page size
    pub limit: Option<usize>,
}

/// One page of a user's tickets
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TicketPage {
    /// Tickets on this page, newest first
    pub tickets: Vec<Ticket>,
    /// One-based page number
    pub page: usize,
    /// Page size used
    pub limit: usize,
    /// Matching tickets across all pages
    pub total: usize,
    /// Number of pages
    pub total_pages: usize,
}

/// Result of scanning a verification payload at the gate
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GateScan {
    /// Claims decoded from the payload
    pub claims: VerificationClaims,
    /// Whether the claims were signed
    pub integrity: Integrity,
    /// Status of the ticket in the ledger
    pub current_status: TicketStatus,
    /// The payload matches the ledger and the ticket can be admitted today
    pub admissible: bool,
    /// Why the ticket cannot be admitted
    pub reason: Option<String>,
}

/// The booking engine
#[derive(Clone)]
pub struct BookingEngine {
    store: TicketStore,
    catalog: GuardedCatalog,
    reference_attempts: usize,
}

impl BookingEngine {
    /// Build an engine over an already populated ledger
    #[must_use]
    pub fn new(ledger: LedgerState, environment: TicketEnvironment, catalog: GuardedCatalog) -> Self {
        Self {
            store: Store::new(BookingState::new(ledger), TicketReducer::new(), environment),
            catalog,
            reference_attempts: DEFAULT_REFERENCE_ATTEMPTS,
        }
    }

    /// Rebuild the ledger from the repository, then build the engine.
    ///
    /// Records that conflict with one already loaded are skipped and logged.
    ///
    /// # Errors
    ///
    /// [`BookingError::DownstreamUnavailable`] if the repository cannot be read.
    #[tracing::instrument(skip_all)]
    pub async fn hydrate(environment: TicketEnvironment, catalog: GuardedCatalog) -> BookingResult<Self> {
        let stored = environment.repository.load_all().await?;
        let mut ledger = LedgerState::new();
        let mut skipped = 0usize;
        for ticket in stored {
            if let Err(error) = ledger.restore(ticket) {
                skipped += 1;
                tracing::warn!(error = %error, "Skipping stored ticket");
            }
        }

        for mismatch in ledger.audit_occupancy() {
            tracing::error!(
                slot = %mismatch.key,
                counted = mismatch.counted,
                derived = mismatch.derived,
                "Occupancy mismatch after hydration"
            );
        }

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("booking_tickets_loaded").set(ledger.len() as f64);
        tracing::info!(tickets = ledger.len(), skipped, "Ledger hydrated");
        Ok(Self::new(ledger, environment, catalog))
    }

    /// Override the reference regeneration bound
    #[must_use]
    pub const fn with_reference_attempts(mut self, attempts: usize) -> Self {
        self.reference_attempts = attempts;
        self
    }

    /// The underlying store
    #[must_use]
    pub const fn store(&self) -> &TicketStore {
        &self.store
    }

    /// The catalog, for health reporting
    #[must_use]
    pub const fn catalog(&self) -> &GuardedCatalog {
        &self.catalog
    }

    /// Side effects that exhausted their retries
    #[must_use]
    pub fn dead_letters(&self) -> &DeadLetterQueue<FailedSideEffect> {
        &self.store.environment().dead_letters
    }

    /// Take every parked side effect for reconciliation
    #[must_use]
    pub fn drain_dead_letters(&self) -> Vec<DeadLetter<FailedSideEffect>> {
        self.dead_letters().drain()
    }

    // ========== Queries ==========

    /// Windows on `date` with at least one free place.
    ///
    /// Reads a snapshot; the reservation re-checks capacity at commit.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown site,
    /// [`BookingError::DownstreamUnavailable`] when the catalog is unreachable.
    #[tracing::instrument(skip(self))]
    pub async fn available_slots(&self, site_id: &SiteId, date: NaiveDate) -> BookingResult<Vec<SlotAvailability>> {
        let site = self.catalog.site(site_id).await?;
        let width = self.store.environment().rules.slot_width;
        Ok(self
            .store
            .state(|state| available_slots(&site, date, width, &state.ledger))
            .await)
    }

    /// Ticket by reference
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown reference.
    pub async fn get_ticket(&self, reference: &BookingReference) -> BookingResult<Ticket> {
        self.store
            .state(|state| state.ledger.get(reference).cloned())
            .await
            .ok_or_else(|| BookingError::ticket_not_found(reference))
    }

    /// A user's tickets, newest first.
    ///
    /// Limit defaults to 10 and is clamped to 1..=100; pages start at 1.
    pub async fn list_user_tickets(&self, user_id: &UserId, query: TicketQuery) -> TicketPage {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let page = query.page.unwrap_or(1).max(1);

        let matching: Vec<Ticket> = self
            .store
            .state(|state| {
                state
                    .ledger
                    .tickets_for_user(user_id)
                    .into_iter()
                    .filter(|t| query.status.is_none_or(|status| t.status == status))
                    .cloned()
                    .collect()
            })
            .await;

        let total = matching.len();
        let tickets = matching
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        TicketPage {
            tickets,
            page,
            limit,
            total,
            total_pages: total.div_ceil(limit),
        }
    }

    /// Check a gate-scan payload against the live ticket record.
    ///
    /// # Errors
    ///
    /// [`BookingError::InputValidation`] for a malformed or tampered payload,
    /// [`BookingError::NotFound`] when the claimed ticket does not exist.
    #[tracing::instrument(skip_all)]
    pub async fn verify_payload(&self, payload: &str) -> BookingResult<GateScan> {
        let environment = self.store.environment();
        let decoded = environment.signer.verify(payload.trim()).map_err(|error| {
            if error == PayloadError::Tampered {
                tracing::warn!("Rejected tampered verification payload");
            }
            BookingError::invalid(error.to_string())
        })?;

        let ticket = self.get_ticket(&decoded.claims.reference).await?;
        let now = environment.clock.now();

        // Status is taken from the ledger; every other claim must match it
        let live = VerificationClaims::from(&ticket);
        let identity_matches = VerificationClaims {
            status: live.status,
            ..decoded.claims.clone()
        } == live;

        let reason = if !identity_matches {
            Some("payload does not match the ticket record".to_string())
        } else if ticket.status != TicketStatus::Confirmed {
            Some(format!("ticket is {}", ticket.status))
        } else if ticket.visit_date != ticket.local_date(now) {
            Some(format!("ticket is for {}", ticket.visit_date))
        } else {
            None
        };

        tracing::info!(
            reference = %ticket.reference,
            integrity = ?decoded.integrity,
            admissible = reason.is_none(),
            "Gate scan"
        );

        Ok(GateScan {
            claims: decoded.claims,
            integrity: decoded.integrity,
            current_status: ticket.status,
            admissible: reason.is_none(),
            reason,
        })
    }

    // ========== Commands ==========

    /// Reserve capacity and create a `booked` ticket.
    ///
    /// # Errors
    ///
    /// [`BookingError::InputValidation`], [`BookingError::CapacityExceeded`],
    /// [`BookingError::NotFound`] for an unknown site, or
    /// [`BookingError::DownstreamUnavailable`] when the catalog is unreachable.
    #[tracing::instrument(skip(self, request), fields(site_id = %request.site_id, user_id = %request.user_id))]
    pub async fn reserve(&self, request: ReserveRequest) -> BookingResult<Ticket> {
        let site = self.catalog.site(&request.site_id).await?;

        for attempt in 1..=self.reference_attempts {
            let action = TicketAction::Reserve {
                reference: new_reference(&site.code, request.visit_date),
                user_id: request.user_id.clone(),
                site: Box::new(site.clone()),
                visit_date: request.visit_date,
                slot: request.slot,
                visitors: request.visitors.clone(),
                addons: request.addons.clone(),
            };
            match self.command(action).await? {
                CommandOutcome::ReferenceTaken(reference) => {
                    tracing::debug!(attempt, reference = %reference, "Booking reference collision; regenerating");
                },
                outcome => return ticket_of(outcome),
            }
        }

        Err(BookingError::Internal(format!(
            "no unused booking reference after {} attempts",
            self.reference_attempts
        )))
    }

    /// Apply a payment gateway callback.
    ///
    /// # Errors
    ///
    /// [`BookingError::PaymentMismatch`], [`BookingError::InvalidTransition`]
    /// or [`BookingError::NotFound`].
    #[tracing::instrument(skip(self, signature))]
    pub async fn confirm_payment(
        &self,
        reference: BookingReference,
        order_id: OrderId,
        payment_id: PaymentId,
        signature: String,
    ) -> BookingResult<Ticket> {
        ticket_of(
            self.command(TicketAction::ConfirmPayment {
                reference,
                order_id,
                payment_id,
                signature,
            })
            .await?,
        )
    }

    /// Cancel with the policy refund.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] inside the notice window or after
    /// check-in, [`BookingError::NotFound`] for an unknown reference.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, reference: BookingReference, reason: String) -> BookingResult<CancelReceipt> {
        match self.command(TicketAction::Cancel { reference, reason }).await? {
            CommandOutcome::Cancelled {
                ticket,
                refund,
                replayed,
            } => Ok(CancelReceipt {
                ticket: *ticket,
                refund,
                replayed,
            }),
            other => Err(unexpected(&other)),
        }
    }

    /// Admit a party at the gate.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] when the ticket is not for today or
    /// not confirmed and paid, [`BookingError::InputValidation`] for a bad headcount.
    #[tracing::instrument(skip(self))]
    pub async fn check_in(
        &self,
        reference: BookingReference,
        staff_id: StaffId,
        actual_visitors: Option<u32>,
    ) -> BookingResult<Ticket> {
        ticket_of(
            self.command(TicketAction::CheckIn {
                reference,
                staff_id,
                actual_visitors,
            })
            .await?,
        )
    }

    /// Mark a checked-in visit as completed.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] unless the ticket is checked in.
    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, reference: BookingReference) -> BookingResult<Ticket> {
        ticket_of(self.command(TicketAction::Complete { reference }).await?)
    }

    /// Release an unpaid reservation past its payment window.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] while the window is open or once paid.
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, reference: BookingReference) -> BookingResult<Ticket> {
        ticket_of(self.command(TicketAction::Expire { reference }).await?)
    }

    /// Rate a completed visit.
    ///
    /// # Errors
    ///
    /// [`BookingError::InputValidation`] for a bad rating or review,
    /// [`BookingError::InvalidTransition`] before completion or on a second submission.
    #[tracing::instrument(skip(self, review))]
    pub async fn submit_feedback(
        &self,
        reference: BookingReference,
        rating: u8,
        review: Option<String>,
    ) -> BookingResult<Ticket> {
        ticket_of(
            self.command(TicketAction::SubmitFeedback {
                reference,
                rating,
                review,
            })
            .await?,
        )
    }

    /// Expire due reservations and complete finished visits.
    ///
    /// # Errors
    ///
    /// [`BookingError::Internal`] if the store is shutting down.
    pub async fn sweep(&self) -> BookingResult<SweepReport> {
        match self.command(TicketAction::Sweep).await? {
            CommandOutcome::Swept(report) => Ok(report),
            other => Err(unexpected(&other)),
        }
    }

    /// Wait until every spawned side effect has finished.
    ///
    /// # Errors
    ///
    /// [`BookingError::Internal`] if effects are still running at the deadline.
    pub async fn settle(&self, timeout: Duration) -> BookingResult<()> {
        Ok(self.store.settle(timeout).await?)
    }

    /// Stop accepting commands and drain in-flight effects.
    ///
    /// # Errors
    ///
    /// [`BookingError::Internal`] with the number of effects still running.
    pub async fn shutdown(&self, timeout: Duration) -> BookingResult<()> {
        Ok(self.store.shutdown(timeout).await?)
    }

    async fn command(&self, action: TicketAction) -> BookingResult<CommandOutcome> {
        self.store
            .send_and_read(action, |state| state.last_outcome.clone())
            .await?
            .unwrap_or_else(|| Err(BookingError::Internal("command produced no outcome".to_string())))
    }
}

fn ticket_of(outcome: CommandOutcome) -> BookingResult<Ticket> {
    match outcome {
        CommandOutcome::Ticket { ticket, .. } | CommandOutcome::Cancelled { ticket, .. } => Ok(*ticket),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(outcome: &CommandOutcome) -> BookingError {
    BookingError::Internal(format!("unexpected command outcome: {outcome:?}"))
}

impl std::fmt::Debug for BookingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingEngine")
            .field("reference_attempts", &self.reference_attempts)
            .field("pending_effects", &self.store.pending_effects())
            .finish_non_exhaustive()
    }
}

/// Shared engine handle for request handlers
pub type SharedEngine = Arc<BookingEngine>;
