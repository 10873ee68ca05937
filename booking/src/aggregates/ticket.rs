//! Ticket lifecycle reducer.
//!
//! ```text
//! booked ──confirm──▶ confirmed ──check-in──▶ checked_in ──complete──▶ completed
//!   │  └──expire──▶ expired       │
//!   └──────cancel──────▶ cancelled ◀┘
//! ```
//!
//! Every command is validated against the ledger and either commits as a
//! whole or is rejected with no state change. The outcome of the last command
//! is left in [`BookingState::last_outcome`] so the caller can read it under the
//! same store lock. Gateway, notification and persistence calls are returned
//! as effects and run after the lock is released.

use std::sync::Arc;

use booking_core::{SmallVec, effect::Effect, environment::Clock, reducer::Reducer, smallvec};
use booking_runtime::DeadLetterQueue;
use booking_runtime::retry::{RetryPolicy, retry_with_backoff};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::availability::windows_for_date;
use crate::error::{BookingError, BookingResult};
use crate::ledger::{LedgerError, LedgerState, ReservationResult};
use crate::notification::{NotificationKind, TicketNotifier};
use crate::payment_gateway::{PaymentGateway, SignatureVerifier};
use crate::persistence::TicketRepository;
use crate::policy::{BookingRules, RefundBreakdown, paid_amount};
use crate::reference::{PayloadSigner, VerificationClaims};
use crate::types::{
    AddonItem, BookingReference, Cancellation, CheckIn, Feedback, Money, OrderId, Payment,
    PaymentId, PaymentStatus, Site, StaffId, Ticket, TicketId, TicketStatus, TimeSlot, UserId,
    Visitor, local_instant,
};

/// Visitor name length bounds, in characters after trimming
pub const VISITOR_NAME_CHARS: std::ops::RangeInclusive<usize> = 2..=100;
/// Oldest accepted visitor age
pub const MAX_VISITOR_AGE: i32 = 120;
/// Longest accepted review, in characters
pub const MAX_REVIEW_CHARS: usize = 1_000;

type Effects = SmallVec<[Effect<TicketAction>; 4]>;

// ============================================================================
// Actions
// ============================================================================

/// Commands from callers plus results fed back by effects
#[derive(Clone, Debug)]
pub enum TicketAction {
    // Commands
    /// Reserve capacity and create a `booked` ticket
    Reserve {
        /// Pre-generated reference; a taken one yields [`CommandOutcome::ReferenceTaken`]
        reference: BookingReference,
        /// Owner
        user_id: UserId,
        /// Site as returned by the catalog
        site: Box<Site>,
        /// Site-local visit date
        visit_date: NaiveDate,
        /// Requested window
        slot: TimeSlot,
        /// Party
        visitors: Vec<Visitor>,
        /// Extras
        addons: Vec<AddonItem>,
    },

    /// Gateway callback
    ConfirmPayment {
        /// Ticket
        reference: BookingReference,
        /// Gateway order
        order_id: OrderId,
        /// Gateway payment
        payment_id: PaymentId,
        /// Hex HMAC over `order_id|payment_id`
        signature: String,
    },

    /// Admit the party at the gate
    CheckIn {
        /// Ticket
        reference: BookingReference,
        /// Staff member admitting
        staff_id: StaffId,
        /// Headcount; defaults to the booked count
        actual_visitors: Option<u32>,
    },

    /// Cancel with the policy refund
    Cancel {
        /// Ticket
        reference: BookingReference,
        /// Caller-supplied reason
        reason: String,
    },

    /// Mark a checked-in visit as over
    Complete {
        /// Ticket
        reference: BookingReference,
    },

    /// Release an unpaid reservation past its payment window
    Expire {
        /// Ticket
        reference: BookingReference,
    },

    /// Rate a completed visit
    SubmitFeedback {
        /// Ticket
        reference: BookingReference,
        /// 1..=5
        rating: u8,
        /// Optional text
        review: Option<String>,
    },

    /// Housekeeping: expire due tickets, complete finished visits
    Sweep,

    // Effect results
    /// The gateway opened an order for a new reservation
    PaymentOrderCreated {
        /// Ticket
        reference: BookingReference,
        /// Gateway order
        order_id: OrderId,
    },

    /// The gateway could not open an order
    PaymentOrderFailed {
        /// Ticket
        reference: BookingReference,
        /// Last error
        error: String,
    },
}

/// Result of a successful command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The ticket after the transition; `replayed` when nothing changed
    Ticket {
        /// Current record
        ticket: Box<Ticket>,
        /// Command was a repeat of one already applied
        replayed: bool,
    },
    /// Cancellation with its refund
    Cancelled {
        /// Current record
        ticket: Box<Ticket>,
        /// Refund computed at cancellation
        refund: RefundBreakdown,
        /// Ticket was already cancelled
        replayed: bool,
    },
    /// The pre-generated reference is in use; generate another
    ReferenceTaken(BookingReference),
    /// Housekeeping result
    Swept(SweepReport),
}

/// Tickets moved by a sweep
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Unpaid tickets released
    pub expired: Vec<BookingReference>,
    /// Visits closed
    pub completed: Vec<BookingReference>,
}

/// Work that exhausted its retries
#[derive(Clone, Debug)]
pub enum FailedSideEffect {
    /// Repository write
    Persist(Box<Ticket>),
    /// Gateway order creation
    PaymentOrder(BookingReference),
    /// Gateway refund
    Refund {
        /// Ticket
        reference: BookingReference,
        /// Amount owed
        amount: Money,
    },
    /// Notice or ticket document
    Notify {
        /// Ticket
        reference: BookingReference,
        /// Template, `None` for the ticket artifact
        kind: Option<NotificationKind>,
    },
    /// Rejected payment callback awaiting manual reconciliation
    PaymentMismatch {
        /// Ticket
        reference: BookingReference,
        /// Order in the callback
        order_id: OrderId,
        /// Payment in the callback
        payment_id: PaymentId,
    },
    /// Genuine capture for a ticket that is no longer payable; owes a refund
    OrphanPayment {
        /// Ticket
        reference: BookingReference,
        /// The ticket's own order
        order_id: OrderId,
        /// Captured payment
        payment_id: PaymentId,
        /// Status when the capture arrived
        status: TicketStatus,
        /// Amount captured
        amount: Money,
    },
}

impl FailedSideEffect {
    /// Metric label
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Persist(_) => "persist",
            Self::PaymentOrder(_) => "payment_order",
            Self::Refund { .. } => "refund",
            Self::Notify { .. } => "notify",
            Self::PaymentMismatch { .. } => "payment_mismatch",
            Self::OrphanPayment { .. } => "orphan_payment",
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Store state: the ledger plus the outcome of the last command
#[derive(Clone, Debug, Default)]
pub struct BookingState {
    /// Authoritative ticket records and occupancy
    pub ledger: LedgerState,
    /// Result of the most recent command
    pub last_outcome: Option<BookingResult<CommandOutcome>>,
}

impl BookingState {
    /// State over an existing ledger
    #[must_use]
    pub const fn new(ledger: LedgerState) -> Self {
        Self {
            ledger,
            last_outcome: None,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Injected collaborators and rules
#[derive(Clone)]
pub struct TicketEnvironment {
    /// Time source for every guard
    pub clock: Arc<dyn Clock>,
    /// Payment gateway
    pub payments: Arc<dyn PaymentGateway>,
    /// Document and notice delivery
    pub notifier: Arc<dyn TicketNotifier>,
    /// Durable copy of the ledger
    pub repository: Arc<dyn TicketRepository>,
    /// Callback authentication
    pub verifier: SignatureVerifier,
    /// Gate payload encoder
    pub signer: PayloadSigner,
    /// Business rules
    pub rules: BookingRules,
    /// Backoff for side effects
    pub retry: RetryPolicy,
    /// Side effects that failed every retry
    pub dead_letters: DeadLetterQueue<FailedSideEffect>,
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the ticket lifecycle
#[derive(Clone, Debug, Default)]
pub struct TicketReducer;

impl TicketReducer {
    /// Creates a new `TicketReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validate a reservation request and price it
    fn validate_reserve(
        env: &TicketEnvironment,
        now: DateTime<Utc>,
        site: &Site,
        visit_date: NaiveDate,
        slot: TimeSlot,
        visitors: &[Visitor],
        addons: &[AddonItem],
    ) -> BookingResult<(crate::pricing::PriceBreakdown, DateTime<Utc>, DateTime<Utc>)> {
        if visitors.is_empty() {
            return Err(BookingError::invalid("at least one visitor is required"));
        }
        if visitors.len() > env.rules.max_visitors_per_booking {
            return Err(BookingError::invalid(format!(
                "at most {} visitors per booking (requested: {})",
                env.rules.max_visitors_per_booking,
                visitors.len()
            )));
        }
        for (index, visitor) in visitors.iter().enumerate() {
            let name_chars = visitor.name.trim().chars().count();
            if !VISITOR_NAME_CHARS.contains(&name_chars) {
                return Err(BookingError::invalid(format!(
                    "visitor {index} name must be {}-{} characters",
                    VISITOR_NAME_CHARS.start(),
                    VISITOR_NAME_CHARS.end()
                )));
            }
            if visitor.age > MAX_VISITOR_AGE {
                return Err(BookingError::invalid(format!(
                    "visitor {index} age {} exceeds {MAX_VISITOR_AGE}",
                    visitor.age
                )));
            }
        }
        if let Some(addon) = addons.iter().find(|a| a.quantity == 0) {
            return Err(BookingError::invalid(format!(
                "addon '{}' quantity must be at least 1",
                addon.name
            )));
        }

        if !windows_for_date(site, visit_date, env.rules.slot_width).contains(&slot) {
            return Err(BookingError::invalid(format!(
                "slot {slot} is not offered by {} on {visit_date}",
                site.id
            )));
        }

        let (Some(starts_at), Some(ends_at)) = (
            local_instant(site.utc_offset_minutes, visit_date, slot.start),
            local_instant(site.utc_offset_minutes, visit_date, slot.end),
        ) else {
            return Err(BookingError::invalid(format!("slot {slot} on {visit_date} is not a valid local time")));
        };
        if starts_at <= now {
            return Err(BookingError::invalid("visit must be in the future"));
        }

        let pricing = env.rules.pricing.quote(site.base_price, visitors, addons)?;
        Ok((pricing, starts_at, ends_at))
    }

    #[allow(clippy::too_many_arguments)]
    fn reserve(
        ledger: &mut LedgerState,
        env: &TicketEnvironment,
        effects: &mut Effects,
        reference: BookingReference,
        user_id: UserId,
        site: &Site,
        visit_date: NaiveDate,
        slot: TimeSlot,
        visitors: Vec<Visitor>,
        addons: &[AddonItem],
    ) -> BookingResult<CommandOutcome> {
        let now = env.clock.now();
        let (pricing, visit_starts_at, visit_ends_at) =
            Self::validate_reserve(env, now, site, visit_date, slot, &visitors, addons)?;

        if ledger.contains(&reference) {
            return Ok(CommandOutcome::ReferenceTaken(reference));
        }

        let mut ticket = Ticket {
            id: TicketId::new(),
            reference,
            user_id,
            site_id: site.id.clone(),
            visitors,
            visit_date,
            slot,
            visit_starts_at,
            visit_ends_at,
            utc_offset_minutes: site.utc_offset_minutes,
            payment: Payment::pending(pricing.total, env.rules.currency.clone()),
            pricing,
            status: TicketStatus::Booked,
            cancellation: None,
            check_in: None,
            feedback: None,
            verification_payload: String::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        ticket.verification_payload = env.signer.issue(&VerificationClaims::from(&ticket));

        match ledger.admit(ticket.clone(), site.capacity) {
            Ok(ReservationResult::Accepted { committed, available }) => {
                metrics::counter!("booking_reservations_total", "outcome" => "accepted").increment(1);
                metrics::counter!("booking_visitors_reserved_total").increment(u64::from(ticket.visitor_count()));
                tracing::info!(
                    reference = %ticket.reference,
                    slot = %ticket.slot_key(),
                    visitors = ticket.visitor_count(),
                    committed,
                    available,
                    total = %ticket.pricing.total,
                    "Reservation committed"
                );
                effects.push(Self::persist(env, &ticket));
                effects.push(Self::create_order(env, &ticket));
                Ok(CommandOutcome::Ticket {
                    ticket: Box::new(ticket),
                    replayed: false,
                })
            },
            Ok(ReservationResult::CapacityExceeded { requested, available }) => {
                metrics::counter!("booking_reservations_total", "outcome" => "capacity_exceeded").increment(1);
                Err(BookingError::CapacityExceeded { requested, available })
            },
            Err(LedgerError::DuplicateReference(reference)) => Ok(CommandOutcome::ReferenceTaken(reference)),
            Err(other) => Err(other.into()),
        }
    }

    fn confirm_payment(
        ledger: &mut LedgerState,
        env: &TicketEnvironment,
        effects: &mut Effects,
        reference: &BookingReference,
        order_id: OrderId,
        payment_id: PaymentId,
        signature: &str,
    ) -> BookingResult<CommandOutcome> {
        let now = env.clock.now();
        let ticket = ledger
            .get(reference)
            .ok_or_else(|| BookingError::ticket_not_found(reference))?;

        if ticket.payment.status == PaymentStatus::Completed {
            if ticket.payment.payment_id.as_ref() == Some(&payment_id) {
                tracing::debug!(reference = %reference, payment_id = %payment_id, "Duplicate payment callback ignored");
                return Ok(CommandOutcome::Ticket {
                    ticket: Box::new(ticket.clone()),
                    replayed: true,
                });
            }
            let reason = "ticket already paid with a different payment id".to_string();
            Self::park_mismatch(env, reference, &order_id, &payment_id, &reason);
            return Err(BookingError::PaymentMismatch {
                reference: reference.clone(),
                reason,
            });
        }

        let genuine = env.verifier.verify(&order_id, &payment_id, signature);

        if ticket.status != TicketStatus::Booked {
            // A replay of the payment already recorded was settled with the ticket
            let captured_now = ticket.payment.payment_id.as_ref() != Some(&payment_id);
            if genuine && captured_now && ticket.payment.order_id.as_ref() == Some(&order_id) {
                Self::park_orphan(env, ticket, order_id, payment_id);
            }
            return Err(BookingError::transition(
                reference,
                ticket.status,
                "confirm payment for",
                "ticket is not awaiting payment",
            ));
        }

        let mismatch = if !genuine {
            Some("signature verification failed".to_string())
        } else {
            match ticket.payment.order_id.as_ref() {
                None => Some("no payment order recorded for ticket".to_string()),
                Some(expected) if *expected != order_id => {
                    Some(format!("order {order_id} does not match expected order {expected}"))
                },
                Some(_) => ledger
                    .tickets()
                    .find(|t| t.reference != *reference && t.payment.payment_id.as_ref() == Some(&payment_id))
                    .map(|other| format!("payment {payment_id} already settles ticket {}", other.reference)),
            }
        };

        if let Some(reason) = mismatch {
            let failed = ledger
                .update(reference, |t| {
                    t.payment.status = PaymentStatus::Failed;
                    t.payment.failure_reason = Some(reason.clone());
                    t.updated_at = now;
                })?
                .clone();
            metrics::counter!("booking_payments_total", "status" => "failed").increment(1);
            Self::park_mismatch(env, reference, &order_id, &payment_id, &reason);
            effects.push(Self::persist(env, &failed));
            return Err(BookingError::PaymentMismatch {
                reference: reference.clone(),
                reason,
            });
        }

        let signer = &env.signer;
        let confirmed = ledger
            .update(reference, |t| {
                t.payment.status = PaymentStatus::Completed;
                t.payment.transaction_id = Some(order_id.to_string());
                t.payment.order_id = Some(order_id);
                t.payment.payment_id = Some(payment_id);
                t.payment.paid_at = Some(now);
                t.payment.failure_reason = None;
                t.status = TicketStatus::Confirmed;
                Self::touch(t, signer, now);
            })?
            .clone();

        metrics::counter!("booking_payments_total", "status" => "completed").increment(1);
        metrics::counter!("booking_revenue_cents_total").increment(confirmed.pricing.total.minor());
        tracing::info!(reference = %reference, amount = %confirmed.pricing.total, "Payment confirmed");

        effects.push(Self::persist(env, &confirmed));
        effects.push(Self::issue_artifact(env, &confirmed));
        effects.push(Self::notify(env, NotificationKind::BookingConfirmation, &confirmed));
        Ok(CommandOutcome::Ticket {
            ticket: Box::new(confirmed),
            replayed: false,
        })
    }

    fn cancel(
        ledger: &mut LedgerState,
        env: &TicketEnvironment,
        effects: &mut Effects,
        reference: &BookingReference,
        reason: &str,
    ) -> BookingResult<CommandOutcome> {
        let now = env.clock.now();
        let ticket = ledger
            .get(reference)
            .ok_or_else(|| BookingError::ticket_not_found(reference))?;

        if let (TicketStatus::Cancelled, Some(recorded)) = (ticket.status, ticket.cancellation.as_ref()) {
            let refund = RefundBreakdown {
                paid: recorded.paid,
                fee: recorded.fee,
                refund: recorded.refund_amount,
                hours_before_visit: recorded.minutes_before_visit / 60,
                minutes_before_visit: recorded.minutes_before_visit,
            };
            return Ok(CommandOutcome::Cancelled {
                ticket: Box::new(ticket.clone()),
                refund,
                replayed: true,
            });
        }

        if !matches!(ticket.status, TicketStatus::Booked | TicketStatus::Confirmed) {
            return Err(BookingError::transition(
                reference,
                ticket.status,
                "cancel",
                "only booked or confirmed tickets can be cancelled",
            ));
        }

        let policy = &env.rules.cancellation;
        let refund = policy
            .refund(now, ticket.visit_starts_at, paid_amount(ticket))
            .map_err(|late| {
                BookingError::transition(
                    reference,
                    ticket.status,
                    "cancel",
                    format!(
                        "cancellation requires more than {} hours notice ({} minutes remain)",
                        policy.minimum_notice.num_hours(),
                        late.remaining.num_minutes()
                    ),
                )
            })?;

        let was_paid = ticket.payment.status == PaymentStatus::Completed;
        let reason = match reason.trim() {
            "" => "cancelled by user".to_string(),
            given => given.to_string(),
        };

        let signer = &env.signer;
        let cancelled = ledger
            .update(reference, |t| {
                t.status = TicketStatus::Cancelled;
                t.payment.status = if was_paid {
                    PaymentStatus::Refunded
                } else {
                    PaymentStatus::Cancelled
                };
                t.cancellation = Some(Cancellation {
                    reason,
                    paid: refund.paid,
                    fee: refund.fee,
                    refund_amount: refund.refund,
                    minutes_before_visit: refund.minutes_before_visit,
                    cancelled_at: now,
                });
                Self::touch(t, signer, now);
            })?
            .clone();

        metrics::counter!("booking_cancellations_total").increment(1);
        metrics::counter!("booking_refunds_cents_total").increment(refund.refund.minor());
        tracing::info!(
            reference = %reference,
            fee = %refund.fee,
            refund = %refund.refund,
            hours_before_visit = refund.hours_before_visit,
            "Ticket cancelled; capacity released"
        );

        effects.push(Self::persist(env, &cancelled));
        effects.push(Self::notify(env, NotificationKind::Cancellation, &cancelled));
        if was_paid && !refund.refund.is_zero() {
            effects.push(Self::refund(env, &cancelled, refund.refund));
        }
        Ok(CommandOutcome::Cancelled {
            ticket: Box::new(cancelled),
            refund,
            replayed: false,
        })
    }

    fn check_in(
        ledger: &mut LedgerState,
        env: &TicketEnvironment,
        effects: &mut Effects,
        reference: &BookingReference,
        staff_id: StaffId,
        actual_visitors: Option<u32>,
    ) -> BookingResult<CommandOutcome> {
        let now = env.clock.now();
        let ticket = ledger
            .get(reference)
            .ok_or_else(|| BookingError::ticket_not_found(reference))?;

        if staff_id.as_str().trim().is_empty() {
            return Err(BookingError::invalid("staff id is required for check-in"));
        }
        let actual_visitors = actual_visitors.unwrap_or_else(|| ticket.visitor_count());
        if actual_visitors == 0 {
            return Err(BookingError::invalid("actual visitor count must be at least 1"));
        }

        let today = ticket.local_date(now);
        if ticket.visit_date != today {
            return Err(BookingError::transition(
                reference,
                ticket.status,
                "check in",
                format!("ticket is for {}, today is {today}", ticket.visit_date),
            ));
        }
        if ticket.status != TicketStatus::Confirmed {
            return Err(BookingError::transition(
                reference,
                ticket.status,
                "check in",
                "ticket must be confirmed",
            ));
        }
        if ticket.payment.status != PaymentStatus::Completed {
            return Err(BookingError::transition(
                reference,
                ticket.status,
                "check in",
                "payment has not completed",
            ));
        }

        let booked = ticket.visitor_count();
        let signer = &env.signer;
        let checked_in = ledger
            .update(reference, |t| {
                t.status = TicketStatus::CheckedIn;
                t.check_in = Some(CheckIn {
                    actual_visitors,
                    staff_id,
                    checked_in_at: now,
                });
                Self::touch(t, signer, now);
            })?
            .clone();

        metrics::counter!("booking_check_ins_total").increment(1);
        tracing::info!(reference = %reference, booked, actual_visitors, "Visitors checked in");

        effects.push(Self::persist(env, &checked_in));
        effects.push(Self::notify(env, NotificationKind::CheckIn, &checked_in));
        Ok(CommandOutcome::Ticket {
            ticket: Box::new(checked_in),
            replayed: false,
        })
    }

    fn complete(
        ledger: &mut LedgerState,
        env: &TicketEnvironment,
        effects: &mut Effects,
        reference: &BookingReference,
    ) -> BookingResult<CommandOutcome> {
        let now = env.clock.now();
        let ticket = ledger
            .get(reference)
            .ok_or_else(|| BookingError::ticket_not_found(reference))?;

        match ticket.status {
            TicketStatus::Completed => {
                return Ok(CommandOutcome::Ticket {
                    ticket: Box::new(ticket.clone()),
                    replayed: true,
                });
            },
            TicketStatus::CheckedIn => {},
            other => {
                return Err(BookingError::transition(
                    reference,
                    other,
                    "complete",
                    "ticket has not been checked in",
                ));
            },
        }

        let signer = &env.signer;
        let completed = ledger
            .update(reference, |t| {
                t.status = TicketStatus::Completed;
                Self::touch(t, signer, now);
            })?
            .clone();

        metrics::counter!("booking_completions_total").increment(1);
        tracing::debug!(reference = %reference, "Visit completed");
        effects.push(Self::persist(env, &completed));
        Ok(CommandOutcome::Ticket {
            ticket: Box::new(completed),
            replayed: false,
        })
    }

    fn expire(
        ledger: &mut LedgerState,
        env: &TicketEnvironment,
        effects: &mut Effects,
        reference: &BookingReference,
    ) -> BookingResult<CommandOutcome> {
        let now = env.clock.now();
        let ticket = ledger
            .get(reference)
            .ok_or_else(|| BookingError::ticket_not_found(reference))?;

        if ticket.status == TicketStatus::Expired {
            return Ok(CommandOutcome::Ticket {
                ticket: Box::new(ticket.clone()),
                replayed: true,
            });
        }
        let unpaid = matches!(ticket.payment.status, PaymentStatus::Pending | PaymentStatus::Failed);
        if ticket.status != TicketStatus::Booked || !unpaid {
            return Err(BookingError::transition(
                reference,
                ticket.status,
                "expire",
                "only unpaid booked tickets can expire",
            ));
        }
        let cutoff = env.rules.expiry.cutoff(ticket);
        if now < cutoff {
            return Err(BookingError::transition(
                reference,
                ticket.status,
                "expire",
                format!("payment window open until {}", cutoff.to_rfc3339()),
            ));
        }

        let signer = &env.signer;
        let expired = ledger
            .update(reference, |t| {
                t.status = TicketStatus::Expired;
                t.payment.status = PaymentStatus::Cancelled;
                Self::touch(t, signer, now);
            })?
            .clone();

        metrics::counter!("booking_expirations_total").increment(1);
        tracing::info!(reference = %reference, visitors = expired.visitor_count(), "Unpaid reservation expired");
        effects.push(Self::persist(env, &expired));
        Ok(CommandOutcome::Ticket {
            ticket: Box::new(expired),
            replayed: false,
        })
    }

    fn submit_feedback(
        ledger: &mut LedgerState,
        env: &TicketEnvironment,
        effects: &mut Effects,
        reference: &BookingReference,
        rating: u8,
        review: Option<String>,
    ) -> BookingResult<CommandOutcome> {
        let now = env.clock.now();
        if !(1..=5).contains(&rating) {
            return Err(BookingError::invalid("rating must be between 1 and 5"));
        }
        let review = review
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if review.as_ref().is_some_and(|r| r.chars().count() > MAX_REVIEW_CHARS) {
            return Err(BookingError::invalid(format!(
                "review must be at most {MAX_REVIEW_CHARS} characters"
            )));
        }

        let ticket = ledger
            .get(reference)
            .ok_or_else(|| BookingError::ticket_not_found(reference))?;
        if ticket.status != TicketStatus::Completed {
            return Err(BookingError::transition(
                reference,
                ticket.status,
                "submit feedback for",
                "visit has not been completed",
            ));
        }
        if ticket.feedback.is_some() {
            return Err(BookingError::transition(
                reference,
                ticket.status,
                "submit feedback for",
                "feedback already submitted",
            ));
        }

        let rated = ledger
            .update(reference, |t| {
                t.feedback = Some(Feedback {
                    rating,
                    review,
                    submitted_at: now,
                });
                t.updated_at = now;
            })?
            .clone();

        effects.push(Self::persist(env, &rated));
        Ok(CommandOutcome::Ticket {
            ticket: Box::new(rated),
            replayed: false,
        })
    }

    fn sweep(ledger: &mut LedgerState, env: &TicketEnvironment, effects: &mut Effects) -> SweepReport {
        let now = env.clock.now();
        let mut due_expiry: Vec<BookingReference> = ledger
            .tickets()
            .filter(|t| env.rules.expiry.is_due(t, now))
            .map(|t| t.reference.clone())
            .collect();
        let mut due_completion: Vec<BookingReference> = ledger
            .tickets()
            .filter(|t| t.status == TicketStatus::CheckedIn && now >= t.visit_ends_at)
            .map(|t| t.reference.clone())
            .collect();
        due_expiry.sort();
        due_completion.sort();

        let mut report = SweepReport::default();
        for reference in due_expiry {
            match Self::expire(ledger, env, effects, &reference) {
                Ok(_) => report.expired.push(reference),
                Err(error) => tracing::warn!(reference = %reference, error = %error, "Sweep could not expire ticket"),
            }
        }
        for reference in due_completion {
            match Self::complete(ledger, env, effects, &reference) {
                Ok(_) => report.completed.push(reference),
                Err(error) => tracing::warn!(reference = %reference, error = %error, "Sweep could not complete ticket"),
            }
        }

        if !report.expired.is_empty() || !report.completed.is_empty() {
            tracing::info!(
                expired = report.expired.len(),
                completed = report.completed.len(),
                "Housekeeping sweep"
            );
        }
        report
    }

    fn record_order(
        ledger: &mut LedgerState,
        env: &TicketEnvironment,
        effects: &mut Effects,
        reference: &BookingReference,
        order_id: OrderId,
    ) {
        let awaiting = ledger.get(reference).is_some_and(|t| {
            t.status == TicketStatus::Booked && t.payment.order_id.is_none()
        });
        if !awaiting {
            tracing::debug!(reference = %reference, order_id = %order_id, "Payment order arrived after ticket moved on");
            return;
        }

        let now = env.clock.now();
        match ledger.update(reference, |t| {
            t.payment.order_id = Some(order_id);
            t.updated_at = now;
        }) {
            Ok(ticket) => {
                tracing::debug!(reference = %reference, "Payment order recorded");
                let ticket = ticket.clone();
                effects.push(Self::persist(env, &ticket));
            },
            Err(error) => tracing::error!(reference = %reference, error = %error, "Failed to record payment order"),
        }
    }

    /// Stamp the mutation time and re-issue the gate payload
    fn touch(ticket: &mut Ticket, signer: &PayloadSigner, now: DateTime<Utc>) {
        ticket.updated_at = now;
        ticket.verification_payload = signer.issue(&VerificationClaims::from(&*ticket));
    }

    fn park_mismatch(
        env: &TicketEnvironment,
        reference: &BookingReference,
        order_id: &OrderId,
        payment_id: &PaymentId,
        reason: &str,
    ) {
        tracing::warn!(
            reference = %reference,
            order_id = %order_id,
            payment_id = %payment_id,
            reason,
            "Payment callback rejected; parked for reconciliation"
        );
        metrics::counter!("booking_side_effect_failures_total", "kind" => "payment_mismatch").increment(1);
        env.dead_letters.push(
            FailedSideEffect::PaymentMismatch {
                reference: reference.clone(),
                order_id: order_id.clone(),
                payment_id: payment_id.clone(),
            },
            reason.to_string(),
            1,
        );
    }

    fn park_orphan(env: &TicketEnvironment, ticket: &Ticket, order_id: OrderId, payment_id: PaymentId) {
        let amount = ticket.pricing.total;
        tracing::warn!(
            reference = %ticket.reference,
            status = %ticket.status,
            order_id = %order_id,
            payment_id = %payment_id,
            amount = %amount,
            "Payment captured for a ticket that is no longer payable; parked for refund"
        );
        metrics::counter!("booking_side_effect_failures_total", "kind" => "orphan_payment").increment(1);
        env.dead_letters.push(
            FailedSideEffect::OrphanPayment {
                reference: ticket.reference.clone(),
                order_id,
                payment_id,
                status: ticket.status,
                amount,
            },
            format!("payment arrived after ticket became {}", ticket.status),
            1,
        );
    }

    /// Release a reservation that can never be paid because no order exists
    fn abandon_without_order(
        ledger: &mut LedgerState,
        env: &TicketEnvironment,
        effects: &mut Effects,
        reference: &BookingReference,
        error: &str,
    ) {
        let unpayable = ledger.get(reference).is_some_and(|t| {
            t.status == TicketStatus::Booked
                && t.payment.order_id.is_none()
                && t.payment.status == PaymentStatus::Pending
        });
        if !unpayable {
            tracing::debug!(reference = %reference, "Payment order failure arrived after ticket moved on");
            return;
        }

        let now = env.clock.now();
        let signer = &env.signer;
        match ledger.update(reference, |t| {
            t.status = TicketStatus::Expired;
            t.payment.status = PaymentStatus::Failed;
            t.payment.failure_reason = Some(format!("payment order could not be created: {error}"));
            Self::touch(t, signer, now);
        }) {
            Ok(ticket) => {
                let ticket = ticket.clone();
                metrics::counter!("booking_expirations_total").increment(1);
                tracing::warn!(
                    reference = %reference,
                    visitors = ticket.visitor_count(),
                    error,
                    "No payment order; reservation released"
                );
                effects.push(Self::persist(env, &ticket));
            },
            Err(failure) => tracing::error!(reference = %reference, error = %failure, "Failed to release unpayable reservation"),
        }
    }

    // ========== Effects ==========

    fn park(dead_letters: &DeadLetterQueue<FailedSideEffect>, work: FailedSideEffect, error: String, attempts: usize) {
        metrics::counter!("booking_side_effect_failures_total", "kind" => work.kind()).increment(1);
        tracing::error!(kind = work.kind(), attempts, error = %error, "Side effect failed after retries");
        dead_letters.push(work, error, attempts);
    }

    fn persist(env: &TicketEnvironment, ticket: &Ticket) -> Effect<TicketAction> {
        let repository = Arc::clone(&env.repository);
        let retry = env.retry.clone();
        let dead_letters = env.dead_letters.clone();
        let ticket = ticket.clone();

        Effect::fire_and_forget(async move {
            let result = retry_with_backoff(&retry, "persist_ticket", || repository.save(ticket.clone())).await;
            if let Err(error) = result {
                let attempts = error.attempts;
                Self::park(&dead_letters, FailedSideEffect::Persist(Box::new(ticket)), error.to_string(), attempts);
            }
        })
    }

    fn create_order(env: &TicketEnvironment, ticket: &Ticket) -> Effect<TicketAction> {
        let payments = Arc::clone(&env.payments);
        let retry = env.retry.clone();
        let dead_letters = env.dead_letters.clone();
        let reference = ticket.reference.clone();
        let amount = ticket.pricing.total;
        let currency = ticket.payment.currency.clone();

        Effect::future(async move {
            let result = retry_with_backoff(&retry, "create_payment_order", || {
                payments.create_order(&reference, amount, &currency)
            })
            .await;
            match result {
                Ok(order) => Some(TicketAction::PaymentOrderCreated {
                    reference,
                    order_id: order.order_id,
                }),
                Err(error) => {
                    let message = error.to_string();
                    Self::park(&dead_letters, FailedSideEffect::PaymentOrder(reference.clone()), message.clone(), error.attempts);
                    Some(TicketAction::PaymentOrderFailed { reference, error: message })
                },
            }
        })
    }

    fn refund(env: &TicketEnvironment, ticket: &Ticket, amount: Money) -> Effect<TicketAction> {
        let payments = Arc::clone(&env.payments);
        let notifier = Arc::clone(&env.notifier);
        let retry = env.retry.clone();
        let dead_letters = env.dead_letters.clone();
        let ticket = ticket.clone();

        Effect::fire_and_forget(async move {
            let Some(order_id) = ticket.payment.order_id.clone() else {
                Self::park(
                    &dead_letters,
                    FailedSideEffect::Refund { reference: ticket.reference.clone(), amount },
                    "paid ticket has no order id".to_string(),
                    0,
                );
                return;
            };
            let payment_id = ticket.payment.payment_id.clone();

            let result = retry_with_backoff(&retry, "refund_payment", || {
                payments.refund(&order_id, payment_id.as_ref(), amount)
            })
            .await;
            match result {
                Ok(receipt) => {
                    tracing::info!(reference = %ticket.reference, refund_id = %receipt.refund_id, amount = %amount, "Refund issued");
                    if let Err(error) = retry_with_backoff(&retry, "notify_refund", || {
                        notifier.notify(NotificationKind::Refund, &ticket)
                    })
                    .await
                    {
                        let attempts = error.attempts;
                        Self::park(
                            &dead_letters,
                            FailedSideEffect::Notify { reference: ticket.reference.clone(), kind: Some(NotificationKind::Refund) },
                            error.to_string(),
                            attempts,
                        );
                    }
                },
                Err(error) => {
                    let attempts = error.attempts;
                    Self::park(
                        &dead_letters,
                        FailedSideEffect::Refund { reference: ticket.reference.clone(), amount },
                        error.to_string(),
                        attempts,
                    );
                },
            }
        })
    }

    fn notify(env: &TicketEnvironment, kind: NotificationKind, ticket: &Ticket) -> Effect<TicketAction> {
        let notifier = Arc::clone(&env.notifier);
        let retry = env.retry.clone();
        let dead_letters = env.dead_letters.clone();
        let ticket = ticket.clone();

        Effect::fire_and_forget(async move {
            let result = retry_with_backoff(&retry, kind.as_str(), || notifier.notify(kind, &ticket)).await;
            if let Err(error) = result {
                let attempts = error.attempts;
                Self::park(
                    &dead_letters,
                    FailedSideEffect::Notify { reference: ticket.reference.clone(), kind: Some(kind) },
                    error.to_string(),
                    attempts,
                );
            }
        })
    }

    fn issue_artifact(env: &TicketEnvironment, ticket: &Ticket) -> Effect<TicketAction> {
        let notifier = Arc::clone(&env.notifier);
        let retry = env.retry.clone();
        let dead_letters = env.dead_letters.clone();
        let ticket = ticket.clone();

        Effect::fire_and_forget(async move {
            let result = retry_with_backoff(&retry, "issue_ticket_artifact", || notifier.issue_ticket_artifact(&ticket)).await;
            if let Err(error) = result {
                let attempts = error.attempts;
                Self::park(
                    &dead_letters,
                    FailedSideEffect::Notify { reference: ticket.reference.clone(), kind: None },
                    error.to_string(),
                    attempts,
                );
            }
        })
    }
}

impl Reducer for TicketReducer {
    type State = BookingState;
    type Action = TicketAction;
    type Environment = TicketEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        let mut effects: Effects = smallvec![];
        let ledger = &mut state.ledger;

        let outcome = match action {
            TicketAction::Reserve {
                reference,
                user_id,
                site,
                visit_date,
                slot,
                visitors,
                addons,
            } => Self::reserve(ledger, env, &mut effects, reference, user_id, &site, visit_date, slot, visitors, &addons),

            TicketAction::ConfirmPayment {
                reference,
                order_id,
                payment_id,
                signature,
            } => Self::confirm_payment(ledger, env, &mut effects, &reference, order_id, payment_id, &signature),

            TicketAction::CheckIn {
                reference,
                staff_id,
                actual_visitors,
            } => Self::check_in(ledger, env, &mut effects, &reference, staff_id, actual_visitors),

            TicketAction::Cancel { reference, reason } => Self::cancel(ledger, env, &mut effects, &reference, &reason),

            TicketAction::Complete { reference } => Self::complete(ledger, env, &mut effects, &reference),

            TicketAction::Expire { reference } => Self::expire(ledger, env, &mut effects, &reference),

            TicketAction::SubmitFeedback {
                reference,
                rating,
                review,
            } => Self::submit_feedback(ledger, env, &mut effects, &reference, rating, review),

            TicketAction::Sweep => Ok(CommandOutcome::Swept(Self::sweep(ledger, env, &mut effects))),

            // Effect results do not touch last_outcome
            TicketAction::PaymentOrderCreated { reference, order_id } => {
                Self::record_order(ledger, env, &mut effects, &reference, order_id);
                return effects;
            },
            TicketAction::PaymentOrderFailed { reference, error } => {
                Self::abandon_without_order(ledger, env, &mut effects, &reference, &error);
                return effects;
            },
        };

        if let Err(error) = &outcome {
            tracing::debug!(code = error.code(), error = %error, "Command rejected");
        }
        state.last_outcome = Some(outcome);
        effects
    }
}
