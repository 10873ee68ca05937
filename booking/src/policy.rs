//! Time-windowed lifecycle policies: cancellation notice and refund fee,
//! payment window for unpaid reservations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::availability::DEFAULT_SLOT_WIDTH_MINUTES;
use crate::pricing::PricingPolicy;
use crate::types::{Money, PaymentStatus, Ticket, TicketStatus};

/// Business rules injected into the lifecycle reducer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingRules {
    /// Width of each bookable window
    pub slot_width: Duration,
    /// Largest party on one ticket
    pub max_visitors_per_booking: usize,
    /// ISO currency for payment orders
    pub currency: String,
    /// Price calculator settings
    pub pricing: PricingPolicy,
    /// Notice and fee rules
    pub cancellation: CancellationPolicy,
    /// Payment window for unpaid tickets
    pub expiry: ExpiryPolicy,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            slot_width: Duration::minutes(i64::from(DEFAULT_SLOT_WIDTH_MINUTES)),
            max_visitors_per_booking: 10,
            currency: "INR".to_string(),
            pricing: PricingPolicy::default(),
            cancellation: CancellationPolicy::default(),
            expiry: ExpiryPolicy::default(),
        }
    }
}

/// Refund owed on cancellation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundBreakdown {
    /// Amount that had been captured
    pub paid: Money,
    /// Fee retained
    pub fee: Money,
    /// Amount returned
    pub refund: Money,
    /// Whole hours between cancellation and visit start
    pub hours_before_visit: i64,
    /// Minutes between cancellation and visit start
    pub minutes_before_visit: i64,
}

/// Cancellation refused by the notice rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TooLateToCancel {
    /// Time left before the visit (may be negative)
    pub remaining: Duration,
}

/// Notice and fee rules for cancellations
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancellationPolicy {
    /// Cancellation needs strictly more than this much notice
    pub minimum_notice: Duration,
    /// Inside this window a fee is charged
    pub fee_window: Duration,
    /// Fee in basis points of the paid amount
    pub fee_bps: u32,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            minimum_notice: Duration::hours(24),
            fee_window: Duration::hours(48),
            fee_bps: 1_000,
        }
    }
}

impl CancellationPolicy {
    /// Compute the refund for cancelling at `now` a visit starting at `visit_starts_at`.
    ///
    /// # Errors
    ///
    /// [`TooLateToCancel`] when the remaining time is not more than the minimum notice.
    pub fn refund(
        &self,
        now: DateTime<Utc>,
        visit_starts_at: DateTime<Utc>,
        paid: Money,
    ) -> Result<RefundBreakdown, TooLateToCancel> {
        let remaining = visit_starts_at - now;
        if remaining <= self.minimum_notice {
            return Err(TooLateToCancel { remaining });
        }

        let fee = if remaining < self.fee_window {
            paid.percent_bps(self.fee_bps)
        } else {
            Money::ZERO
        };

        Ok(RefundBreakdown {
            paid,
            fee,
            refund: paid.checked_sub(fee).unwrap_or(Money::ZERO),
            hours_before_visit: remaining.num_hours(),
            minutes_before_visit: remaining.num_minutes(),
        })
    }
}

/// The amount captured for a ticket, zero if payment never completed
#[must_use]
pub fn paid_amount(ticket: &Ticket) -> Money {
    if ticket.payment.status == PaymentStatus::Completed {
        ticket.pricing.total
    } else {
        Money::ZERO
    }
}

/// How long an unpaid reservation holds its capacity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiryPolicy {
    /// Time allowed for payment after reserving
    pub payment_window: Duration,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            payment_window: Duration::minutes(30),
        }
    }
}

impl ExpiryPolicy {
    /// The instant after which an unpaid ticket may be expired
    #[must_use]
    pub fn cutoff(&self, ticket: &Ticket) -> DateTime<Utc> {
        (ticket.created_at + self.payment_window).min(ticket.visit_starts_at)
    }

    /// Is the ticket still unpaid and past its cutoff?
    #[must_use]
    pub fn is_due(&self, ticket: &Ticket, now: DateTime<Utc>) -> bool {
        ticket.status == TicketStatus::Booked
            && matches!(ticket.payment.status, PaymentStatus::Pending | PaymentStatus::Failed)
            && now >= self.cutoff(ticket)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ledger::tests::ticket;
    use chrono::TimeZone;

    fn visit() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 15, 10, 0, 0).unwrap()
    }

    fn paid() -> Money {
        Money::from_minor(7_080)
    }

    #[test]
    fn exactly_48_hours_is_full_refund() {
        let refund = CancellationPolicy::default()
            .refund(visit() - Duration::hours(48), visit(), paid())
            .unwrap();
        assert_eq!(refund.fee, Money::ZERO);
        assert_eq!(refund.refund, paid());
        assert_eq!(refund.hours_before_visit, 48);
    }

    #[test]
    fn one_minute_inside_fee_window_charges_ten_percent() {
        let now = visit() - Duration::hours(47) - Duration::minutes(59);
        let refund = CancellationPolicy::default().refund(now, visit(), paid()).unwrap();
        assert_eq!(refund.fee, Money::from_minor(708));
        assert_eq!(refund.refund, Money::from_minor(6_372));
        assert_eq!(refund.minutes_before_visit, 47 * 60 + 59);
    }

    #[test]
    fn twenty_four_hours_or_less_is_refused() {
        let policy = CancellationPolicy::default();
        let now = visit() - Duration::hours(23) - Duration::minutes(59);
        assert!(policy.refund(now, visit(), paid()).is_err());
        assert!(policy.refund(visit() - Duration::hours(24), visit(), paid()).is_err());
        assert!(
            policy
                .refund(visit() - Duration::hours(24) - Duration::minutes(1), visit(), paid())
                .is_ok()
        );
    }

    #[test]
    fn unpaid_ticket_refunds_nothing() {
        let refund = CancellationPolicy::default()
            .refund(visit() - Duration::hours(30), visit(), Money::ZERO)
            .unwrap();
        assert_eq!(refund.fee, Money::ZERO);
        assert_eq!(refund.refund, Money::ZERO);
    }

    #[test]
    fn expiry_cutoff_is_payment_window_or_visit_start() {
        let policy = ExpiryPolicy::default();
        let booked = ticket("A", "u1", 1);
        assert_eq!(policy.cutoff(&booked), booked.created_at + Duration::minutes(30));
        assert!(!policy.is_due(&booked, booked.created_at + Duration::minutes(29)));
        assert!(policy.is_due(&booked, booked.created_at + Duration::minutes(30)));

        let mut late = ticket("B", "u1", 1);
        late.created_at = late.visit_starts_at - Duration::minutes(10);
        assert_eq!(policy.cutoff(&late), late.visit_starts_at);
    }

    #[test]
    fn paid_tickets_never_expire() {
        let mut confirmed = ticket("A", "u1", 1);
        confirmed.status = TicketStatus::Confirmed;
        confirmed.payment.status = PaymentStatus::Completed;
        assert!(!ExpiryPolicy::default().is_due(&confirmed, confirmed.visit_starts_at));
        assert_eq!(paid_amount(&confirmed), confirmed.pricing.total);
    }
}
