//! Domain types for the visit booking engine.
//!
//! Value objects, entities and status enums shared by the pricing calculator,
//! availability index, reservation ledger and ticket lifecycle.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::pricing::PriceBreakdown;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

string_id!(
    /// Catalog identifier of a visitable site
    SiteId
);
string_id!(
    /// Opaque identifier of the booking user (supplied by the caller)
    UserId
);
string_id!(
    /// Identity of the staff member performing a check-in
    StaffId
);
string_id!(
    /// Human-presentable booking reference, e.g. `TAJ-20250314-7QX2KD`
    BookingReference
);
string_id!(
    /// Order identifier issued by the payment gateway
    OrderId
);
string_id!(
    /// Payment identifier issued by the payment gateway on capture
    PaymentId
);

/// Internal unique identifier of a ticket record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// Amount in minor currency units (cents, paise).
///
/// Percentages are expressed in basis points and always round half-up to a
/// whole minor unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Creates a `Money` value from whole major units, `None` on overflow
    #[must_use]
    pub const fn from_major(major: u64) -> Option<Self> {
        match major.checked_mul(100) {
            Some(minor) => Some(Self(minor)),
            None => None,
        }
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor(self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts with underflow checking
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies by a quantity with overflow checking
    #[must_use]
    pub const fn checked_mul(self, quantity: u64) -> Option<Self> {
        match self.0.checked_mul(quantity) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// `bps` basis points of this amount, rounded half-up
    ///
    /// `Money::from_minor(6000).percent_bps(1800)` is `1080`.
    #[must_use]
    pub fn percent_bps(self, bps: u32) -> Self {
        let scaled = u128::from(self.0) * u128::from(bps);
        let rounded = (scaled + 5_000) / 10_000;
        Self(u64::try_from(rounded).unwrap_or(u64::MAX))
    }

    /// Sums an iterator of amounts, `None` on overflow
    pub fn checked_sum(values: impl IntoIterator<Item = Self>) -> Option<Self> {
        values
            .into_iter()
            .try_fold(Self::ZERO, Self::checked_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Visitors and line items
// ============================================================================

/// A person covered by a ticket. Never a standalone entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visitor {
    /// Full name as printed on the ticket
    pub name: String,
    /// Age in years; drives discount eligibility
    pub age: i32,
    /// Nationality as declared by the booker
    #[serde(default)]
    pub nationality: String,
}

impl Visitor {
    /// Convenience constructor
    #[must_use]
    pub fn new(name: impl Into<String>, age: i32, nationality: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age,
            nationality: nationality.into(),
        }
    }
}

/// Optional extra purchased with a booking (audio guide, parking, ...)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonItem {
    /// Display name
    pub name: String,
    /// Unit price
    pub price: Money,
    /// Number of units
    pub quantity: u32,
}

// ============================================================================
// Time slots
// ============================================================================

/// `HH:MM` (de)serialization for wall-clock times
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as `HH:MM`
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format("%H:%M"))
    }

    /// Parse `HH:MM` or `HH:MM:SS`
    ///
    /// # Errors
    ///
    /// Fails when the string is not a valid time of day.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time '{raw}', expected HH:MM")))
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
#[must_use]
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

/// A fixed window within a day's operating hours. Derived, never persisted alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Window start (inclusive)
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    /// Window end (exclusive)
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeSlot {
    /// Create a slot
    #[must_use]
    pub const fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// The unit capacity is allocated against: one slot of one site on one date.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    /// Site
    pub site_id: SiteId,
    /// Visit date (site-local)
    pub date: NaiveDate,
    /// Window
    pub slot: TimeSlot,
}

impl SlotKey {
    /// Create a key
    #[must_use]
    pub const fn new(site_id: SiteId, date: NaiveDate, slot: TimeSlot) -> Self {
        Self { site_id, date, slot }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.site_id, self.date, self.slot)
    }
}

// ============================================================================
// Sites (owned by the Catalog)
// ============================================================================

/// Opening window for one weekday
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    /// Weekday these hours apply to
    pub weekday: Weekday,
    /// Opening time
    #[serde(with = "hhmm")]
    pub open: NaiveTime,
    /// Closing time
    #[serde(with = "hhmm")]
    pub close: NaiveTime,
}

/// Per-weekday operating hours. A weekday without an entry is closed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    /// Opening windows
    pub days: Vec<DayHours>,
}

impl OperatingHours {
    /// Same hours every day of the week
    #[must_use]
    pub fn daily(open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            days: ALL_WEEKDAYS
                .iter()
                .map(|&weekday| DayHours { weekday, open, close })
                .collect(),
        }
    }

    /// Remove the given weekdays
    #[must_use]
    pub fn closed_on(mut self, closed: &[Weekday]) -> Self {
        self.days.retain(|d| !closed.contains(&d.weekday));
        self
    }

    /// Hours for a weekday, `None` when closed
    #[must_use]
    pub fn for_weekday(&self, weekday: Weekday) -> Option<&DayHours> {
        self.days.iter().find(|d| d.weekday == weekday)
    }

    /// Hours for a calendar date, `None` when closed
    #[must_use]
    pub fn for_date(&self, date: NaiveDate) -> Option<&DayHours> {
        self.for_weekday(date.weekday())
    }
}

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// A visitable site as supplied by the Catalog. Immutable to the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Identifier
    pub id: SiteId,
    /// Short code used as the booking reference prefix
    pub code: String,
    /// Display name
    pub name: String,
    /// Concurrent visitor capacity per slot
    pub capacity: u32,
    /// Ticket price per visitor before discounts and tax
    pub base_price: Money,
    /// Opening hours
    pub operating_hours: OperatingHours,
    /// Offset of the site's civil time from UTC, in minutes
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Site {
    /// Site-local calendar date at `now`
    #[must_use]
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        local_date(self.utc_offset_minutes, now)
    }
}

/// Site-local calendar date for an offset.
#[must_use]
pub fn local_date(utc_offset_minutes: i32, now: DateTime<Utc>) -> NaiveDate {
    (now + Duration::minutes(i64::from(utc_offset_minutes))).date_naive()
}

/// The UTC instant of a site-local date and wall-clock time.
#[must_use]
pub fn local_instant(utc_offset_minutes: i32, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// Ticket lifecycle
// ============================================================================

/// Ticket status. See the lifecycle reducer for allowed transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Reserved, awaiting payment
    Booked,
    /// Paid
    Confirmed,
    /// Admitted at the gate
    CheckedIn,
    /// Visit over
    Completed,
    /// Cancelled by user or staff
    Cancelled,
    /// Never paid before the cutoff
    Expired,
}

impl TicketStatus {
    /// Statuses whose visitors count against slot capacity
    pub const ACTIVE: [Self; 3] = [Self::Booked, Self::Confirmed, Self::CheckedIn];

    /// Does this status hold capacity?
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Booked | Self::Confirmed | Self::CheckedIn)
    }

    /// Is this an end state?
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Wire label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Booked => "booked",
            Self::Confirmed => "confirmed",
            Self::CheckedIn => "checked_in",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booked" => Ok(Self::Booked),
            "confirmed" => Ok(Self::Confirmed),
            "checked_in" => Ok(Self::CheckedIn),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

/// Payment status of a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting gateway confirmation
    Pending,
    /// Captured
    Completed,
    /// Callback rejected
    Failed,
    /// Refund issued after cancellation
    Refunded,
    /// Ticket cancelled or expired before any capture
    Cancelled,
}

impl PaymentStatus {
    /// Wire label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Payment sub-record of a ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Status
    pub status: PaymentStatus,
    /// Amount due (the pricing total)
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Gateway order, once created
    pub order_id: Option<OrderId>,
    /// Gateway payment, once captured
    pub payment_id: Option<PaymentId>,
    /// Gateway transaction reference
    pub transaction_id: Option<String>,
    /// Capture time
    pub paid_at: Option<DateTime<Utc>>,
    /// Why the last callback was rejected
    pub failure_reason: Option<String>,
}

impl Payment {
    /// A fresh pending payment
    #[must_use]
    pub fn pending(amount: Money, currency: impl Into<String>) -> Self {
        Self {
            status: PaymentStatus::Pending,
            amount,
            currency: currency.into(),
            order_id: None,
            payment_id: None,
            transaction_id: None,
            paid_at: None,
            failure_reason: None,
        }
    }
}

/// Recorded when a ticket is cancelled
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    /// Reason supplied by the caller
    pub reason: String,
    /// Amount that had been paid
    pub paid: Money,
    /// Cancellation fee retained
    pub fee: Money,
    /// Amount returned to the payer
    pub refund_amount: Money,
    /// Minutes between cancellation and visit start
    pub minutes_before_visit: i64,
    /// When
    pub cancelled_at: DateTime<Utc>,
}

/// Recorded at the gate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIn {
    /// Headcount actually admitted
    pub actual_visitors: u32,
    /// Staff member who admitted the party
    pub staff_id: StaffId,
    /// When
    pub checked_in_at: DateTime<Utc>,
}

/// Post-visit feedback
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// 1..=5
    pub rating: u8,
    /// Free text
    pub review: Option<String>,
    /// When
    pub submitted_at: DateTime<Utc>,
}

/// The central entity: one booking for one slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Internal id
    pub id: TicketId,
    /// Booking reference
    pub reference: BookingReference,
    /// Owning user
    pub user_id: UserId,
    /// Site
    pub site_id: SiteId,
    /// Covered visitors, in booking order
    pub visitors: Vec<Visitor>,
    /// Visit date (site-local)
    pub visit_date: NaiveDate,
    /// Booked window
    pub slot: TimeSlot,
    /// Slot start as a UTC instant
    pub visit_starts_at: DateTime<Utc>,
    /// Slot end as a UTC instant
    pub visit_ends_at: DateTime<Utc>,
    /// Site offset used for "today" comparisons
    pub utc_offset_minutes: i32,
    /// Itemized price
    pub pricing: PriceBreakdown,
    /// Payment sub-record
    pub payment: Payment,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Set when cancelled
    pub cancellation: Option<Cancellation>,
    /// Set when checked in
    pub check_in: Option<CheckIn>,
    /// Set after a completed visit
    pub feedback: Option<Feedback>,
    /// Opaque gate-scan payload
    pub verification_payload: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Bumped by the ledger on every accepted mutation; orders repository writes
    #[serde(default)]
    pub version: u64,
}

impl Ticket {
    /// Number of booked visitors
    #[must_use]
    pub fn visitor_count(&self) -> u32 {
        u32::try_from(self.visitors.len()).unwrap_or(u32::MAX)
    }

    /// Capacity key this ticket occupies
    #[must_use]
    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.site_id.clone(), self.visit_date, self.slot)
    }

    /// Does this ticket currently hold capacity?
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Site-local date at `now`
    #[must_use]
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        local_date(self.utc_offset_minutes, now)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn money_displays_minor_units() {
        assert_eq!(Money::from_minor(7080).to_string(), "70.80");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_major(50).unwrap().minor(), 5000);
    }

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(Money::from_minor(6000).percent_bps(1800).minor(), 1080);
        // 10% of 0.05 is 0.005 -> 0.01
        assert_eq!(Money::from_minor(5).percent_bps(1000).minor(), 1);
        // 10% of 0.04 is 0.004 -> 0.00
        assert_eq!(Money::from_minor(4).percent_bps(1000).minor(), 0);
    }

    #[test]
    fn checked_sum_detects_overflow() {
        assert_eq!(
            Money::checked_sum([Money::from_minor(1), Money::from_minor(2)]),
            Some(Money::from_minor(3))
        );
        assert_eq!(Money::checked_sum([Money::from_minor(u64::MAX), Money::from_minor(1)]), None);
    }

    #[test]
    fn status_activity() {
        assert!(TicketStatus::Booked.is_active());
        assert!(TicketStatus::CheckedIn.is_active());
        assert!(!TicketStatus::Cancelled.is_active());
        assert!(TicketStatus::Expired.is_terminal());
        assert_eq!("checked_in".parse::<TicketStatus>().unwrap(), TicketStatus::CheckedIn);
        assert!("lost".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn missing_weekday_is_closed() {
        let hours = OperatingHours::daily(parse_time("09:00").unwrap(), parse_time("17:00").unwrap())
            .closed_on(&[Weekday::Fri]);
        // 2025-03-14 is a Friday
        assert!(hours.for_date(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()).is_none());
        assert!(hours.for_date(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()).is_some());
    }

    #[test]
    fn local_instant_applies_offset() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let instant = local_instant(330, date, parse_time("10:00").unwrap()).unwrap();
        assert_eq!(instant.to_rfc3339(), "2025-03-14T04:30:00+00:00");
        assert_eq!(local_date(330, instant), date);
    }

    #[test]
    fn slot_serializes_as_hh_mm() {
        let slot = TimeSlot::new(parse_time("10:00").unwrap(), parse_time("12:00").unwrap());
        let json = serde_json::to_string(&slot).unwrap();
        assert_eq!(json, r#"{"start":"10:00","end":"12:00"}"#);
        let back: TimeSlot = serde_json::from_str(r#"{"start":"10:00:00","end":"12:00"}"#).unwrap();
        assert_eq!(back, slot);
        assert_eq!(slot.to_string(), "10:00-12:00");
    }
}
