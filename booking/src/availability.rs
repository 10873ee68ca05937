//! Slot availability index.
//!
//! Slots are derived on read: a site's opening hours for the requested
//! weekday are cut into fixed-width windows and each window's committed
//! occupancy is subtracted from the site capacity. The index is never the
//! source of truth; the reservation ledger re-checks capacity at commit time.

use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::types::{DayHours, Money, Site, SlotKey, Ticket, TimeSlot};

/// Default slot width (two hours)
pub const DEFAULT_SLOT_WIDTH_MINUTES: u32 = 120;

/// Anything that can report committed occupancy per slot.
///
/// Implemented by the ledger's maintained counters and by a plain ticket
/// slice, which derives the same number by scanning.
pub trait CommittedOccupancy {
    /// Visitors of active tickets holding `key`
    fn committed(&self, key: &SlotKey) -> u32;
}

impl CommittedOccupancy for [Ticket] {
    fn committed(&self, key: &SlotKey) -> u32 {
        self.iter()
            .filter(|t| t.is_active() && t.site_id == key.site_id && t.visit_date == key.date && t.slot == key.slot)
            .map(Ticket::visitor_count)
            .fold(0u32, u32::saturating_add)
    }
}

/// Remaining capacity of one window
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAvailability {
    /// Window
    pub slot: TimeSlot,
    /// Site capacity
    pub capacity: u32,
    /// Visitors already holding the window
    pub committed: u32,
    /// `capacity − committed`
    pub available: u32,
    /// Per-visitor base price
    pub price: Money,
}

/// Cut one day's hours into `[open, open + w)`, `[open + w, open + 2w)`, ...
///
/// A trailing window that would end after closing is not offered.
#[must_use]
pub fn partition(hours: &DayHours, width: Duration) -> Vec<TimeSlot> {
    let width_secs = width.num_seconds();
    if width_secs <= 0 {
        return Vec::new();
    }

    let open = i64::from(hours.open.num_seconds_from_midnight());
    let close = i64::from(hours.close.num_seconds_from_midnight());

    let mut slots = Vec::new();
    let mut start = open;
    while start + width_secs <= close {
        if let (Some(from), Some(to)) = (time_at(start), time_at(start + width_secs)) {
            slots.push(TimeSlot::new(from, to));
        }
        start += width_secs;
    }
    slots
}

fn time_at(seconds: i64) -> Option<NaiveTime> {
    let seconds = u32::try_from(seconds).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0)
}

/// Every window the site offers on `date`; empty when closed.
#[must_use]
pub fn windows_for_date(site: &Site, date: NaiveDate, width: Duration) -> Vec<TimeSlot> {
    site.operating_hours
        .for_date(date)
        .map(|hours| partition(hours, width))
        .unwrap_or_default()
}

/// Windows on `date` with at least one free place.
///
/// Returns an empty list when the site is closed that weekday.
#[must_use]
pub fn available_slots<O>(site: &Site, date: NaiveDate, width: Duration, occupancy: &O) -> Vec<SlotAvailability>
where
    O: CommittedOccupancy + ?Sized,
{
    windows_for_date(site, date, width)
        .into_iter()
        .filter_map(|slot| {
            let key = SlotKey::new(site.id.clone(), date, slot);
            let committed = occupancy.committed(&key);
            let available = site.capacity.saturating_sub(committed);
            (available > 0).then_some(SlotAvailability {
                slot,
                capacity: site.capacity,
                committed,
                available,
                price: site.base_price,
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{OperatingHours, SiteId, parse_time};
    use chrono::Weekday;

    fn t(raw: &str) -> NaiveTime {
        parse_time(raw).unwrap()
    }

    fn site(capacity: u32) -> Site {
        Site {
            id: SiteId::from("qutub-minar"),
            code: "QTB".to_string(),
            name: "Qutub Minar".to_string(),
            capacity,
            base_price: Money::from_minor(5_000),
            operating_hours: OperatingHours::daily(t("09:00"), t("17:00")).closed_on(&[Weekday::Mon]),
            utc_offset_minutes: 0,
        }
    }

    struct Fixed(u32);

    impl CommittedOccupancy for Fixed {
        fn committed(&self, key: &SlotKey) -> u32 {
            if key.slot.start == t("11:00") { self.0 } else { 0 }
        }
    }

    // 2025-03-15 is a Saturday, 2025-03-17 a Monday
    fn saturday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
    }

    #[test]
    fn partitions_into_two_hour_windows() {
        let slots = windows_for_date(&site(10), saturday(), Duration::minutes(120));
        let labels: Vec<String> = slots.iter().map(ToString::to_string).collect();
        assert_eq!(labels, vec!["09:00-11:00", "11:00-13:00", "13:00-15:00", "15:00-17:00"]);
    }

    #[test]
    fn drops_trailing_partial_window() {
        let hours = DayHours {
            weekday: Weekday::Sat,
            open: t("09:00"),
            close: t("16:30"),
        };
        let slots = partition(&hours, Duration::minutes(120));
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[2].end, t("15:00"));
    }

    #[test]
    fn closed_weekday_returns_nothing() {
        let monday = NaiveDate::from_ymd_opt(2025, 3, 17).unwrap();
        assert!(available_slots(&site(10), monday, Duration::minutes(120), &Fixed(0)).is_empty());
    }

    #[test]
    fn full_window_is_hidden() {
        let slots = available_slots(&site(10), saturday(), Duration::minutes(120), &Fixed(10));
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|s| s.slot.start != t("11:00")));
    }

    #[test]
    fn partially_booked_window_reports_remaining() {
        let slots = available_slots(&site(10), saturday(), Duration::minutes(120), &Fixed(7));
        let eleven = slots.iter().find(|s| s.slot.start == t("11:00")).unwrap();
        assert_eq!(eleven.committed, 7);
        assert_eq!(eleven.available, 3);
        assert_eq!(eleven.price, Money::from_minor(5_000));
    }

    #[test]
    fn zero_width_yields_no_windows() {
        assert!(windows_for_date(&site(10), saturday(), Duration::zero()).is_empty());
    }
}
