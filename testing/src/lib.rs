//! # Booking Testing
//!
//! Testing utilities for reducers built on `booking-core`.
//!
//! - [`mocks`]: deterministic clocks
//! - [`ReducerTest`]: Given-When-Then builder for a single reducer step
//! - [`assertions`]: helpers for inspecting returned effects

use booking_core::environment::Clock;
use chrono::{DateTime, Duration, Utc};


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use booking_testing::mocks::FixedClock;
    /// use booking_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the environment under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = time;
        }

        /// Move forward by `by`.
        pub fn advance(&self, by: Duration) {
            let mut time = self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_clock().now());
        let handle = clock.clone();

        handle.advance(Duration::hours(49));

        assert_eq!(clock.now() - test_clock().now(), Duration::hours(49));
    }
}
