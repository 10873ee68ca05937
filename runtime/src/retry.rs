//! Retry logic with exponential backoff for handling transient failures.
//!
//! Used for collaborator calls that run as effects outside the capacity
//! critical section (payment orders, refunds, ticket artifacts, persistence).
//!
//! # Example
//!
//! ```rust
//! use booking_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .build();
//!
//! let value = retry_with_backoff(&policy, "example", || async {
//!     Ok::<_, String>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// Defaults: 3 retries, 100ms initial delay, 30s cap, multiplier 2.0, jitter on.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first call
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Randomize each delay within `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (zero based), without jitter.
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    pub fn base_delay(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    /// Backoff before retry number `attempt`, with jitter if enabled.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let half = base / 2;
        let spread = base.saturating_sub(half);
        let extra = rand::thread_rng().gen_range(0.0..=1.0_f64);
        half + spread.mul_f64(extra)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// The operation failed on every attempt, or failed with a non-retryable error.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {error}")]
pub struct RetryError<E: std::fmt::Display> {
    /// Label of the operation
    pub operation: String,
    /// Calls made, including the first
    pub attempts: usize,
    /// Last error returned
    pub error: E,
}

/// Retry an async operation with exponential backoff.
///
/// # Errors
///
/// Returns [`RetryError`] carrying the last error once `max_retries` retries
/// have been spent.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: &str,
    call: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, operation, call, |_| true).await
}

/// Retry an async operation while `is_retryable` accepts the error.
///
/// # Errors
///
/// Returns [`RetryError`] immediately for a non-retryable error, or with the
/// last error once retries are exhausted.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match call().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            },
            Err(error) => {
                if !is_retryable(&error) {
                    tracing::warn!(operation, %error, "Error is not retryable, failing immediately");
                    return Err(RetryError {
                        operation: operation.to_string(),
                        attempts: attempt + 1,
                        error,
                    });
                }

                if attempt >= policy.max_retries {
                    tracing::error!(operation, attempt, %error, "Operation failed after max retries");
                    return Err(RetryError {
                        operation: operation.to_string(),
                        attempts: attempt + 1,
                        error,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    %error,
                    "Operation failed, retrying"
                );

                sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .jitter(false)
            .build()
    }

    #[test]
    fn base_delay_doubles_until_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .jitter(false)
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_within_half_and_full(attempt in 0usize..40) {
            let policy = RetryPolicy::default();
            let base = policy.base_delay(attempt);
            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay <= base);
            prop_assert!(delay >= base / 2);
            prop_assert!(base <= policy.max_delay);
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff(&fast_policy(3), "flaky", || {
            let c = Arc::clone(&counter);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient")
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reports_attempts_when_exhausted() {
        let result = retry_with_backoff(&fast_policy(2), "always-down", || async {
            Err::<(), _>("down")
        })
        .await;

        let error = result.unwrap_err();
        assert_eq!(error.attempts, 3);
        assert_eq!(error.error, "down");
        assert_eq!(error.to_string(), "always-down failed after 3 attempt(s): down");
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_predicate(
            &fast_policy(5),
            "rejected",
            || {
                let c = Arc::clone(&counter);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("permanent")
                }
            },
            |error: &&str| error.contains("transient"),
        )
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
