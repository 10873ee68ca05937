//! Circuit breaker pattern for preventing cascading failures.
//!
//! A circuit breaker counts consecutive failures of a collaborator and "opens"
//! once they reach a threshold. While open, calls fail immediately without
//! reaching the collaborator, which is what lets a reservation fail fast when
//! the catalog is down instead of queueing behind timeouts.
//!
//! # States
//!
//! - **Closed**: Normal operation. Failures are counted.
//! - **Open**: Calls are rejected until the open timeout elapses.
//! - **HalfOpen**: Trial calls are let through; enough successes close the circuit.
//!
//! # Example
//!
//! ```rust
//! use booking_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::builder()
//!         .failure_threshold(5)
//!         .timeout(Duration::from_secs(30))
//!         .build(),
//! );
//!
//! let result = breaker.call(|| async { Ok::<_, String>(42) }).await;
//! assert_eq!(result.ok(), Some(42));
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: usize,
    /// Duration to wait before transitioning from Open to `HalfOpen`
    pub timeout: Duration,
    /// Successes in `HalfOpen` before closing the circuit
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Consecutive failures that open the circuit.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: usize) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// How long to stay open before letting a trial call through.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.config.timeout = duration;
        self
    }

    /// Successful trial calls needed to close the circuit.
    #[must_use]
    pub const fn success_threshold(mut self, threshold: usize) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        self.config
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, testing if the collaborator recovered
    HalfOpen,
}

impl State {
    /// Lowercase label for logs and health reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, request rejected without calling through
    #[error("Circuit breaker is open")]
    Open,
    /// The wrapped operation failed
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: State,
    failure_count: usize,
    success_count: usize,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding one collaborator.
///
/// Cloning shares the same breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("default", config)
    }

    /// Create a circuit breaker whose transitions are logged under `name`.
    #[must_use]
    pub fn named(name: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            name: Arc::from(name),
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner {
                state: State::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Call an operation through the circuit breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] without calling `operation` while
    /// the circuit is open, or [`CircuitBreakerError::Inner`] when it fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            metrics::counter!("circuit_breaker_rejections_total", "breaker" => self.name.to_string())
                .increment(1);
            tracing::warn!(breaker = %self.name, "Circuit breaker is open, rejecting call");
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            },
            Err(error) => {
                self.on_failure();
                Err(CircuitBreakerError::Inner(error))
            },
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let elapsed = inner.opened_at.map_or(Duration::MAX, |at| at.elapsed());
                if elapsed >= self.config.timeout {
                    tracing::info!(breaker = %self.name, "Circuit breaker transitioning OPEN -> HALF_OPEN");
                    inner.state = State::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            },
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            State::Closed | State::Open => inner.failure_count = 0,
            State::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(breaker = %self.name, "Circuit breaker transitioning HALF_OPEN -> CLOSED");
                    inner.state = State::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                }
            },
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            State::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker transitioning CLOSED -> OPEN"
                    );
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            },
            State::HalfOpen => {
                tracing::warn!(breaker = %self.name, "Circuit breaker transitioning HALF_OPEN -> OPEN (recovery failed)");
                inner.state = State::Open;
                inner.success_count = 0;
                inner.opened_at = Some(Instant::now());
            },
            State::Open => inner.failure_count += 1,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::named(
            "test",
            CircuitBreakerConfig::builder()
                .failure_threshold(2)
                .timeout(timeout)
                .success_threshold(1)
                .build(),
        )
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| async { Err::<(), _>("down") }).await;
    }

    #[tokio::test]
    async fn opens_after_threshold_and_rejects_without_calling() {
        let breaker = breaker(Duration::from_secs(60));
        fail(&breaker).await;
        assert_eq!(breaker.state(), State::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state(), State::Open);

        let calls = AtomicUsize::new(0);
        let result = breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_success_closes_circuit() {
        let breaker = breaker(Duration::from_millis(10));
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), State::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let value = breaker.call(|| async { Ok::<_, &str>(5) }).await.unwrap();

        assert_eq!(value, 5);
        assert_eq!(breaker.state(), State::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = breaker(Duration::from_millis(10));
        fail(&breaker).await;
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        fail(&breaker).await;
        assert_eq!(breaker.state(), State::Open);
        assert_eq!(breaker.state().as_str(), "open");
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = breaker(Duration::from_secs(60));
        fail(&breaker).await;
        breaker.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
        fail(&breaker).await;
        assert_eq!(breaker.state(), State::Closed);
    }
}
