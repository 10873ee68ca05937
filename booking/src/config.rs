//! Configuration for the booking engine.
//!
//! Loads configuration from environment variables with sensible defaults.
//! The server binary calls `dotenvy::dotenv()` first so a local `.env` file
//! can provide any of them.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use booking_runtime::circuit_breaker::CircuitBreakerConfig;
use booking_runtime::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::persistence::PersistenceBackend;
use crate::policy::{BookingRules, CancellationPolicy, ExpiryPolicy};
use crate::pricing::PricingPolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server
    pub server: ServerConfig,
    /// Business rules
    pub booking: BookingConfig,
    /// Gateway callback and gate payload secrets
    pub security: SecurityConfig,
    /// Ticket storage and site catalog
    pub storage: StorageConfig,
    /// Retry, circuit breaker and dead letter settings
    pub resilience: ResilienceConfig,
    /// Housekeeping sweeper
    pub sweeper: SweeperConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Business rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Slot width in minutes
    pub slot_width_minutes: u32,
    /// Largest party per ticket
    pub max_visitors_per_booking: usize,
    /// ISO currency for payment orders
    pub currency: String,
    /// Tax rate in basis points
    pub tax_bps: u32,
    /// Minutes an unpaid reservation holds capacity
    pub payment_window_minutes: u32,
    /// Cancellation needs more than this many hours of notice
    pub cancellation_notice_hours: u32,
    /// Below this many hours a fee is charged
    pub cancellation_fee_window_hours: u32,
    /// Cancellation fee in basis points
    pub cancellation_fee_bps: u32,
    /// Attempts at generating an unused booking reference
    pub reference_attempts: usize,
}

/// Secrets
#[derive(Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Shared secret for payment callback signatures
    pub payment_webhook_secret: String,
    /// HMAC key for verification payloads; unsigned payloads when absent
    pub payload_signing_key: Option<String>,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("payment_webhook_secret", &"<redacted>")
            .field("payload_signing_key", &self.payload_signing_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Ticket repository
    pub backend: PersistenceBackend,
    /// JSON file of sites; the demo catalog when absent
    pub catalog_seed: Option<PathBuf>,
}

/// Resilience configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Retries after the first side-effect attempt
    pub retry_max_retries: usize,
    /// First backoff delay in milliseconds
    pub retry_initial_delay_ms: u64,
    /// Backoff cap in milliseconds
    pub retry_max_delay_ms: u64,
    /// Consecutive catalog failures that open the breaker
    pub breaker_failure_threshold: usize,
    /// Seconds the breaker stays open
    pub breaker_timeout_secs: u64,
    /// Trial successes that close the breaker
    pub breaker_success_threshold: usize,
    /// Dead letter queue capacity
    pub dead_letter_capacity: usize,
}

/// Sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Seconds between sweeps; 0 disables the sweeper
    pub interval_secs: u64,
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to their defaults. Setting
    /// `DATABASE_URL` selects the Postgres backend.
    #[must_use]
    pub fn from_env() -> Self {
        let backend = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => PersistenceBackend::Postgres {
                url,
                max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10),
            },
            _ => PersistenceBackend::InMemory,
        };

        Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parsed("PORT", 8080),
                shutdown_timeout: parsed("SHUTDOWN_TIMEOUT", 30),
            },
            booking: BookingConfig {
                slot_width_minutes: parsed("BOOKING_SLOT_WIDTH_MINUTES", 120),
                max_visitors_per_booking: parsed("BOOKING_MAX_VISITORS", 10),
                currency: env::var("BOOKING_CURRENCY").unwrap_or_else(|_| "INR".to_string()),
                tax_bps: parsed("BOOKING_TAX_BPS", 1_800),
                payment_window_minutes: parsed("BOOKING_PAYMENT_WINDOW_MINUTES", 30),
                cancellation_notice_hours: parsed("BOOKING_CANCELLATION_NOTICE_HOURS", 24),
                cancellation_fee_window_hours: parsed("BOOKING_CANCELLATION_FEE_WINDOW_HOURS", 48),
                cancellation_fee_bps: parsed("BOOKING_CANCELLATION_FEE_BPS", 1_000),
                reference_attempts: parsed("BOOKING_REFERENCE_ATTEMPTS", 5),
            },
            security: SecurityConfig {
                payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET")
                    .unwrap_or_else(|_| "dev-webhook-secret-change-in-production".to_string()),
                payload_signing_key: env::var("PAYLOAD_SIGNING_KEY").ok().filter(|k| !k.is_empty()),
            },
            storage: StorageConfig {
                backend,
                catalog_seed: env::var("CATALOG_SEED_FILE").ok().map(PathBuf::from),
            },
            resilience: ResilienceConfig {
                retry_max_retries: parsed("RETRY_MAX_RETRIES", 3),
                retry_initial_delay_ms: parsed("RETRY_INITIAL_DELAY_MS", 100),
                retry_max_delay_ms: parsed("RETRY_MAX_DELAY_MS", 5_000),
                breaker_failure_threshold: parsed("CATALOG_BREAKER_FAILURES", 5),
                breaker_timeout_secs: parsed("CATALOG_BREAKER_TIMEOUT", 30),
                breaker_success_threshold: parsed("CATALOG_BREAKER_SUCCESSES", 1),
                dead_letter_capacity: parsed("DEAD_LETTER_CAPACITY", 1_000),
            },
            sweeper: SweeperConfig {
                interval_secs: parsed("SWEEP_INTERVAL", 60),
            },
        }
    }

    /// Business rules for the reducer
    #[must_use]
    pub fn rules(&self) -> BookingRules {
        let booking = &self.booking;
        BookingRules {
            slot_width: chrono::Duration::minutes(i64::from(booking.slot_width_minutes)),
            max_visitors_per_booking: booking.max_visitors_per_booking,
            currency: booking.currency.clone(),
            pricing: PricingPolicy {
                tax_bps: booking.tax_bps,
                ..PricingPolicy::default()
            },
            cancellation: CancellationPolicy {
                minimum_notice: chrono::Duration::hours(i64::from(booking.cancellation_notice_hours)),
                fee_window: chrono::Duration::hours(i64::from(booking.cancellation_fee_window_hours)),
                fee_bps: booking.cancellation_fee_bps,
            },
            expiry: ExpiryPolicy {
                payment_window: chrono::Duration::minutes(i64::from(booking.payment_window_minutes)),
            },
        }
    }

    /// Backoff for side effects
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.resilience.retry_max_retries)
            .initial_delay(Duration::from_millis(self.resilience.retry_initial_delay_ms))
            .max_delay(Duration::from_millis(self.resilience.retry_max_delay_ms))
            .build()
    }

    /// Breaker around catalog lookups
    #[must_use]
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .failure_threshold(self.resilience.breaker_failure_threshold)
            .timeout(Duration::from_secs(self.resilience.breaker_timeout_secs))
            .success_threshold(self.resilience.breaker_success_threshold)
            .build()
    }

    /// Sweep period, `None` when disabled
    #[must_use]
    pub const fn sweep_interval(&self) -> Option<Duration> {
        match self.sweeper.interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// `host:port` to bind
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                shutdown_timeout: 30,
            },
            booking: BookingConfig {
                slot_width_minutes: 120,
                max_visitors_per_booking: 10,
                currency: "INR".to_string(),
                tax_bps: 1_800,
                payment_window_minutes: 30,
                cancellation_notice_hours: 24,
                cancellation_fee_window_hours: 48,
                cancellation_fee_bps: 1_000,
                reference_attempts: 5,
            },
            security: SecurityConfig {
                payment_webhook_secret: "dev-webhook-secret-change-in-production".to_string(),
                payload_signing_key: None,
            },
            storage: StorageConfig {
                backend: PersistenceBackend::InMemory,
                catalog_seed: None,
            },
            resilience: ResilienceConfig {
                retry_max_retries: 3,
                retry_initial_delay_ms: 100,
                retry_max_delay_ms: 5_000,
                breaker_failure_threshold: 5,
                breaker_timeout_secs: 30,
                breaker_success_threshold: 1,
                dead_letter_capacity: 1_000,
            },
            sweeper: SweeperConfig { interval_secs: 60 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_match_built_in_policy() {
        assert_eq!(Config::default().rules(), BookingRules::default());
    }

    #[test]
    fn zero_interval_disables_sweeper() {
        let mut config = Config::default();
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(60)));
        config.sweeper.interval_secs = 0;
        assert_eq!(config.sweep_interval(), None);
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let mut config = Config::default();
        config.security.payload_signing_key = Some("super-secret".to_string());
        let rendered = format!("{:?}", config.security);
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("dev-webhook"));
    }
}
