//! Payment gateway collaborator.
//!
//! The engine creates an order after a reservation commits and later receives
//! the gateway's callback. Callbacks are authenticated with an HMAC over
//! `order_id|payment_id` using the shared webhook secret.

use crate::types::{BookingReference, Money, OrderId, PaymentId};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, PaymentGatewayError>;

/// Boxed gateway future
pub type GatewayFuture<T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send>>;

/// Payment gateway error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentGatewayError {
    /// Gateway refused the request
    #[error("gateway declined: {reason}")]
    Declined {
        /// Decline reason
        reason: String,
    },
    /// Gateway did not answer in time
    #[error("gateway timeout")]
    Timeout,
    /// Other error
    #[error("payment error: {message}")]
    Other {
        /// Error message
        message: String,
    },
}

/// An order awaiting capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOrder {
    /// Gateway order id
    pub order_id: OrderId,
    /// Amount to capture
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
}

/// A processed refund
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    /// Gateway refund id
    pub refund_id: String,
    /// Order refunded
    pub order_id: OrderId,
    /// Amount returned
    pub amount: Money,
}

/// Payment gateway trait
pub trait PaymentGateway: Send + Sync {
    /// Create an order for a reservation
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses or cannot be reached
    fn create_order(&self, reference: &BookingReference, amount: Money, currency: &str) -> GatewayFuture<PaymentOrder>;

    /// Refund part or all of a captured payment
    ///
    /// # Errors
    ///
    /// Returns error if the refund fails
    fn refund(&self, order_id: &OrderId, payment_id: Option<&PaymentId>, amount: Money) -> GatewayFuture<RefundReceipt>;
}

/// Authenticates gateway callbacks
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Arc<[u8]>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SignatureVerifier(..)")
    }
}

impl SignatureVerifier {
    /// Verifier for the shared webhook secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret.as_bytes()),
        }
    }

    fn mac(&self, order_id: &OrderId, payment_id: &PaymentId) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(order_id.as_str().as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_str().as_bytes());
        Some(mac)
    }

    /// Hex signature the gateway sends for this order and payment
    #[must_use]
    pub fn sign(&self, order_id: &OrderId, payment_id: &PaymentId) -> String {
        self.mac(order_id, payment_id)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    /// Constant-time check of a callback signature
    #[must_use]
    pub fn verify(&self, order_id: &OrderId, payment_id: &PaymentId, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        self.mac(order_id, payment_id)
            .is_some_and(|mac| mac.verify_slice(&expected).is_ok())
    }
}

/// In-process gateway for development and tests.
///
/// Orders always succeed unless [`MockPaymentGateway::set_failing`] is on.
/// Refunds are recorded and can be inspected.
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    latency: Duration,
    failing: Arc<AtomicBool>,
    refunds: Arc<Mutex<Vec<RefundReceipt>>>,
}

impl MockPaymentGateway {
    /// Creates a new mock payment gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate network latency on every call
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new())
    }

    /// Make every call fail with a timeout
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Refunds processed so far
    #[must_use]
    pub fn refunds(&self) -> Vec<RefundReceipt> {
        self.refunds
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_order(&self, reference: &BookingReference, amount: Money, currency: &str) -> GatewayFuture<PaymentOrder> {
        let latency = self.latency;
        let failing = self.failing.load(Ordering::SeqCst);
        let reference = reference.clone();
        let currency = currency.to_string();

        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if failing {
                return Err(PaymentGatewayError::Timeout);
            }

            let order_id = OrderId::new(format!("order_{}", uuid::Uuid::new_v4().simple()));
            tracing::info!(
                reference = %reference,
                order_id = %order_id,
                amount = amount.minor(),
                "Mock payment order created"
            );
            Ok(PaymentOrder {
                order_id,
                amount,
                currency,
            })
        })
    }

    fn refund(&self, order_id: &OrderId, payment_id: Option<&PaymentId>, amount: Money) -> GatewayFuture<RefundReceipt> {
        let latency = self.latency;
        let failing = self.failing.load(Ordering::SeqCst);
        let refunds = Arc::clone(&self.refunds);
        let order_id = order_id.clone();
        let payment_id = payment_id.cloned();

        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if failing {
                return Err(PaymentGatewayError::Timeout);
            }

            let receipt = RefundReceipt {
                refund_id: format!("rfnd_{}", uuid::Uuid::new_v4().simple()),
                order_id,
                amount,
            };
            tracing::info!(
                order_id = %receipt.order_id,
                payment_id = ?payment_id.as_ref().map(PaymentId::as_str),
                amount = amount.minor(),
                "Mock refund processed"
            );
            refunds
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(receipt.clone());
            Ok(receipt)
        })
    }
}
