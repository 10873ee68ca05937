//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use booking_testing::ManualClock;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use visit_booking::{
    BookingApp, BookingEngine, Config, ReserveRequest,
    catalog::InMemoryCatalog,
    notification::LoggingNotifier,
    payment_gateway::{MockPaymentGateway, SignatureVerifier},
    persistence::InMemoryTicketRepository,
    types::{BookingReference, OrderId, PaymentId, SiteId, Ticket, TimeSlot, UserId, Visitor, parse_time},
};

pub const WEBHOOK_SECRET: &str = "integration-webhook-secret";
pub const SIGNING_KEY: &str = "integration-signing-key";

/// 2025-03-10 09:00 IST
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 3, 30, 0).unwrap()
}

/// Saturday; the Taj Mahal is open
pub fn visit_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
}

/// 06:00 IST on the visit date
pub fn visit_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 15, 0, 30, 0).unwrap()
}

pub fn morning() -> TimeSlot {
    TimeSlot::new(parse_time("06:00").unwrap(), parse_time("08:00").unwrap())
}

pub fn taj() -> SiteId {
    SiteId::from("taj-mahal")
}

pub fn visitors(n: usize) -> Vec<Visitor> {
    (0..n).map(|i| Visitor::new(format!("Visitor {i}"), 30, "Indian")).collect()
}

pub fn reserve_request(user: &str, party: usize) -> ReserveRequest {
    ReserveRequest {
        user_id: UserId::from(user),
        site_id: taj(),
        visit_date: visit_date(),
        slot: morning(),
        visitors: visitors(party),
        addons: vec![],
    }
}

pub struct Harness {
    pub app: BookingApp,
    pub clock: ManualClock,
    pub payments: Arc<MockPaymentGateway>,
    pub repository: Arc<InMemoryTicketRepository>,
}

impl Harness {
    pub fn engine(&self) -> &BookingEngine {
        self.app.engine()
    }

    /// Sign a gateway callback the way the gateway would
    pub fn signature(&self, order_id: &OrderId, payment_id: &PaymentId) -> String {
        SignatureVerifier::new(WEBHOOK_SECRET).sign(order_id, payment_id)
    }

    /// Reserve, wait for the payment order, then pay.
    pub async fn paid_ticket(&self, user: &str, party: usize) -> Ticket {
        let ticket = self.engine().reserve(reserve_request(user, party)).await.unwrap();
        self.settle().await;
        self.pay(&ticket.reference, "pay_1").await
    }

    pub async fn pay(&self, reference: &BookingReference, payment_id: &str) -> Ticket {
        let ticket = self.engine().get_ticket(reference).await.unwrap();
        let order_id = ticket.payment.order_id.expect("payment order created");
        let payment_id = PaymentId::from(payment_id);
        let signature = self.signature(&order_id, &payment_id);
        self.engine()
            .confirm_payment(reference.clone(), order_id, payment_id, signature)
            .await
            .unwrap()
    }

    pub async fn settle(&self) {
        self.engine().settle(Duration::from_secs(5)).await.unwrap();
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.security.payment_webhook_secret = WEBHOOK_SECRET.to_string();
    config.security.payload_signing_key = Some(SIGNING_KEY.to_string());
    config.resilience.retry_max_retries = 0;
    config.resilience.retry_initial_delay_ms = 1;
    config.sweeper.interval_secs = 0;
    config
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(config: Config) -> Harness {
    let clock = ManualClock::new(start_time());
    let payments = Arc::new(MockPaymentGateway::new());
    let repository = Arc::new(InMemoryTicketRepository::new());

    let collaborators = visit_booking::app::Collaborators {
        catalog: Arc::new(InMemoryCatalog::demo()),
        payments: payments.clone(),
        notifier: Arc::new(LoggingNotifier::new()),
        repository: repository.clone(),
        clock: Arc::new(clock.clone()),
    };
    let app = BookingApp::assemble(config, collaborators).await.unwrap();

    Harness {
        app,
        clock,
        payments,
        repository,
    }
}
