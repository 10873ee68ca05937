//! Application coordinator - wires configuration and collaborators into a
//! running engine.

use std::sync::Arc;
use std::time::Duration;

use booking_core::environment::{Clock, SystemClock};
use booking_runtime::DeadLetterQueue;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::engine::BookingEngine;
use super::sweeper::spawn_sweeper;
use crate::aggregates::TicketEnvironment;
use crate::catalog::{Catalog, CatalogError, GuardedCatalog, InMemoryCatalog};
use crate::config::Config;
use crate::error::BookingError;
use crate::notification::{LoggingNotifier, TicketNotifier};
use crate::payment_gateway::{MockPaymentGateway, PaymentGateway, SignatureVerifier};
use crate::persistence::{RepositoryError, TicketRepository};
use crate::reference::PayloadSigner;

/// Application errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Ticket storage could not be opened
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Site catalog could not be loaded
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Engine failed to start or stop
    #[error("Engine error: {0}")]
    Engine(#[from] BookingError),
}

/// External collaborators of the engine
#[derive(Clone)]
pub struct Collaborators {
    /// Site catalog
    pub catalog: Arc<dyn Catalog>,
    /// Payment gateway
    pub payments: Arc<dyn PaymentGateway>,
    /// Ticket documents and notices
    pub notifier: Arc<dyn TicketNotifier>,
    /// Durable ticket storage
    pub repository: Arc<dyn TicketRepository>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Collaborators selected by configuration.
    ///
    /// The catalog is seeded from `CATALOG_SEED_FILE` or the demo sites; the
    /// gateway and notifier are the in-process implementations.
    ///
    /// # Errors
    ///
    /// [`AppError::Catalog`] for an unreadable seed file,
    /// [`AppError::Repository`] when storage cannot be opened.
    pub async fn from_config(config: &Config) -> Result<Self, AppError> {
        let catalog = match config.storage.catalog_seed.as_deref() {
            Some(path) => InMemoryCatalog::from_json_file(path)?,
            None => InMemoryCatalog::demo(),
        };
        tracing::info!(sites = catalog.len(), "Catalog loaded");

        let repository = config.storage.backend.connect().await?;
        tracing::info!(backend = config.storage.backend.label(), "Repository connected");

        Ok(Self {
            catalog: Arc::new(catalog),
            payments: Arc::new(MockPaymentGateway::new()),
            notifier: Arc::new(LoggingNotifier::new()),
            repository,
            clock: Arc::new(SystemClock),
        })
    }
}

/// Main booking application.
///
/// Owns the engine and the background sweeper.
pub struct BookingApp {
    config: Arc<Config>,
    engine: BookingEngine,
    shutdown_tx: broadcast::Sender<()>,
}

impl BookingApp {
    /// Build the application from configuration.
    ///
    /// # Errors
    ///
    /// Any [`AppError`] raised while opening collaborators or hydrating the ledger.
    pub async fn new(config: Config) -> Result<Self, AppError> {
        let collaborators = Collaborators::from_config(&config).await?;
        Self::assemble(config, collaborators).await
    }

    /// Build the application over explicit collaborators.
    ///
    /// # Errors
    ///
    /// [`AppError::Engine`] if the ledger cannot be hydrated.
    pub async fn assemble(config: Config, collaborators: Collaborators) -> Result<Self, AppError> {
        let signer = PayloadSigner::new(config.security.payload_signing_key.as_deref());
        if !signer.is_signing() {
            tracing::warn!("PAYLOAD_SIGNING_KEY not set; verification payloads are unsigned and can be forged");
        }

        let environment = TicketEnvironment {
            clock: collaborators.clock,
            payments: collaborators.payments,
            notifier: collaborators.notifier,
            repository: collaborators.repository,
            verifier: SignatureVerifier::new(&config.security.payment_webhook_secret),
            signer,
            rules: config.rules(),
            retry: config.retry_policy(),
            dead_letters: DeadLetterQueue::new(config.resilience.dead_letter_capacity),
        };
        let catalog = GuardedCatalog::new(collaborators.catalog, config.breaker_config());

        let engine = BookingEngine::hydrate(environment, catalog)
            .await?
            .with_reference_attempts(config.booking.reference_attempts);

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config: Arc::new(config),
            engine,
            shutdown_tx,
        })
    }

    /// The engine
    #[must_use]
    pub const fn engine(&self) -> &BookingEngine {
        &self.engine
    }

    /// The configuration the application was built with
    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Start background tasks. Returns the sweeper handle when one is configured.
    #[must_use]
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let Some(period) = self.config.sweep_interval() else {
            tracing::info!("Sweeper disabled");
            return None;
        };
        Some(spawn_sweeper(self.engine.clone(), period, self.shutdown_tx.subscribe()))
    }

    /// A receiver that fires when shutdown starts
    #[must_use]
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop background tasks and drain in-flight side effects.
    ///
    /// # Errors
    ///
    /// [`AppError::Engine`] if effects are still running at the timeout.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        // No receivers means nothing was started
        let _ = self.shutdown_tx.send(());

        let timeout = Duration::from_secs(self.config.server.shutdown_timeout);
        self.engine.shutdown(timeout).await?;

        let parked = self.engine.dead_letters().len();
        if parked > 0 {
            tracing::warn!(parked, "Shutting down with side effects awaiting reconciliation");
        }
        tracing::info!("Booking application stopped");
        Ok(())
    }
}
