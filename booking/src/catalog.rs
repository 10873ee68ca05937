//! Catalog collaborator: supplies site capacity, hours and price.
//!
//! The engine only reads from it. [`GuardedCatalog`] wraps any implementation
//! with a circuit breaker so a failing catalog makes reservations fail fast
//! instead of piling up.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use booking_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, State};
use chrono::Weekday;
use thiserror::Error;

use crate::types::{Money, OperatingHours, Site, SiteId, parse_time};

/// Boxed future returned by catalog lookups
pub type CatalogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CatalogError>> + Send + 'a>>;

/// Catalog failures
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// No site with that id
    #[error("site {0} not found")]
    NotFound(SiteId),
    /// Catalog unreachable or misbehaving
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    /// Seed data could not be loaded
    #[error("invalid catalog seed: {0}")]
    Seed(String),
}

/// Read-only site lookup
pub trait Catalog: Send + Sync {
    /// Fetch a site by id.
    ///
    /// # Errors
    ///
    /// [`CatalogError::NotFound`] for an unknown id, [`CatalogError::Unavailable`]
    /// when the catalog cannot answer.
    fn get_site(&self, site_id: &SiteId) -> CatalogFuture<'_, Site>;
}

/// Catalog held in memory, seeded at startup
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    sites: Arc<RwLock<HashMap<SiteId, Site>>>,
}

impl InMemoryCatalog {
    /// Empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog containing `sites`
    #[must_use]
    pub fn with_sites(sites: impl IntoIterator<Item = Site>) -> Self {
        let catalog = Self::new();
        for site in sites {
            catalog.upsert(site);
        }
        catalog
    }

    /// Load a JSON array of sites.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Seed`] if the file is unreadable or not a site list.
    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Seed(format!("{}: {e}", path.display())))?;
        let sites: Vec<Site> = serde_json::from_str(&raw)
            .map_err(|e| CatalogError::Seed(format!("{}: {e}", path.display())))?;
        Ok(Self::with_sites(sites))
    }

    /// Demo sites used when no seed file is configured
    #[must_use]
    pub fn demo() -> Self {
        Self::with_sites(demo_sites())
    }

    /// Insert or replace a site
    pub fn upsert(&self, site: Site) {
        self.sites
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(site.id.clone(), site);
    }

    /// Number of sites
    #[must_use]
    pub fn len(&self) -> usize {
        self.sites
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// No sites at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Catalog for InMemoryCatalog {
    fn get_site(&self, site_id: &SiteId) -> CatalogFuture<'_, Site> {
        let found = self
            .sites
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(site_id)
            .cloned();
        let site_id = site_id.clone();
        Box::pin(async move { found.ok_or(CatalogError::NotFound(site_id)) })
    }
}

/// Taj Mahal and Red Fort, IST, capacity 100 per slot
#[must_use]
pub fn demo_sites() -> Vec<Site> {
    let hours = |open: &str, close: &str, closed: Weekday| {
        match (parse_time(open), parse_time(close)) {
            (Some(open), Some(close)) => OperatingHours::daily(open, close).closed_on(&[closed]),
            _ => OperatingHours::default(),
        }
    };

    vec![
        Site {
            id: SiteId::from("taj-mahal"),
            code: "TAJ".to_string(),
            name: "Taj Mahal".to_string(),
            capacity: 100,
            base_price: Money::from_minor(5_000),
            operating_hours: hours("06:00", "18:00", Weekday::Fri),
            utc_offset_minutes: 330,
        },
        Site {
            id: SiteId::from("red-fort"),
            code: "RFD".to_string(),
            name: "Red Fort".to_string(),
            capacity: 100,
            base_price: Money::from_minor(3_500),
            operating_hours: hours("09:30", "16:30", Weekday::Mon),
            utc_offset_minutes: 330,
        },
    ]
}

/// Catalog behind a circuit breaker.
///
/// `NotFound` is an answer, not a failure, and does not count against the breaker.
#[derive(Clone)]
pub struct GuardedCatalog {
    inner: Arc<dyn Catalog>,
    breaker: CircuitBreaker,
}

impl GuardedCatalog {
    /// Wrap `inner`
    #[must_use]
    pub fn new(inner: Arc<dyn Catalog>, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::named("catalog", config),
        }
    }

    /// Breaker state, for health reporting
    #[must_use]
    pub fn breaker_state(&self) -> State {
        self.breaker.state()
    }

    /// Fetch a site through the breaker.
    ///
    /// # Errors
    ///
    /// [`CatalogError::NotFound`] for an unknown site, [`CatalogError::Unavailable`]
    /// when the catalog failed or the breaker is open.
    #[tracing::instrument(skip(self), fields(site_id = %site_id))]
    pub async fn site(&self, site_id: &SiteId) -> Result<Site, CatalogError> {
        let started = Instant::now();
        let result = self
            .breaker
            .call(|| async {
                match self.inner.get_site(site_id).await {
                    Ok(site) => Ok(Some(site)),
                    Err(CatalogError::NotFound(_)) => Ok(None),
                    Err(other) => Err(other),
                }
            })
            .await;
        metrics::histogram!("booking_catalog_lookup_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(Some(site)) => Ok(site),
            Ok(None) => Err(CatalogError::NotFound(site_id.clone())),
            Err(CircuitBreakerError::Open) => Err(CatalogError::Unavailable("circuit breaker open".to_string())),
            Err(CircuitBreakerError::Inner(error)) => {
                tracing::warn!(error = %error, "catalog lookup failed");
                Err(error)
            },
        }
    }
}
