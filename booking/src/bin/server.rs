//! Visit booking HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # In-memory storage, demo catalog
//! cargo run --bin booking-server
//!
//! # PostgreSQL storage with a seeded catalog
//! DATABASE_URL=postgres://localhost/booking CATALOG_SEED_FILE=sites.json \
//!     cargo run --bin booking-server
//! ```

use anyhow::Context;
use booking_runtime::metrics::install_prometheus;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use visit_booking::{
    BookingApp, Config,
    metrics::register_business_metrics,
    server::{AppState, build_router},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,visit_booking=debug,tower_http=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting visit booking server");

    let config = Config::from_env();
    info!(
        backend = config.storage.backend.label(),
        slot_width_minutes = config.booking.slot_width_minutes,
        currency = %config.booking.currency,
        "Configuration loaded"
    );

    let metrics = match install_prometheus() {
        Ok(handle) => {
            register_business_metrics();
            Some(handle)
        },
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        },
    };

    let addr = config.bind_address();
    let backend = config.storage.backend.label();
    let app = BookingApp::new(config).await.context("failed to initialize application")?;
    let sweeper = app.start();

    let mut state = AppState::new(app.engine().clone(), backend);
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("HTTP server stopped; draining side effects");
    app.shutdown().await?;
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            error!(error = %e, "Sweeper task panicked");
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
