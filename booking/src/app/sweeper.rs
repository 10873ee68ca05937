//! Housekeeping task: periodically expires unpaid reservations and
//! completes visits whose slot has ended.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::engine::BookingEngine;

/// Run [`BookingEngine::sweep`] every `period` until `shutdown` fires.
#[must_use]
pub fn spawn_sweeper(engine: BookingEngine, period: Duration, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        tracing::info!(period_secs = period.as_secs(), "Sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match engine.sweep().await {
                        Ok(report) => {
                            if !report.expired.is_empty() || !report.completed.is_empty() {
                                tracing::debug!(
                                    expired = report.expired.len(),
                                    completed = report.completed.len(),
                                    "Sweep finished"
                                );
                            }
                        },
                        Err(error) => {
                            tracing::warn!(error = %error, "Sweep failed; stopping sweeper");
                            break;
                        },
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Sweeper received shutdown signal");
                    break;
                }
            }
        }
    })
}
