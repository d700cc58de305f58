//! Spot Price History Sync Job
//!
//! Periodically walks the configured regions and stores new spot price
//! history. Stops on SIGINT.

use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::services::ingestion::IngestionScheduler;

/// Start the spot price history sync job
///
/// Spawns a background task that runs a full region walk right away and then
/// every `every`. Zone and region failures are logged by the scheduler and
/// picked up again on the next tick.
pub fn start_spot_history_sync_job(
    scheduler: IngestionScheduler,
    regions: Vec<String>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if regions.is_empty() || scheduler.config().instance_types.is_empty() {
            warn!("No regions or instance types configured - spot history sync disabled");
            return;
        }

        info!(
            regions = ?regions,
            instance_types = scheduler.config().instance_types.len(),
            interval_secs = every.as_secs(),
            "Spot history sync job started"
        );

        let mut ticker = sync_ticker(every);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping spot history sync");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = scheduler.run(&regions).await;
                    if !summary.zones_incomplete.is_empty() {
                        warn!(
                            zones = ?summary.zones_incomplete,
                            "Some zones are incomplete, retrying on the next run"
                        );
                    }
                }
            }
        }
    })
}

/// Ticks right away, then every `every`; a walk that overruns pushes the next
/// one back instead of firing the missed ticks back to back
fn sync_ticker(every: Duration) -> Interval {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_overrun_delays_next_walk() {
        let every = Duration::from_secs(60);
        let mut ticker = sync_ticker(every);
        assert_eq!(ticker.missed_tick_behavior(), MissedTickBehavior::Delay);

        ticker.tick().await;
        let started = tokio::time::Instant::now();

        // A walk that takes three intervals
        tokio::time::advance(every * 3).await;
        ticker.tick().await;
        let resumed = tokio::time::Instant::now();

        // The overdue tick fires once, the next one is a full interval later
        ticker.tick().await;
        assert!(resumed - started >= every * 3);
        assert!(tokio::time::Instant::now() - resumed >= every);
    }
}
