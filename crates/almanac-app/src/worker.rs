//! The polling loop that keeps due sources in sync.

use std::time::Duration;

use almanac_db::db::store::EventStore;
use almanac_service::error::SyncError;
use almanac_service::feed::{FeedFetcher, SyncOutcome, Synchronizer};

/// Syncs every due source once and logs each result.
pub async fn sync_due<S: EventStore, F: FeedFetcher>(
    synchronizer: &Synchronizer<S, F>,
) -> Result<(), SyncError> {
    for (source_id, result) in synchronizer.sync_due().await? {
        match result {
            Ok(SyncOutcome::Synced(summary)) => tracing::info!(
                %source_id,
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                "Source synced"
            ),
            Ok(outcome) => tracing::debug!(%source_id, ?outcome, "Source checked"),
            Err(error) => tracing::error!(%source_id, code = error.code(), %error, "Source sync failed"),
        }
    }
    Ok(())
}

/// Polls until interrupted. A failed poll is logged and retried on the next tick.
pub async fn run<S: EventStore, F: FeedFetcher>(synchronizer: &Synchronizer<S, F>, poll_interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(poll_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!(poll_interval_secs, "Sync worker started");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down sync worker");
                break;
            }
            _ = ticker.tick() => {
                if let Err(error) = sync_due(synchronizer).await {
                    tracing::error!(code = error.code(), %error, "Failed to poll due sources");
                }
            }
        }
    }
}
