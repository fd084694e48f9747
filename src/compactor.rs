use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{StoreError, WalStore};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Rewrite the WAL once `threshold` appends have accumulated since the last rewrite.
/// Returns whether a compaction ran.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    store.compact().await?;
    info!(appends, reservations = store.len(), "WAL compacted");
    Ok(true)
}

/// Background task that keeps the WAL from growing without bound.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        match compact_if_due(&store, threshold).await {
            Ok(_) => {}
            Err(StoreError::Closed) => {
                tracing::debug!("store closed, compactor exiting");
                return;
            }
            Err(e) => tracing::error!("compaction failed: {e}"),
        }
    }
}
