//! Expiry sweeper.
//!
//! Stores without native per-key expiry hide dead keys on read but keep the
//! rows. This loop deletes them on a fixed interval until shutdown.

use pulse_core::config::StoreConfig;
use pulse_core::KvStore;
use std::sync::Arc;
use tokio::sync::broadcast;

pub async fn run_sweeper_loop(
    store: Arc<dyn KvStore>,
    config: StoreConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = tokio::time::Duration::from_secs(config.sweep_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        "Expiry sweeper started (backend: {}, interval: {}s)",
        store.name(),
        config.sweep_interval_secs
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(store.as_ref()).await;
            }
            _ = shutdown.recv() => {
                tracing::info!("Expiry sweeper shutting down");
                break;
            }
        }
    }
}

/// One purge pass. Failures are logged; the next tick tries again.
pub async fn sweep_once(store: &dyn KvStore) -> u64 {
    match store.purge_expired().await {
        Ok(0) => 0,
        Ok(removed) => {
            tracing::debug!(removed, "Expired keys purged");
            removed
        }
        Err(e) => {
            tracing::warn!("Expiry sweep failed (non-fatal): {}", e);
            0
        }
    }
}
