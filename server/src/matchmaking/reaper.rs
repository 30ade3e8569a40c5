//! Background reclamation of expired instances.
//!
//! Periodically deletes non-persistent instances that have been empty for
//! longer than their TTL.

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::matchmaking::InstanceStore;

/// Spawn a background task that runs `reap_expired` every `interval_secs`.
pub fn spawn_instance_reaper(instances: InstanceStore, interval_secs: u64) -> JoinHandle<()> {
    let interval = std::time::Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            match instances.reap_expired(Utc::now().timestamp()).await {
                Ok(0) => tracing::debug!("Instance reaper: nothing to reclaim"),
                Ok(count) => tracing::info!("Instance reaper: reclaimed {} expired instances", count),
                Err(e) => tracing::error!("Instance reaper error: {}", e),
            }
        }
    })
}
