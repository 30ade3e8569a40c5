//! Interrupt handling that will not take the server down under live players.

use std::time::Duration;

use crate::matchmaking::InstanceStore;

/// Resolves on the first Ctrl-C received while no instance has players.
/// Interrupts that arrive while instances are occupied are logged and
/// ignored.
pub async fn guarded_shutdown_signal(instances: InstanceStore) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            // Without a signal handler the server can only be killed.
            std::future::pending::<()>().await;
        }

        match instances.occupied_count().await {
            Ok(0) => {
                tracing::info!("Shutdown requested, no occupied instances");
                return;
            }
            Ok(occupied) => {
                tracing::warn!(
                    occupied,
                    "Shutdown refused: players are still in instances"
                );
            }
            Err(e) => {
                tracing::error!("Shutdown refused: could not check instances: {}", e);
            }
        }

        // Debounce repeated interrupts from a held key.
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
