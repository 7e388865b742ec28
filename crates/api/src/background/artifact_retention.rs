//! Periodic cleanup of expired staging sessions.
//!
//! Generated videos stay on disk until a client deletes them or they age
//! past the configured TTL. This job sweeps the scratch directory on a fixed
//! interval using `tokio::time::interval`.

use std::time::Duration;

use lipsync_core::artifacts::ArtifactStore;
use tokio_util::sync::CancellationToken;

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300); // 5 minutes

/// Run the retention loop until `cancel` is triggered.
///
/// Sessions whose directory is at least `ttl` old are removed.
pub async fn run(store: ArtifactStore, ttl: Duration, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        root = %store.root().display(),
        ttl_secs = ttl.as_secs(),
        interval_secs = interval.as_secs(),
        "Artifact retention job started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Artifact retention job stopping");
                break;
            }
            _ = ticker.tick() => {
                match store.sweep_expired(ttl).await {
                    Ok(0) => tracing::debug!("Artifact retention: nothing to sweep"),
                    Ok(removed) => tracing::info!(removed, "Artifact retention: swept expired sessions"),
                    Err(e) => tracing::error!(error = %e, "Artifact retention: sweep failed"),
                }
            }
        }
    }
}
