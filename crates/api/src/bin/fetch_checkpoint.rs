//! Download the engine checkpoint ahead of time.
//!
//! Reads the same `CHECKPOINT_*` variables as the server. Exits non-zero
//! with manual placement instructions when the download cannot be verified.

use anyhow::Context;
use lipsync_api::config::ServerConfig;
use lipsync_core::provisioning::{HttpCheckpointSource, Provisioner};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lipsync_core=info,lipsync_fetch_checkpoint=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    let source = HttpCheckpointSource::new(config.checkpoint_url.clone())
        .context("Failed to build HTTP client")?;
    let mut provisioner = Provisioner::new(config.checkpoint_path.clone(), source);
    if let Some(sha) = &config.checkpoint_sha256 {
        provisioner = provisioner.with_expected_sha256(sha.clone());
    }

    let asset = provisioner
        .ensure_checkpoint()
        .await
        .with_context(|| format!("Could not provision {}", config.checkpoint_path.display()))?;

    tracing::info!(
        path = %asset.path.display(),
        size_mib = asset.size_bytes / (1024 * 1024),
        "Model downloaded successfully"
    );
    Ok(())
}
