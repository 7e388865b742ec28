use std::net::SocketAddr;
use std::time::Duration;

use lipsync_api::background;
use lipsync_api::config::ServerConfig;
use lipsync_api::router::build_app_router;
use lipsync_api::state::AppState;
use lipsync_core::provisioning::{validate_checkpoint, HttpCheckpointSource, Provisioner};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lipsync_api=debug,lipsync_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let state = AppState::from_config(&config).expect("Failed to resolve working paths");
    let checkpoint_path = state.pipeline.checkpoint_path().to_path_buf();

    // --- Checkpoint ---
    if config.provision_on_startup {
        let source =
            HttpCheckpointSource::new(config.checkpoint_url.clone()).expect("Invalid CHECKPOINT_URL");
        let mut provisioner = Provisioner::new(checkpoint_path.clone(), source);
        if let Some(sha) = &config.checkpoint_sha256 {
            provisioner = provisioner.with_expected_sha256(sha.clone());
        }
        provisioner
            .ensure_checkpoint()
            .await
            .expect("Checkpoint provisioning failed");
    } else if validate_checkpoint(&checkpoint_path).await.is_none() {
        tracing::warn!(
            path = %checkpoint_path.display(),
            "Checkpoint missing or incomplete; generation will fail until it is provisioned \
             (run lipsync-fetch-checkpoint or set PROVISION_ON_STARTUP=true)"
        );
    }

    let adapter = state.pipeline.adapter();
    tracing::info!(
        python = %config.engine.python_bin,
        script = %config.engine.script,
        timeout_secs = adapter.timeout().as_secs(),
        queue_timeout_secs = adapter.queue_timeout().as_secs(),
        max_concurrency = adapter.max_concurrency(),
        scratch_dir = %state.pipeline.store().root().display(),
        "Lip-sync engine configured"
    );

    // --- Background jobs ---
    let retention_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(background::artifact_retention::run(
        state.pipeline.store().clone(),
        config.artifact_ttl(),
        background::artifact_retention::SWEEP_INTERVAL,
        retention_cancel.clone(),
    ));

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    retention_cancel.cancel();
    let _ = tokio::time::timeout(
        Duration::from_secs(config.shutdown_timeout_secs),
        retention_handle,
    )
    .await;
    tracing::info!("Artifact retention stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
