use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use lipsync_core::provisioning::validate_checkpoint;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Whether a checkpoint of plausible size is present.
    pub checkpoint_ready: bool,
}

/// GET /health
///
/// Reports `ok` while the server is up. Generation still fails until the
/// checkpoint is provisioned, which `checkpoint_ready` exposes.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let checkpoint_ready = validate_checkpoint(state.pipeline.checkpoint_path())
        .await
        .is_some();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        checkpoint_ready,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
