use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::lipsync;
use crate::state::AppState;

/// Generation, mounted at its full path so it can carry its own timeout.
pub fn generation_router() -> Router<AppState> {
    Router::new().route("/api/v1/lipsync", post(lipsync::create))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", delete(lipsync::discard))
        .route("/{id}/video", get(lipsync::stream_video))
}
