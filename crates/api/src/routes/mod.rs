pub mod health;
pub mod lipsync;
pub mod ui;

use axum::Router;

use crate::state::AppState;

/// Routes mounted under `/api/v1`, except generation
/// (see [`lipsync::generation_router`]).
///
/// ```text
/// /lipsync/{id}            DELETE discard a generated video
/// /lipsync/{id}/video      GET stream the video (Range supported)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/lipsync", lipsync::router())
}
