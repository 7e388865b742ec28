//! Handlers for the `/lipsync` resource.
//!
//! A generation is created from a multipart upload, served as an MP4 with
//! range support, and discarded explicitly or by the retention sweep.

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{self, HeaderMap};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use lipsync_core::artifacts::{InputKind, UploadedInput};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Maximum bytes served for an open-ended range (1 MiB).
const MAX_CHUNK_SIZE: u64 = 1024 * 1024;

const VIDEO_CONTENT_TYPE: &str = "video/mp4";

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct LipSyncResult {
    pub id: Uuid,
    pub video_url: String,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct VideoParams {
    /// Serve as an attachment instead of inline.
    #[serde(default)]
    pub download: bool,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a `Range: bytes=START-END` header value.
/// Returns `(start, optional_end)`.
fn parse_range_header(range: &str) -> Option<(u64, Option<u64>)> {
    let (start, end) = range.strip_prefix("bytes=")?.split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = match end.trim() {
        "" => None,
        end => Some(end.parse::<u64>().ok()?),
    };
    Some((start, end))
}

fn content_disposition(id: Uuid, download: bool) -> String {
    let kind = if download { "attachment" } else { "inline" };
    format!("{kind}; filename=\"lipsync-{id}.mp4\"")
}

fn build(builder: axum::http::response::Builder, body: Body) -> AppResult<Response> {
    builder
        .body(body)
        .map_err(|e| AppError::InternalError(e.to_string()))
}

/// Read one multipart file field. A field with no file name and no bytes is
/// what a browser sends for an empty file input, so it counts as absent.
async fn read_upload(
    kind: InputKind,
    field: axum::extract::multipart::Field<'_>,
) -> AppResult<Option<UploadedInput>> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let data = field
        .bytes()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some(UploadedInput::new(kind, file_name, data.to_vec())))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/lipsync
///
/// Accepts a multipart form with `image` and `audio` file fields, runs the
/// engine, and returns where the resulting video can be fetched. Unknown
/// fields are ignored.
pub async fn create(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DataResponse<LipSyncResult>>)> {
    let mut image: Option<UploadedInput> = None;
    let mut audio: Option<UploadedInput> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let Some(kind) = field.name().and_then(InputKind::from_field_name) else {
            continue;
        };
        let upload = read_upload(kind, field).await?;
        match kind {
            InputKind::Image => image = upload.or(image),
            InputKind::Audio => audio = upload.or(audio),
        }
    }

    let generation = state.pipeline.generate(image, audio).await?;

    tracing::info!(
        session_id = %generation.session_id,
        duration_ms = generation.duration_ms,
        "Lip-sync video generated",
    );

    let result = LipSyncResult {
        id: generation.session_id,
        video_url: format!("/api/v1/lipsync/{}/video", generation.session_id),
        duration_ms: generation.duration_ms,
        created_at: Utc::now(),
    };
    Ok((StatusCode::CREATED, Json(DataResponse { data: result })))
}

/// GET /api/v1/lipsync/{id}/video
///
/// Streams the generated MP4 with HTTP range request support. Pass
/// `?download=true` to get an attachment disposition.
pub async fn stream_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<VideoParams>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let session = state.pipeline.store().session(id).await?;
    let path = session.output_path();

    let file_size = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(lipsync_core::error::CoreError::NotFound {
                entity: "Video",
                id: id.to_string(),
            }
            .into());
        }
        Err(e) => return Err(AppError::InternalError(e.to_string())),
    };
    let disposition = content_disposition(id, params.download);

    if let Some(range_value) = headers.get(header::RANGE) {
        let range_str = range_value
            .to_str()
            .map_err(|_| AppError::BadRequest("Invalid Range header".into()))?;

        if let Some((start, end)) = parse_range_header(range_str) {
            if start >= file_size {
                return build(
                    Response::builder()
                        .status(StatusCode::RANGE_NOT_SATISFIABLE)
                        .header(header::CONTENT_RANGE, format!("bytes */{file_size}")),
                    Body::empty(),
                );
            }

            let last = file_size - 1;
            let end = end
                .map(|e| e.min(last))
                .unwrap_or_else(|| (start + MAX_CHUNK_SIZE - 1).min(last));
            if start > end {
                return build(
                    Response::builder()
                        .status(StatusCode::RANGE_NOT_SATISFIABLE)
                        .header(header::CONTENT_RANGE, format!("bytes */{file_size}")),
                    Body::empty(),
                );
            }
            let length = end - start + 1;

            let mut file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;
            let stream = ReaderStream::new(file.take(length));

            return build(
                Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_TYPE, VIDEO_CONTENT_TYPE)
                    .header(header::CONTENT_LENGTH, length.to_string())
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes {start}-{end}/{file_size}"),
                    )
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CONTENT_DISPOSITION, disposition),
                Body::from_stream(stream),
            );
        }
    }

    // No usable Range header, serve the full file.
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    build(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, VIDEO_CONTENT_TYPE)
            .header(header::CONTENT_LENGTH, file_size.to_string())
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_DISPOSITION, disposition),
        Body::from_stream(ReaderStream::new(file)),
    )
}

/// DELETE /api/v1/lipsync/{id}
///
/// Removes the generated video and its session directory.
pub async fn discard(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state.pipeline.store().release(id).await?;
    tracing::info!(session_id = %id, "Lip-sync session discarded");
    Ok(StatusCode::NO_CONTENT)
}
