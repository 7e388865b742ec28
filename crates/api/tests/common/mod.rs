#![allow(dead_code)]

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use lipsync_api::config::{EngineConfig, ServerConfig};
use lipsync_api::router::build_app_router;
use lipsync_api::state::AppState;
use tower::ServiceExt;

/// Bytes the fake engine writes as its "video".
pub const FAKE_VIDEO: &[u8] = b"fake mp4 payload 0123456789";

/// Engine that writes [`FAKE_VIDEO`] to the `--outfile` it is given.
pub const SUCCEEDING_ENGINE: &str = r#"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outfile) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cat > /dev/null
printf '%s' 'fake mp4 payload 0123456789' > "$out"
"#;

/// [`SUCCEEDING_ENGINE`] after two seconds of work.
pub const SLOW_ENGINE: &str = r#"
sleep 2
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outfile) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cat > /dev/null
printf '%s' 'fake mp4 payload 0123456789' > "$out"
"#;

/// Engine that dies with a Python-style traceback.
pub const FAILING_ENGINE: &str = r#"
cat > /dev/null
echo "Traceback (most recent call last):" >&2
echo "ValueError: Face not detected! Ensure the video contains a face in all the frames." >&2
exit 1
"#;

/// Build a test `ServerConfig` rooted in `dir`.
pub fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        scratch_dir: dir.join("scratch"),
        checkpoint_path: dir.join("checkpoints").join("wav2lip.pth"),
        checkpoint_url: "http://127.0.0.1:9/wav2lip.pth".to_string(),
        checkpoint_sha256: None,
        provision_on_startup: false,
        artifact_ttl_secs: 3600,
        max_upload_bytes: 1024 * 1024,
        engine: EngineConfig {
            python_bin: "bash".to_string(),
            script: dir.join("engine.sh").to_string_lossy().into_owned(),
            working_directory: None,
            timeout_secs: 10,
            queue_timeout_secs: 10,
            max_concurrency: 1,
        },
    }
}

/// A router backed by a bash fake engine in a private temp directory.
///
/// Keep the value alive for the duration of the test; dropping it removes
/// the directory.
pub struct TestApp {
    pub dir: tempfile::TempDir,
    pub router: Router,
}

impl TestApp {
    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Build the full application router with the given engine script body.
///
/// Goes through [`build_app_router`] so integration tests exercise the same
/// middleware stack (CORS, request ID, timeout, tracing, panic recovery,
/// body limit) that production uses.
pub fn build_test_app(engine_script: &str) -> TestApp {
    build_test_app_with(engine_script, |_| {})
}

/// Like [`build_test_app`], with `configure` applied to the test config
/// before the app is wired.
pub fn build_test_app_with(engine_script: &str, configure: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path());
    configure(&mut config);

    std::fs::write(&config.engine.script, format!("#!/bin/bash\n{engine_script}"))
        .expect("write engine script");

    let state = AppState::from_config(&config).expect("resolve paths");
    let router = build_app_router(state, &config);
    TestApp { dir, router }
}

/// Send a GET request.
pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, Body::empty()).await
}

/// Send a DELETE request.
pub async fn delete(app: Router, uri: &str) -> Response {
    send(app, Method::DELETE, uri, Body::empty()).await
}

async fn send(app: Router, method: Method, uri: &str, body: Body) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// One file part of a multipart form.
pub struct FilePart<'a> {
    pub field: &'a str,
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub bytes: &'a [u8],
}

const BOUNDARY: &str = "lipsync-test-boundary";

/// Encode `parts` as a `multipart/form-data` body.
pub fn multipart_body(parts: &[FilePart<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                part.field, part.file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", part.content_type).as_bytes());
        body.extend_from_slice(part.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST a multipart form to `uri`.
pub async fn post_multipart(app: Router, uri: &str, parts: &[FilePart<'_>]) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub fn image_part(bytes: &[u8]) -> FilePart<'_> {
    FilePart {
        field: "image",
        file_name: "face.png",
        content_type: "image/png",
        bytes,
    }
}

pub fn audio_part(bytes: &[u8]) -> FilePart<'_> {
    FilePart {
        field: "audio",
        file_name: "speech.wav",
        content_type: "audio/wav",
        bytes,
    }
}

/// Read the full response body as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

/// Read the full response body.
pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Number of session directories under the scratch root.
pub fn session_count(app: &TestApp) -> usize {
    match std::fs::read_dir(app.scratch_dir()) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}
