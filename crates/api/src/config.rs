use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use lipsync_core::inference::DEFAULT_CHECKPOINT_PATH;
use lipsync_core::provisioning::DEFAULT_CHECKPOINT_URL;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. In production,
/// override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds for every route except generation,
    /// which gets [`ServerConfig::generation_timeout`].
    pub request_timeout_secs: u64,
    /// How long shutdown waits for background tasks to stop.
    pub shutdown_timeout_secs: u64,
    /// Root directory for per-request staging sessions.
    pub scratch_dir: PathBuf,
    /// Location of the engine checkpoint.
    pub checkpoint_path: PathBuf,
    /// Download URL used when the checkpoint is missing.
    pub checkpoint_url: String,
    /// Optional expected SHA-256 of the checkpoint (hex).
    pub checkpoint_sha256: Option<String>,
    /// Download the checkpoint before serving if it is missing.
    pub provision_on_startup: bool,
    /// Sessions older than this are swept.
    pub artifact_ttl_secs: u64,
    /// Upper bound on a multipart request body.
    pub max_upload_bytes: usize,
    /// Lip-sync engine invocation settings.
    pub engine: EngineConfig,
}

/// How the external lip-sync engine is launched.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Python interpreter (default: `python3`).
    pub python_bin: String,
    /// Engine entry point passed to the interpreter (default: `inference.py`).
    pub script: String,
    /// Directory the engine runs from (default: current directory).
    pub working_directory: Option<PathBuf>,
    /// Per-run time limit in seconds (default: `900`).
    pub timeout_secs: u64,
    /// Longest a request waits for a free engine slot (default: `1800`).
    pub queue_timeout_secs: u64,
    /// Concurrent engine runs allowed (default: `1`).
    pub max_concurrency: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                    |
    /// |--------------------------|----------------------------|
    /// | `HOST`                   | `0.0.0.0`                  |
    /// | `PORT`                   | `3000`                     |
    /// | `CORS_ORIGINS`           | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`   | `60`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `30`                       |
    /// | `SCRATCH_DIR`            | `temp`                     |
    /// | `CHECKPOINT_PATH`        | `checkpoints/wav2lip.pth`  |
    /// | `CHECKPOINT_URL`         | Google Drive mirror        |
    /// | `CHECKPOINT_SHA256`      | unset                      |
    /// | `PROVISION_ON_STARTUP`   | `false`                    |
    /// | `ARTIFACT_TTL_SECS`      | `3600`                     |
    /// | `MAX_UPLOAD_BYTES`       | `268435456`                |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let checkpoint_sha256 = std::env::var("CHECKPOINT_SHA256")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Self {
            host,
            port: parse_env("PORT", 3000),
            cors_origins,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 60),
            shutdown_timeout_secs: parse_env("SHUTDOWN_TIMEOUT_SECS", 30),
            scratch_dir: std::env::var("SCRATCH_DIR")
                .unwrap_or_else(|_| "temp".into())
                .into(),
            checkpoint_path: std::env::var("CHECKPOINT_PATH")
                .unwrap_or_else(|_| DEFAULT_CHECKPOINT_PATH.into())
                .into(),
            checkpoint_url: std::env::var("CHECKPOINT_URL")
                .unwrap_or_else(|_| DEFAULT_CHECKPOINT_URL.into()),
            checkpoint_sha256,
            provision_on_startup: parse_env("PROVISION_ON_STARTUP", false),
            artifact_ttl_secs: parse_env("ARTIFACT_TTL_SECS", 3600),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 256 * 1024 * 1024),
            engine: EngineConfig::from_env(),
        }
    }

    pub fn artifact_ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// HTTP timeout for the generation route. A generation request is held
    /// open while it waits for an engine slot and while the engine runs, on
    /// top of the ordinary budget for reading and staging the upload.
    pub fn generation_timeout(&self) -> Duration {
        self.engine.queue_timeout() + self.engine.timeout() + self.request_timeout()
    }
}

impl EngineConfig {
    /// | Env Var                     | Default        |
    /// |-----------------------------|----------------|
    /// | `ENGINE_PYTHON`             | `python3`      |
    /// | `ENGINE_SCRIPT`             | `inference.py` |
    /// | `ENGINE_WORKDIR`            | unset          |
    /// | `ENGINE_TIMEOUT_SECS`       | `900`          |
    /// | `ENGINE_QUEUE_TIMEOUT_SECS` | `1800`         |
    /// | `ENGINE_MAX_CONCURRENCY`    | `1`            |
    pub fn from_env() -> Self {
        Self {
            python_bin: std::env::var("ENGINE_PYTHON").unwrap_or_else(|_| "python3".into()),
            script: std::env::var("ENGINE_SCRIPT").unwrap_or_else(|_| "inference.py".into()),
            working_directory: std::env::var("ENGINE_WORKDIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            timeout_secs: parse_env("ENGINE_TIMEOUT_SECS", 900),
            queue_timeout_secs: parse_env("ENGINE_QUEUE_TIMEOUT_SECS", 1800),
            max_concurrency: parse_env("ENGINE_MAX_CONCURRENCY", 1),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }
}

/// Read `key` and parse it, falling back to `default` when unset.
///
/// Panics on a present but malformed value: misconfiguration should fail
/// at startup, not on the first request.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} has an invalid value: '{raw}'")),
        Err(_) => default,
    }
}
