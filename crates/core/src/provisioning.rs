//! Checkpoint provisioning.
//!
//! Makes sure the engine's pretrained weights are on disk before the
//! service takes traffic. A checkpoint counts as present only when it is
//! larger than [`MIN_CHECKPOINT_BYTES`]; anything smaller is treated as a
//! truncated or error-page download. Provisioning is an operator step and
//! never runs on the request path.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Smallest plausible checkpoint size (100 MiB).
pub const MIN_CHECKPOINT_BYTES: u64 = 100 * 1024 * 1024;

/// Default direct-download URL for the checkpoint.
pub const DEFAULT_CHECKPOINT_URL: &str =
    "https://drive.google.com/uc?export=download&id=1IjFh9QZQqQZQZQZQZQZQZQZQZQZQZQZQ";

/// Page operators can open to download the checkpoint by hand.
pub const MANUAL_DOWNLOAD_PAGE: &str =
    "https://drive.google.com/file/d/1IjFh9QZQqQZQZQZQZQZQZQZQZQZQZQZQ/view";

/// Emit a progress log line every this many downloaded bytes.
const PROGRESS_LOG_INTERVAL: u64 = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

/// The checkpoint file as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointAsset {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl CheckpointAsset {
    /// Stat `path`; `None` if it does not exist or is not a regular file.
    pub async fn inspect(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).await.ok()?;
        meta.is_file().then(|| Self {
            path: path.to_path_buf(),
            size_bytes: meta.len(),
        })
    }

    /// Strictly larger than the minimum plausible size.
    pub fn is_valid(&self) -> bool {
        self.size_bytes > MIN_CHECKPOINT_BYTES
    }
}

/// Return the asset at `path` only if it is valid.
pub async fn validate_checkpoint(path: &Path) -> Option<CheckpointAsset> {
    CheckpointAsset::inspect(path)
        .await
        .filter(CheckpointAsset::is_valid)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("Checkpoint download failed: {0}")]
    Download(String),

    #[error(
        "Downloaded checkpoint is {size_bytes} bytes, not above the {min_bytes} byte minimum; the file is probably corrupt"
    )]
    Undersized { size_bytes: u64, min_bytes: u64 },

    #[error("Checkpoint SHA-256 mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Where checkpoint bytes come from.
pub trait CheckpointSource: Send + Sync {
    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    /// Write the checkpoint to `dest`, returning the number of bytes written.
    fn fetch(
        &self,
        dest: &Path,
    ) -> impl std::future::Future<Output = Result<u64, ProvisioningError>> + Send;
}

/// Plain HTTP(S) download streamed to disk.
pub struct HttpCheckpointSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCheckpointSource {
    pub fn new(url: impl Into<String>) -> Result<Self, ProvisioningError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lipsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisioningError::Download(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl CheckpointSource for HttpCheckpointSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self, dest: &Path) -> Result<u64, ProvisioningError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProvisioningError::Download(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ProvisioningError::Download(format!(
                "HTTP {}: {}",
                response.status(),
                self.url
            )));
        }

        let total = response.content_length();
        let mut file = fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut next_log = PROGRESS_LOG_INTERVAL;

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| ProvisioningError::Download(format!("Stream interrupted: {e}")))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if written >= next_log {
                tracing::info!(written, total, "Checkpoint download progress");
                next_log += PROGRESS_LOG_INTERVAL;
            }
        }
        file.flush().await?;

        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

/// Ensures a valid checkpoint exists at a fixed path.
pub struct Provisioner<S> {
    checkpoint_path: PathBuf,
    source: S,
    expected_sha256: Option<String>,
}

impl<S: CheckpointSource> Provisioner<S> {
    pub fn new(checkpoint_path: impl Into<PathBuf>, source: S) -> Self {
        Self {
            checkpoint_path: checkpoint_path.into(),
            source,
            expected_sha256: None,
        }
    }

    /// Also require the download to hash to `sha256` (hex, any case).
    pub fn with_expected_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.expected_sha256 = Some(sha256.into().to_lowercase());
        self
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Steps an operator can follow when automatic download fails.
    pub fn operator_instructions(&self) -> String {
        let dir = self
            .checkpoint_path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        let file_name = self
            .checkpoint_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "Please download the model manually:\n\
             1. Visit: {MANUAL_DOWNLOAD_PAGE}\n\
             2. Download the file\n\
             3. Place it in the '{dir}' directory as '{file_name}'"
        )
    }

    /// Return the checkpoint, downloading it first if absent or undersized.
    ///
    /// A valid checkpoint already on disk short-circuits without touching
    /// the source, so repeated calls are cheap.
    pub async fn ensure_checkpoint(&self) -> Result<CheckpointAsset, ProvisioningError> {
        if let Some(asset) = validate_checkpoint(&self.checkpoint_path).await {
            tracing::info!(
                path = %asset.path.display(),
                size_bytes = asset.size_bytes,
                "Checkpoint already present, skipping download"
            );
            return Ok(asset);
        }

        match self.download().await {
            Ok(asset) => {
                tracing::info!(
                    path = %asset.path.display(),
                    size_bytes = asset.size_bytes,
                    "Checkpoint downloaded"
                );
                Ok(asset)
            }
            Err(e) => {
                tracing::error!(error = %e, "Checkpoint provisioning failed");
                tracing::warn!("{}", self.operator_instructions());
                Err(e)
            }
        }
    }

    async fn download(&self) -> Result<CheckpointAsset, ProvisioningError> {
        if let Some(parent) = self.checkpoint_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let part = part_path(&self.checkpoint_path);
        tracing::info!(
            source = %self.source.describe(),
            dest = %self.checkpoint_path.display(),
            "Downloading checkpoint"
        );

        let result = self.fetch_and_verify(&part).await;
        if result.is_err() {
            let _ = fs::remove_file(&part).await;
        }
        let size_bytes = result?;

        fs::rename(&part, &self.checkpoint_path).await?;
        Ok(CheckpointAsset {
            path: self.checkpoint_path.clone(),
            size_bytes,
        })
    }

    /// Fetch into `part` and check size (and hash, if configured).
    async fn fetch_and_verify(&self, part: &Path) -> Result<u64, ProvisioningError> {
        self.source.fetch(part).await?;

        // Trust the file on disk over the source's byte count.
        let size_bytes = fs::metadata(part).await?.len();
        tracing::info!(size_bytes, "Download completed");

        if size_bytes <= MIN_CHECKPOINT_BYTES {
            return Err(ProvisioningError::Undersized {
                size_bytes,
                min_bytes: MIN_CHECKPOINT_BYTES,
            });
        }

        if let Some(expected) = &self.expected_sha256 {
            let actual = sha256_file(part).await?;
            if &actual != expected {
                return Err(ProvisioningError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(size_bytes)
    }
}

/// `checkpoints/wav2lip.pth` -> `checkpoints/wav2lip.pth.part`
fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Hex-encoded SHA-256 of a file, read in 1 MiB chunks.
pub async fn sha256_file(path: &Path) -> Result<String, ProvisioningError> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
