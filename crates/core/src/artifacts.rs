//! On-disk staging of uploaded inputs and generated outputs.
//!
//! Every generation request gets its own [`StagingSession`]: a directory
//! named after a UUIDv7 under the store root. Inside a session each input
//! kind has a fixed file name, so staging the same kind twice overwrites
//! the previous upload. Sessions are released explicitly or swept once
//! they outlive the configured TTL.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use uuid::Uuid;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Accepted face image extensions (lower-case, without the dot).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Accepted audio extensions (lower-case, without the dot).
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3"];

/// File name of the generated video inside a session directory.
pub const OUTPUT_FILE_NAME: &str = "output.mp4";

// ---------------------------------------------------------------------------
// Input kinds
// ---------------------------------------------------------------------------

/// The two inputs the lip-sync engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Image,
    Audio,
}

impl InputKind {
    /// Multipart form field carrying this input.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }

    /// Parse a multipart form field name.
    pub fn from_field_name(name: &str) -> Option<Self> {
        match name {
            "image" => Some(Self::Image),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    /// Fixed file name this kind is staged under.
    ///
    /// The engine sniffs content rather than trusting the extension, so a
    /// PNG staged as `.jpg` or an MP3 staged as `.wav` still decodes.
    pub fn staged_file_name(self) -> &'static str {
        match self {
            Self::Image => "input_image.jpg",
            Self::Audio => "input_audio.wav",
        }
    }

    /// Extensions accepted for uploads of this kind.
    pub fn allowed_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Image => IMAGE_EXTENSIONS,
            Self::Audio => AUDIO_EXTENSIONS,
        }
    }
}

/// A file received from the client, not yet written to disk.
#[derive(Debug, Clone)]
pub struct UploadedInput {
    pub kind: InputKind,
    /// File name as declared by the client.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadedInput {
    pub fn new(kind: InputKind, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Lower-cased extension of the declared file name, empty if none.
    pub fn extension(&self) -> String {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default()
    }

    /// Check the declared extension against the kind's allow-list.
    ///
    /// Content is not inspected; malformed files surface as engine failures.
    pub fn validate(&self) -> Result<(), CoreError> {
        let ext = self.extension();
        let allowed = self.kind.allowed_extensions();
        if allowed.contains(&ext.as_str()) {
            Ok(())
        } else {
            Err(CoreError::Validation(format!(
                "Unsupported {} format '.{ext}'. Supported: {}",
                self.kind.field_name(),
                allowed
                    .iter()
                    .map(|e| format!(".{e}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Root of all staging sessions.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn session_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Create a fresh session directory, creating the root if absent.
    pub async fn open_session(&self) -> Result<StagingSession, CoreError> {
        let id = Uuid::now_v7();
        let dir = self.session_dir(id);
        fs::create_dir_all(&dir).await.map_err(|e| {
            CoreError::Internal(format!(
                "Failed to create staging directory {}: {e}",
                dir.display()
            ))
        })?;
        tracing::debug!(session_id = %id, dir = %dir.display(), "Opened staging session");
        Ok(StagingSession { id, dir })
    }

    /// Re-open an existing session, e.g. to serve its output.
    pub async fn session(&self, id: Uuid) -> Result<StagingSession, CoreError> {
        let dir = self.session_dir(id);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(StagingSession { id, dir }),
            _ => Err(CoreError::NotFound {
                entity: "StagingSession",
                id: id.to_string(),
            }),
        }
    }

    /// Remove a session directory and everything in it.
    pub async fn release(&self, id: Uuid) -> Result<(), CoreError> {
        let dir = self.session_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(session_id = %id, "Released staging session");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CoreError::NotFound {
                entity: "StagingSession",
                id: id.to_string(),
            }),
            Err(e) => Err(CoreError::Internal(format!(
                "Failed to remove staging directory {}: {e}",
                dir.display()
            ))),
        }
    }

    /// Remove sessions whose directory was last modified at least `max_age` ago.
    ///
    /// Entries that are not UUID-named directories are left alone. Returns
    /// the number of sessions removed.
    pub async fn sweep_expired(&self, max_age: Duration) -> Result<usize, CoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(CoreError::Internal(format!(
                    "Failed to list {}: {e}",
                    self.root.display()
                )))
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to read directory entry: {e}")))?
        {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| Uuid::parse_str(n).ok()) else {
                continue;
            };

            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_dir() => meta,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Cannot stat staging session");
                    continue;
                }
            };

            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!(session_id = %id, age_secs = age.as_secs(), "Swept expired session");
                }
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Failed to sweep staging session");
                }
            }
        }

        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One request's private staging directory.
#[derive(Debug, Clone)]
pub struct StagingSession {
    id: Uuid,
    dir: PathBuf,
}

impl StagingSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path an input of `kind` is staged under. Stable for the session.
    pub fn staged_path(&self, kind: InputKind) -> PathBuf {
        self.dir.join(kind.staged_file_name())
    }

    /// Path the engine writes the generated video to.
    pub fn output_path(&self) -> PathBuf {
        self.dir.join(OUTPUT_FILE_NAME)
    }

    /// Write `bytes` to the fixed path for `kind` and return that path.
    ///
    /// Bytes land in a uniquely named sibling first and are renamed into
    /// place, so readers see either the previous or the new content in full.
    pub async fn stage(&self, kind: InputKind, bytes: &[u8]) -> Result<PathBuf, CoreError> {
        let path = self.staged_path(kind);
        let part = self.dir.join(format!(
            ".{}.{}.part",
            kind.staged_file_name(),
            Uuid::new_v4().simple()
        ));

        fs::write(&part, bytes).await.map_err(|e| {
            CoreError::Internal(format!("Failed to write {}: {e}", part.display()))
        })?;

        if let Err(e) = fs::rename(&part, &path).await {
            let _ = fs::remove_file(&part).await;
            return Err(CoreError::Internal(format!(
                "Failed to move staged {} into place: {e}",
                kind.field_name()
            )));
        }

        tracing::debug!(
            session_id = %self.id,
            kind = kind.field_name(),
            bytes = bytes.len(),
            "Staged input"
        );
        Ok(path)
    }

    /// Delete the staged inputs, keeping the output.
    pub async fn release_inputs(&self) {
        for kind in [InputKind::Image, InputKind::Audio] {
            let path = self.staged_path(kind);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        session_id = %self.id,
                        path = %path.display(),
                        error = %e,
                        "Failed to release staged input"
                    );
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
