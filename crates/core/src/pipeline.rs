//! Upload → stage → infer, for one request.
//!
//! [`Pipeline::generate`] owns the artifact lifecycle: it opens a private
//! staging session, stages both uploads, builds the engine request, invokes
//! the engine, releases the inputs, and drops the whole session again if
//! generation failed or the caller stopped waiting for it.

use std::path::PathBuf;

use uuid::Uuid;

use crate::artifacts::{ArtifactStore, InputKind, UploadedInput};
use crate::engine::adapter::EngineAdapter;
use crate::engine::executor::LipSyncEngine;
use crate::engine::outcome::{InferenceFailure, InferenceOutcome};
use crate::error::CoreError;
use crate::inference::InferenceRequest;

/// A generated video waiting to be served.
#[derive(Debug, Clone)]
pub struct Generation {
    pub session_id: Uuid,
    pub output_path: PathBuf,
    pub duration_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// Request-path failure, already summarized for the user.
    #[error(transparent)]
    Inference(#[from] InferenceFailure),

    /// Rejected upload or local I/O failure around the engine call.
    #[error(transparent)]
    Core(#[from] CoreError),
}

pub struct Pipeline<E> {
    store: ArtifactStore,
    adapter: EngineAdapter<E>,
    checkpoint_path: PathBuf,
}

impl<E: LipSyncEngine> Pipeline<E> {
    pub fn new(store: ArtifactStore, adapter: EngineAdapter<E>, checkpoint_path: PathBuf) -> Self {
        Self {
            store,
            adapter,
            checkpoint_path,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn adapter(&self) -> &EngineAdapter<E> {
        &self.adapter
    }

    pub fn checkpoint_path(&self) -> &std::path::Path {
        &self.checkpoint_path
    }

    /// Run one generation. Both uploads are required; when either is absent
    /// no session is opened and the engine is not called.
    pub async fn generate(
        &self,
        image: Option<UploadedInput>,
        audio: Option<UploadedInput>,
    ) -> Result<Generation, GenerateError> {
        let (image, audio) = match (image, audio) {
            (Some(image), Some(audio)) => (image, audio),
            (image, audio) => {
                let absent: Vec<&str> = [
                    (InputKind::Image, image.is_none()),
                    (InputKind::Audio, audio.is_none()),
                ]
                .into_iter()
                .filter(|(_, absent)| *absent)
                .map(|(kind, _)| kind.field_name())
                .collect();
                let failure = InferenceFailure::missing_input(format!(
                    "absent uploads: {}",
                    absent.join(", ")
                ));
                failure.log();
                return Err(failure.into());
            }
        };

        image.validate()?;
        audio.validate()?;

        let session = self.store.open_session().await?;
        let guard = SessionGuard::new(&self.store, session.id());
        let staged = async {
            let face_path = session.stage(InputKind::Image, &image.bytes).await?;
            let audio_path = session.stage(InputKind::Audio, &audio.bytes).await?;
            Ok::<_, CoreError>((face_path, audio_path))
        }
        .await;

        let (face_path, audio_path) = match staged {
            Ok(paths) => paths,
            Err(e) => {
                guard.discard().await;
                return Err(e.into());
            }
        };

        let request = InferenceRequest::build(
            face_path,
            audio_path,
            session.output_path(),
            self.checkpoint_path.clone(),
        );

        let outcome = self.adapter.invoke(&request).await;
        session.release_inputs().await;

        match outcome {
            InferenceOutcome::Success {
                output_path,
                duration_ms,
            } => {
                guard.keep();
                Ok(Generation {
                    session_id: session.id(),
                    output_path,
                    duration_ms,
                })
            }
            InferenceOutcome::Failure(failure) => {
                guard.discard().await;
                Err(failure.into())
            }
        }
    }
}

/// Removes a session unless [`keep`](Self::keep) is called.
///
/// Covers a `generate` future that is dropped mid-run (request timeout,
/// client disconnect, shutdown): the session is then removed in the
/// background instead of waiting for the retention sweep.
struct SessionGuard<'a> {
    store: &'a ArtifactStore,
    session_id: Uuid,
    armed: bool,
}

impl<'a> SessionGuard<'a> {
    fn new(store: &'a ArtifactStore, session_id: Uuid) -> Self {
        Self {
            store,
            session_id,
            armed: true,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }

    async fn discard(mut self) {
        self.armed = false;
        if let Err(e) = self.store.release(self.session_id).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "Failed to discard staging session");
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let session_id = self.session_id;
        tracing::info!(%session_id, "Generation abandoned, discarding staging session");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release(session_id).await {
                        tracing::warn!(%session_id, error = %e, "Failed to discard abandoned session");
                    }
                });
            }
            Err(_) => {
                if let Err(e) = std::fs::remove_dir_all(store.session_dir(session_id)) {
                    tracing::warn!(%session_id, error = %e, "Failed to discard abandoned session");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
