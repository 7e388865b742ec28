//! Boundary between request handling and the engine.
//!
//! [`EngineAdapter::invoke`] never returns an error: every failure becomes an
//! [`InferenceOutcome::Failure`] with a user-facing message, while the full
//! diagnostic goes to the log. There are no retries; a failed run is final
//! for that request.

use std::path::Path;
use std::time::Duration;

use tokio::sync::Semaphore;

use super::executor::{EngineError, EngineOutput, LipSyncEngine};
use super::outcome::{FailureKind, InferenceFailure, InferenceOutcome};
use crate::inference::InferenceRequest;

/// Default upper bound on a single engine run.
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(900);

/// Default upper bound on waiting for a free engine slot (two full runs).
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(1800);

/// Wraps an engine with input checks, a concurrency limit and a timeout.
pub struct EngineAdapter<E> {
    engine: E,
    permits: Semaphore,
    max_concurrency: usize,
    timeout: Duration,
    queue_timeout: Duration,
}

impl<E: LipSyncEngine> EngineAdapter<E> {
    /// `max_concurrency` is clamped to at least one concurrent run.
    pub fn new(engine: E, max_concurrency: usize, timeout: Duration) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            engine,
            permits: Semaphore::new(max_concurrency),
            max_concurrency,
            timeout,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
        }
    }

    /// Give up on a request that waited this long for an engine slot.
    pub fn with_queue_timeout(mut self, queue_timeout: Duration) -> Self {
        self.queue_timeout = queue_timeout;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn queue_timeout(&self) -> Duration {
        self.queue_timeout
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run the engine for `request` and classify the result.
    pub async fn invoke(&self, request: &InferenceRequest) -> InferenceOutcome {
        if let Some(failure) = check_inputs(request).await {
            return fail(failure);
        }

        let _permit = match tokio::time::timeout(self.queue_timeout, self.permits.acquire()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                return fail(InferenceFailure::new(
                    FailureKind::EngineFailure,
                    "An error occurred: the lip-sync engine is unavailable",
                    "engine semaphore closed",
                ));
            }
            Err(_elapsed) => {
                return fail(InferenceFailure::new(
                    FailureKind::Timeout,
                    "An error occurred: the lip-sync engine is busy, please try again later",
                    format!(
                        "no engine slot free after waiting {}s",
                        self.queue_timeout.as_secs()
                    ),
                ));
            }
        };

        tracing::info!(
            face = %request.face_path.display(),
            audio = %request.audio_path.display(),
            output = %request.output_path.display(),
            timeout_secs = self.timeout.as_secs(),
            "Invoking lip-sync engine"
        );

        // The engine is expected to enforce `timeout` itself; this bound also
        // covers engines that do not.
        let run = tokio::time::timeout(self.timeout, self.engine.run(request, self.timeout)).await;
        let run = run.unwrap_or_else(|_elapsed| {
            Err(EngineError::Timeout {
                elapsed_ms: self.timeout.as_millis() as u64,
            })
        });

        let outcome = match run {
            Ok(output) if !output.succeeded() => InferenceOutcome::Failure(exit_failure(&output)),
            Ok(output) => verify_output(&request.output_path, &output).await,
            Err(EngineError::Timeout { elapsed_ms }) => InferenceOutcome::Failure(
                InferenceFailure::new(
                    FailureKind::Timeout,
                    format!(
                        "An error occurred: generation did not finish within {} seconds",
                        self.timeout.as_secs()
                    ),
                    format!("engine killed after {elapsed_ms}ms"),
                ),
            ),
            Err(err) => InferenceOutcome::Failure(InferenceFailure::new(
                FailureKind::EngineFailure,
                format!("An error occurred: {err}"),
                format!("{err:?}"),
            )),
        };

        if let InferenceOutcome::Failure(failure) = outcome {
            return fail(failure);
        }
        if let InferenceOutcome::Success {
            output_path,
            duration_ms,
        } = &outcome
        {
            tracing::info!(
                output = %output_path.display(),
                duration_ms,
                "Lip-sync video generated"
            );
        }
        outcome
    }
}

/// Log the diagnostic and wrap the failure.
fn fail(failure: InferenceFailure) -> InferenceOutcome {
    failure.log();
    InferenceOutcome::Failure(failure)
}

/// Both inputs must exist and be non-empty before the engine is called.
async fn check_inputs(request: &InferenceRequest) -> Option<InferenceFailure> {
    let mut missing = Vec::new();
    for (label, path) in [("face", &request.face_path), ("audio", &request.audio_path)] {
        if !is_non_empty_file(path).await {
            missing.push(format!("{label} input missing or empty: {}", path.display()));
        }
    }
    if missing.is_empty() {
        None
    } else {
        Some(InferenceFailure::missing_input(missing.join("; ")))
    }
}

async fn is_non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Map a non-zero exit into a failure. The last stderr line usually holds
/// the exception message, which is what the user sees.
fn exit_failure(output: &EngineOutput) -> InferenceFailure {
    let summary = output
        .stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("engine exited with code {}", output.exit_code));

    InferenceFailure::new(
        FailureKind::EngineFailure,
        format!("An error occurred: {summary}"),
        format!(
            "exit code {}\n--- stderr ---\n{}\n--- stdout ---\n{}",
            output.exit_code, output.stderr, output.stdout
        ),
    )
}

/// A clean exit only counts as success if the video actually exists.
async fn verify_output(output_path: &Path, output: &EngineOutput) -> InferenceOutcome {
    if is_non_empty_file(output_path).await {
        InferenceOutcome::Success {
            output_path: output_path.to_path_buf(),
            duration_ms: output.duration_ms,
        }
    } else {
        InferenceOutcome::Failure(InferenceFailure::new(
            FailureKind::EngineFailure,
            "An error occurred: the lip-sync engine produced no output",
            format!(
                "engine exited 0 but {} is missing or empty\n--- stderr ---\n{}",
                output_path.display(),
                output.stderr
            ),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::*;

    #[derive(Clone, Copy)]
    enum Behaviour {
        WriteVideo,
        Crash,
        ExitCleanWithoutVideo,
        /// Writes the video after 300 ms.
        SlowVideo,
        /// Sleeps far past any timeout and never checks its argument.
        Hang,
    }

    struct FakeEngine {
        behaviour: Behaviour,
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeEngine {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl LipSyncEngine for FakeEngine {
        async fn run(
            &self,
            request: &InferenceRequest,
            _timeout: Duration,
        ) -> Result<EngineOutput, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;

            let result = match self.behaviour {
                Behaviour::WriteVideo => {
                    tokio::fs::write(&request.output_path, b"fake mp4")
                        .await
                        .map_err(EngineError::IoError)?;
                    Ok(output(0, ""))
                }
                Behaviour::Crash => Ok(output(
                    1,
                    "Traceback (most recent call last):\n  File \"inference.py\"\nValueError: Face not detected! Ensure the video contains a face in all the frames.\n",
                )),
                Behaviour::ExitCleanWithoutVideo => Ok(output(0, "")),
                Behaviour::SlowVideo => {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    tokio::fs::write(&request.output_path, b"fake mp4")
                        .await
                        .map_err(EngineError::IoError)?;
                    Ok(output(0, ""))
                }
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(output(0, ""))
                }
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn output(exit_code: i32, stderr: &str) -> EngineOutput {
        EngineOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
            duration_ms: 20,
        }
    }

    async fn staged_request(dir: &Path) -> InferenceRequest {
        tokio::fs::write(dir.join("input_image.jpg"), b"jpg").await.expect("write image");
        tokio::fs::write(dir.join("input_audio.wav"), b"wav").await.expect("write audio");
        InferenceRequest::build(
            dir.join("input_image.jpg"),
            dir.join("input_audio.wav"),
            dir.join("output.mp4"),
            "checkpoints/wav2lip.pth",
        )
    }

    #[tokio::test]
    async fn success_returns_request_output_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = staged_request(dir.path()).await;
        let adapter = EngineAdapter::new(FakeEngine::new(Behaviour::WriteVideo), 1, DEFAULT_ENGINE_TIMEOUT);

        let outcome = adapter.invoke(&request).await;
        assert_matches!(outcome, InferenceOutcome::Success { ref output_path, .. } if *output_path == request.output_path);
        let bytes = tokio::fs::read(&request.output_path).await.expect("read output");
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn crash_surfaces_last_stderr_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = staged_request(dir.path()).await;
        let adapter = EngineAdapter::new(FakeEngine::new(Behaviour::Crash), 1, DEFAULT_ENGINE_TIMEOUT);

        let InferenceOutcome::Failure(failure) = adapter.invoke(&request).await else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::EngineFailure);
        assert!(failure.public_message.starts_with("An error occurred: ValueError: Face not detected!"));
        assert!(!failure.public_message.contains("Traceback"));
        assert!(failure.internal_detail.contains("Traceback"));
        assert!(failure.internal_detail.contains("exit code 1"));
    }

    #[tokio::test]
    async fn clean_exit_without_video_is_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = staged_request(dir.path()).await;
        let adapter = EngineAdapter::new(
            FakeEngine::new(Behaviour::ExitCleanWithoutVideo),
            1,
            DEFAULT_ENGINE_TIMEOUT,
        );

        let outcome = adapter.invoke(&request).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::EngineFailure));
    }

    #[tokio::test]
    async fn engine_ignoring_its_timeout_is_still_cut_off() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = staged_request(dir.path()).await;
        let adapter = EngineAdapter::new(FakeEngine::new(Behaviour::Hang), 1, Duration::from_millis(50));

        let outcome = tokio::time::timeout(Duration::from_secs(5), adapter.invoke(&request))
            .await
            .expect("adapter must return once its timeout passes");

        let InferenceOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.public_message.contains("did not finish"));
    }

    #[tokio::test]
    async fn waiting_too_long_for_a_slot_is_timeout_without_engine_call() {
        let dir_a = tempfile::tempdir().expect("tempdir");
        let dir_b = tempfile::tempdir().expect("tempdir");
        let request_a = staged_request(dir_a.path()).await;
        let request_b = staged_request(dir_b.path()).await;
        let adapter = EngineAdapter::new(FakeEngine::new(Behaviour::SlowVideo), 1, DEFAULT_ENGINE_TIMEOUT)
            .with_queue_timeout(Duration::from_millis(50));

        let (a, b) = tokio::join!(adapter.invoke(&request_a), adapter.invoke(&request_b));

        // Whichever request got the slot first succeeds.
        let (done, queued) = if a.is_success() { (a, b) } else { (b, a) };
        assert!(done.is_success());
        let InferenceOutcome::Failure(failure) = queued else {
            panic!("expected the queued request to fail");
        };
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.public_message.contains("busy"));
        assert_eq!(adapter.engine().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queued_request_runs_once_slot_frees_up() {
        let dir_a = tempfile::tempdir().expect("tempdir");
        let dir_b = tempfile::tempdir().expect("tempdir");
        let request_a = staged_request(dir_a.path()).await;
        let request_b = staged_request(dir_b.path()).await;
        let adapter = EngineAdapter::new(FakeEngine::new(Behaviour::SlowVideo), 1, DEFAULT_ENGINE_TIMEOUT)
            .with_queue_timeout(Duration::from_secs(5));

        let (a, b) = tokio::join!(adapter.invoke(&request_a), adapter.invoke(&request_b));

        assert!(a.is_success() && b.is_success());
        assert_eq!(adapter.engine().peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_audio_skips_engine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut request = staged_request(dir.path()).await;
        request.audio_path = dir.path().join("absent.wav");
        let adapter = EngineAdapter::new(FakeEngine::new(Behaviour::WriteVideo), 1, DEFAULT_ENGINE_TIMEOUT);

        let InferenceOutcome::Failure(failure) = adapter.invoke(&request).await else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::MissingInput);
        assert!(failure.internal_detail.contains("audio input missing"));
        assert_eq!(adapter.engine().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_face_is_missing_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = staged_request(dir.path()).await;
        tokio::fs::write(&request.face_path, b"").await.expect("truncate");
        let adapter = EngineAdapter::new(FakeEngine::new(Behaviour::WriteVideo), 1, DEFAULT_ENGINE_TIMEOUT);

        let outcome = adapter.invoke(&request).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::MissingInput));
        assert_eq!(adapter.engine().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrency_limit_serializes_runs() {
        let dir_a = tempfile::tempdir().expect("tempdir");
        let dir_b = tempfile::tempdir().expect("tempdir");
        let request_a = staged_request(dir_a.path()).await;
        let request_b = staged_request(dir_b.path()).await;
        let adapter = Arc::new(EngineAdapter::new(
            FakeEngine::new(Behaviour::WriteVideo),
            1,
            DEFAULT_ENGINE_TIMEOUT,
        ));

        let (a, b) = tokio::join!(adapter.invoke(&request_a), adapter.invoke(&request_b));
        assert!(a.is_success() && b.is_success());
        assert_eq!(adapter.engine().calls.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.engine().peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let adapter = EngineAdapter::new(FakeEngine::new(Behaviour::WriteVideo), 0, DEFAULT_ENGINE_TIMEOUT);
        assert_eq!(adapter.max_concurrency(), 1);
    }
}
