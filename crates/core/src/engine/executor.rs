//! Engine interface and shared types.
//!
//! Defines [`LipSyncEngine`], the trait every engine implementation
//! satisfies, along with [`EngineOutput`] and [`EngineError`].

use std::fmt;
use std::time::Duration;

use crate::inference::InferenceRequest;

/// Captured output from one engine run.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// Complete stdout captured from the engine.
    pub stdout: String,
    /// Complete stderr captured from the engine.
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl EngineOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors that prevent an engine run from completing at all.
///
/// A run that completes with a non-zero exit code is not an error at this
/// level; it is reported through [`EngineOutput::exit_code`].
#[derive(Debug)]
pub enum EngineError {
    /// The run exceeded its timeout and was killed.
    Timeout {
        /// Elapsed wall-clock time before the run was killed.
        elapsed_ms: u64,
    },
    /// An I/O error occurred while spawning or talking to the engine.
    IoError(std::io::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed_ms } => write!(f, "Engine timed out after {elapsed_ms}ms"),
            Self::IoError(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(err) => Some(err),
            Self::Timeout { .. } => None,
        }
    }
}

/// A lip-sync engine: consumes an [`InferenceRequest`] and writes a video
/// to `request.output_path`.
pub trait LipSyncEngine: Send + Sync {
    /// Run the engine once, giving up after `timeout`.
    fn run(
        &self,
        request: &InferenceRequest,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<EngineOutput, EngineError>> + Send;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
