//! Tagged result of an engine invocation.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Why a generation request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An input was absent or empty; the engine was not called.
    MissingInput,
    /// The engine ran and failed, or could not be run.
    EngineFailure,
    /// The engine exceeded its time limit and was killed.
    Timeout,
}

impl FailureKind {
    /// Stable machine-readable code used in API error bodies.
    pub fn code(self) -> &'static str {
        match self {
            Self::MissingInput => "MISSING_INPUT",
            Self::EngineFailure => "ENGINE_FAILURE",
            Self::Timeout => "ENGINE_TIMEOUT",
        }
    }
}

/// A failed generation: a message safe to show the user, and the full
/// diagnostic for operator logs.
#[derive(Debug, Clone)]
pub struct InferenceFailure {
    pub kind: FailureKind,
    pub public_message: String,
    pub internal_detail: String,
}

impl InferenceFailure {
    pub fn new(
        kind: FailureKind,
        public_message: impl Into<String>,
        internal_detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            public_message: public_message.into(),
            internal_detail: internal_detail.into(),
        }
    }

    pub fn missing_input(internal_detail: impl Into<String>) -> Self {
        Self::new(
            FailureKind::MissingInput,
            "Please upload both an image and an audio file.",
            internal_detail,
        )
    }

    /// Record the full diagnostic. Clients only ever see `public_message`.
    pub fn log(&self) {
        tracing::error!(
            kind = self.kind.code(),
            message = %self.public_message,
            detail = %self.internal_detail,
            "Lip-sync generation failed"
        );
    }
}

impl fmt::Display for InferenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.public_message)
    }
}

impl std::error::Error for InferenceFailure {}

/// Outcome of one invocation.
#[derive(Debug, Clone)]
pub enum InferenceOutcome {
    Success {
        /// Where the video was written; equals the request's output path.
        output_path: PathBuf,
        duration_ms: u64,
    },
    Failure(InferenceFailure),
}

impl InferenceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(failure) => Some(failure.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let codes = [
            FailureKind::MissingInput.code(),
            FailureKind::EngineFailure.code(),
            FailureKind::Timeout.code(),
        ];
        assert_eq!(codes, ["MISSING_INPUT", "ENGINE_FAILURE", "ENGINE_TIMEOUT"]);
    }

    #[test]
    fn display_shows_only_public_message() {
        let failure = InferenceFailure::new(
            FailureKind::EngineFailure,
            "An error occurred: bad face",
            "Traceback (most recent call last): secret/path.py",
        );
        assert_eq!(failure.to_string(), "An error occurred: bad face");
    }
}
