//! Engine implementation backed by a child process.
//!
//! The default deployment runs the engine's Python entry point
//! (`python3 inference.py <flags>`). The full request is also piped to
//! stdin as JSON for wrappers that prefer structured input.

use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;

use super::executor::{EngineError, EngineOutput, LipSyncEngine};
use super::subprocess;
use crate::inference::InferenceRequest;

/// Runs `program base_args... <request flags>` for every request.
#[derive(Debug, Clone)]
pub struct SubprocessEngine {
    program: String,
    base_args: Vec<String>,
    working_directory: Option<PathBuf>,
    env_vars: Vec<(String, String)>,
}

impl SubprocessEngine {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
            working_directory: None,
            env_vars: Vec::new(),
        }
    }

    /// Engine driven by a Python script, with unbuffered output so the
    /// traceback is captured even if the interpreter is killed.
    pub fn python(python_bin: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(python_bin, vec![script.into()])
            .with_env("PYTHONUNBUFFERED", "1")
    }

    /// Run the engine from `dir` (the directory holding the engine sources).
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build the command for `request` without spawning it.
    pub fn command(&self, request: &InferenceRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args).args(request.to_engine_args());
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl LipSyncEngine for SubprocessEngine {
    async fn run(
        &self,
        request: &InferenceRequest,
        timeout: Duration,
    ) -> Result<EngineOutput, EngineError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| EngineError::IoError(std::io::Error::other(e)))?;
        let mut cmd = self.command(request);
        subprocess::run_command(&mut cmd, payload, timeout).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
