use std::sync::Arc;

use lipsync_core::artifacts::ArtifactStore;
use lipsync_core::engine::adapter::EngineAdapter;
use lipsync_core::engine::process::SubprocessEngine;
use lipsync_core::pipeline::Pipeline;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Staging, engine invocation and artifact lifecycle.
    pub pipeline: Arc<Pipeline<SubprocessEngine>>,
}

impl AppState {
    pub fn new(pipeline: Pipeline<SubprocessEngine>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Wire the production pipeline from configuration.
    ///
    /// Staging and checkpoint paths are made absolute so they stay valid
    /// when the engine runs from its own working directory.
    pub fn from_config(config: &ServerConfig) -> std::io::Result<Self> {
        let scratch_dir = std::path::absolute(&config.scratch_dir)?;
        let checkpoint_path = std::path::absolute(&config.checkpoint_path)?;

        let mut engine =
            SubprocessEngine::python(config.engine.python_bin.clone(), config.engine.script.clone());
        if let Some(dir) = &config.engine.working_directory {
            engine = engine.with_working_directory(dir.clone());
        }

        let adapter = EngineAdapter::new(
            engine,
            config.engine.max_concurrency,
            config.engine.timeout(),
        )
        .with_queue_timeout(config.engine.queue_timeout());
        let pipeline = Pipeline::new(ArtifactStore::new(scratch_dir), adapter, checkpoint_path);

        Ok(Self::new(pipeline))
    }
}
