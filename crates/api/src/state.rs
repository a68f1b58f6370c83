use std::sync::Arc;

use scribe_core::error::CoreError;
use scribe_core::executor::JobExecutor;
use scribe_core::registry::JobRegistry;
use scribe_core::transcriber::ExternalTranscriber;

use crate::config::ServerConfig;

/// Executor type used by the running service.
pub type TranscriptionExecutor = JobExecutor<ExternalTranscriber>;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// All known jobs, shared with the executor.
    pub registry: Arc<JobRegistry>,
    /// Bounded background worker pool running the transcriber.
    pub executor: Arc<TranscriptionExecutor>,
}

impl AppState {
    /// Wire up registry, transcriber and executor from configuration.
    ///
    /// Fails if the transcriber configuration is invalid (e.g. the worker
    /// directory or script is missing).
    pub fn build(config: ServerConfig) -> Result<Self, CoreError> {
        std::fs::create_dir_all(&config.upload_dir).map_err(|e| {
            CoreError::Internal(format!(
                "Cannot create upload directory {}: {e}",
                config.upload_dir.display()
            ))
        })?;
        let transcriber = Arc::new(ExternalTranscriber::new(config.transcriber.clone())?);
        let registry = Arc::new(JobRegistry::new());
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&registry),
            transcriber,
            config.worker_pool_size,
        ));
        Ok(Self {
            config: Arc::new(config),
            registry,
            executor,
        })
    }
}
