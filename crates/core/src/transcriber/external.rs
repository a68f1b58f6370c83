//! Out-of-process transcriber.
//!
//! Runs `<interpreter> <worker_dir>/<script> <media> <language>` with the
//! worker directory as the current directory. The external program signals
//! success by exiting with code 0 and leaving `<output_file>` in its working
//! directory; that file is then moved into the results directory as
//! `subs-<job_id>.srt`. Runs sharing the worker directory are serialized;
//! with `isolate_runs` each run gets a scratch directory instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::process::{self, DEFAULT_TAIL_LINES};
use super::sink::{OutputSink, TracingSink};
use super::types::{TranscribeError, Transcriber, TranscriptionRequest};
use crate::error::CoreError;

/// Directory (inside the worker directory) holding per-run scratch directories.
const RUNS_DIR: &str = ".runs";

/// Settings for [`ExternalTranscriber`].
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    /// Directory containing the script; also the process working directory.
    pub worker_dir: PathBuf,
    /// Program used to run the script. `None` runs the script directly.
    pub interpreter: Option<String>,
    /// Script file name, relative to `worker_dir`.
    pub script: String,
    /// Result file the script writes, relative to its working directory.
    pub output_file: String,
    /// Where relocated results are kept.
    pub results_dir: PathBuf,
    /// Kill the process after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Give each run its own scratch working directory.
    ///
    /// The external program always writes the same file name, so runs that
    /// share `worker_dir` are executed one at a time. Isolated runs proceed
    /// concurrently.
    pub isolate_runs: bool,
    /// Number of trailing output lines kept for error reports.
    pub tail_lines: usize,
}

impl TranscriberConfig {
    /// Defaults matching the bundled `whisper_worker/transcribe.py` contract.
    pub fn new(worker_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            worker_dir: worker_dir.into(),
            interpreter: Some("python3".to_string()),
            script: "transcribe.py".to_string(),
            output_file: "output.srt".to_string(),
            results_dir: results_dir.into(),
            timeout: None,
            isolate_runs: false,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

/// [`Transcriber`] backed by an external process.
pub struct ExternalTranscriber {
    config: TranscriberConfig,
    /// Canonical worker directory.
    worker_dir: PathBuf,
    /// Absolute path of the script inside `worker_dir`.
    script_path: PathBuf,
    sink: Arc<dyn OutputSink>,
    /// Held from spawn through relocation while runs share `worker_dir`.
    shared_dir: Mutex<()>,
}

impl std::fmt::Debug for ExternalTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalTranscriber")
            .field("config", &self.config)
            .field("script_path", &self.script_path)
            .finish_non_exhaustive()
    }
}

impl ExternalTranscriber {
    /// Validate the configuration and prepare the results directory.
    ///
    /// Fails if the worker directory or the script does not exist, so a
    /// misconfigured deployment is caught at startup rather than on the
    /// first job.
    pub fn new(config: TranscriberConfig) -> Result<Self, CoreError> {
        let worker_dir = std::fs::canonicalize(&config.worker_dir).map_err(|e| {
            CoreError::Validation(format!(
                "Worker directory {} is not accessible: {e}",
                config.worker_dir.display()
            ))
        })?;

        let script_path = worker_dir.join(&config.script);
        if !script_path.is_file() {
            return Err(CoreError::Validation(format!(
                "Transcriber script {} not found",
                script_path.display()
            )));
        }

        std::fs::create_dir_all(&config.results_dir).map_err(|e| {
            CoreError::Internal(format!(
                "Cannot create results directory {}: {e}",
                config.results_dir.display()
            ))
        })?;

        Ok(Self {
            config,
            worker_dir,
            script_path,
            sink: Arc::new(TracingSink),
            shared_dir: Mutex::new(()),
        })
    }

    /// Replace the default [`TracingSink`].
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run the script in `cwd` and relocate its result.
    async fn run_in(
        &self,
        cwd: &Path,
        request: &TranscriptionRequest,
    ) -> Result<PathBuf, TranscribeError> {
        let media_path = fs::canonicalize(&request.media_path).await?;

        let mut cmd = match &self.config.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.script_path);
                cmd
            }
            None => Command::new(&self.script_path),
        };
        cmd.arg(&media_path)
            .arg(&request.language)
            .current_dir(cwd);

        tracing::info!(
            job_id = %request.job_id,
            language = %request.language,
            cwd = %cwd.display(),
            "Starting transcriber",
        );

        let outcome = process::run_streaming(
            &mut cmd,
            &request.job_id,
            self.sink.as_ref(),
            self.config.tail_lines,
            self.config.timeout,
        )
        .await?;

        tracing::info!(
            job_id = %request.job_id,
            exit_code = outcome.exit_code,
            duration_ms = outcome.duration_ms,
            "Transcriber exited",
        );

        if outcome.exit_code != 0 {
            return Err(TranscribeError::TranscriptionFailed {
                exit_code: outcome.exit_code,
                output_tail: outcome.output_tail,
            });
        }

        let produced = cwd.join(&self.config.output_file);
        if !fs::try_exists(&produced).await.unwrap_or(false) {
            return Err(TranscribeError::MissingOutput {
                expected: produced,
                output_tail: outcome.output_tail,
            });
        }

        let destination = self
            .config
            .results_dir
            .join(format!("subs-{}.srt", request.job_id));
        relocate(&produced, &destination).await?;
        Ok(destination)
    }
}

impl Transcriber for ExternalTranscriber {
    async fn transcribe(&self, request: TranscriptionRequest) -> Result<PathBuf, TranscribeError> {
        if !self.config.isolate_runs {
            let _guard = self.shared_dir.lock().await;
            return self.run_in(&self.worker_dir, &request).await;
        }

        let scratch = self.worker_dir.join(RUNS_DIR).join(&request.job_id);
        fs::create_dir_all(&scratch).await?;
        let result = self.run_in(&scratch, &request).await;
        if let Err(e) = fs::remove_dir_all(&scratch).await {
            tracing::warn!(
                job_id = %request.job_id,
                dir = %scratch.display(),
                error = %e,
                "Failed to remove scratch directory",
            );
        }
        result
    }
}

/// Move `from` to `to`, copying when a rename is not possible
/// (e.g. across filesystems).
async fn relocate(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    fs::copy(from, to).await?;
    fs::remove_file(from).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
