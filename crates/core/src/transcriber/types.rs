//! Transcriber interface and shared types.
//!
//! Defines [`Transcriber`], the trait the executor drives, along with
//! [`TranscriptionRequest`] and [`TranscribeError`].

use std::future::Future;
use std::path::PathBuf;

use crate::job::JobId;

/// Everything the transcriber needs for one job.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub job_id: JobId,
    /// Source media file. Owned by the executor task, not the transcriber.
    pub media_path: PathBuf,
    /// Opaque language code, passed through as-is.
    pub language: String,
}

/// Errors reported by a transcriber.
///
/// `TranscriptionFailed` and `MissingOutput` are the two ways the external
/// program can fail on its own terms; the remaining variants cover the
/// process plumbing around it.
#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("Transcriber exited with non-zero code {exit_code}")]
    TranscriptionFailed {
        /// Process exit code (`-1` if killed by a signal).
        exit_code: i32,
        output_tail: Vec<String>,
    },

    #[error("Transcriber exited successfully but left no result at {}", expected.display())]
    MissingOutput {
        expected: PathBuf,
        output_tail: Vec<String>,
    },

    #[error("Transcriber timed out after {elapsed_ms}ms")]
    Timeout {
        elapsed_ms: u64,
        output_tail: Vec<String>,
    },

    #[error("Failed to start transcriber: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscribeError {
    /// Last captured output lines, when the process got far enough to produce any.
    pub fn output_tail(&self) -> &[String] {
        match self {
            Self::TranscriptionFailed { output_tail, .. }
            | Self::MissingOutput { output_tail, .. }
            | Self::Timeout { output_tail, .. } => output_tail,
            Self::Spawn(_) | Self::Io(_) => &[],
        }
    }

    /// Human-readable message recorded on a failed job.
    ///
    /// Appends the last non-blank output line, which for most transcription
    /// scripts is the exception or usage message that explains the failure.
    pub fn describe(&self) -> String {
        let last = self
            .output_tail()
            .iter()
            .rev()
            .map(|line| line.trim())
            .find(|line| !line.is_empty());
        match last {
            Some(line) => format!("{self}: {line}"),
            None => self.to_string(),
        }
    }
}

/// Trait implemented by anything that turns media into a subtitle file.
///
/// On success the returned path points at a file the caller now owns.
pub trait Transcriber: Send + Sync + 'static {
    fn transcribe(
        &self,
        request: TranscriptionRequest,
    ) -> impl Future<Output = Result<PathBuf, TranscribeError>> + Send;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
