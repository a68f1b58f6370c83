//! Job model and lifecycle state machine.
//!
//! A job starts in [`JobStatus::Processing`] and moves exactly once to
//! either [`JobStatus::Completed`] (carrying the result path) or
//! [`JobStatus::Failed`] (carrying the error message). The payload of each
//! terminal state lives inside its variant, so a job can never be
//! "completed without a result" or "processing with an error".

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque job / transaction identifier.
pub type JobId = String;

/// Timestamp type used for job bookkeeping.
pub type Timestamp = DateTime<Utc>;

/// Wire-level job state, as reported to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Processing,
    Completed,
    Error,
}

impl JobState {
    /// `true` for `COMPLETED` and `ERROR`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
        }
    }
}

/// Lifecycle status of a job, including the terminal payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Processing,
    Completed { result_path: PathBuf },
    Failed { message: String },
}

/// One submit-to-result unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    /// Language code as submitted; passed through to the transcriber unvalidated.
    pub language: String,
    pub status: JobStatus,
    pub created_at: Timestamp,
    /// Set when the job reaches a terminal state.
    pub finished_at: Option<Timestamp>,
}

impl Job {
    /// Create a new job in the `PROCESSING` state.
    pub fn new(id: JobId, language: impl Into<String>) -> Self {
        Self {
            id,
            language: language.into(),
            status: JobStatus::Processing,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn state(&self) -> JobState {
        match self.status {
            JobStatus::Processing => JobState::Processing,
            JobStatus::Completed { .. } => JobState::Completed,
            JobStatus::Failed { .. } => JobState::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Result artifact path, present only when `COMPLETED`.
    pub fn result_path(&self) -> Option<&Path> {
        match &self.status {
            JobStatus::Completed { result_path } => Some(result_path),
            _ => None,
        }
    }

    /// Error message, present only when `ERROR`.
    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Failed { message } => Some(message),
            _ => None,
        }
    }

    /// Move a processing job into a terminal status.
    ///
    /// Returns the rejected status back to the caller when the job has
    /// already finished; the job itself is left untouched in that case.
    pub(crate) fn finish(&mut self, status: JobStatus) -> Result<(), JobStatus> {
        if self.is_terminal() || status == JobStatus::Processing {
            return Err(status);
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
