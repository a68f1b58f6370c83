//! In-memory job registry.
//!
//! The registry is the only shared mutable structure in the service. It is
//! designed to be wrapped in `Arc` and handed to both the HTTP handlers and
//! the [`JobExecutor`](crate::executor::JobExecutor). Every mutation happens
//! inside a single write-lock critical section and readers only ever receive
//! cloned snapshots, so a poller can never see a half-updated job.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::job::{Job, JobId, JobState, JobStatus, Timestamp};

/// Entity name used in [`CoreError::NotFound`].
pub const JOB_ENTITY: &str = "Job";

/// Number of jobs per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Concurrent-safe mapping from job identifier to [`Job`].
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a fresh job in `PROCESSING` and return its identifier.
    ///
    /// Identifiers are random UUIDs; on the (practically impossible) event of
    /// a collision with a live entry a new one is drawn, so an existing job
    /// is never overwritten.
    pub async fn create(&self, language: &str) -> JobId {
        let mut jobs = self.jobs.write().await;
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            if jobs.contains_key(&id) {
                continue;
            }
            jobs.insert(id.clone(), Job::new(id.clone(), language));
            tracing::debug!(job_id = %id, language, "Job created");
            return id;
        }
    }

    /// Snapshot of the job with the given identifier.
    pub async fn get(&self, id: &str) -> Result<Job, CoreError> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Transition `PROCESSING → COMPLETED`.
    pub async fn mark_completed(&self, id: &str, result_path: PathBuf) -> Result<(), CoreError> {
        self.finish(id, JobStatus::Completed { result_path }).await
    }

    /// Transition `PROCESSING → ERROR`.
    pub async fn mark_failed(&self, id: &str, message: impl Into<String>) -> Result<(), CoreError> {
        self.finish(
            id,
            JobStatus::Failed {
                message: message.into(),
            },
        )
        .await
    }

    async fn finish(&self, id: &str, status: JobStatus) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| not_found(id))?;
        let current = job.state();
        job.finish(status).map_err(|rejected| {
            tracing::warn!(
                job_id = %id,
                current = current.as_str(),
                rejected = ?rejected,
                "Rejected transition out of terminal state",
            );
            CoreError::Conflict(format!(
                "Job {id} is already {} and cannot change state",
                current.as_str()
            ))
        })?;
        tracing::debug!(job_id = %id, state = job.state().as_str(), "Job finished");
        Ok(())
    }

    /// Number of jobs in each state.
    pub async fn counts(&self) -> JobCounts {
        let jobs = self.jobs.read().await;
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.state() {
                JobState::Processing => counts.processing += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Error => counts.failed += 1,
            }
        }
        counts
    }

    /// Total number of tracked jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Remove terminal jobs that finished before `cutoff` and return them.
    ///
    /// Jobs still in `PROCESSING` are never evicted. The caller owns any
    /// result artifacts of the returned jobs.
    pub async fn evict_finished_before(&self, cutoff: Timestamp) -> Vec<Job> {
        let mut jobs = self.jobs.write().await;
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|job| job.finished_at.is_some_and(|at| at < cutoff))
            .map(|job| job.id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| jobs.remove(id))
            .collect()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(id: &str) -> CoreError {
    CoreError::NotFound {
        entity: JOB_ENTITY,
        id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
