//! Bounded background execution of transcription jobs.
//!
//! [`JobExecutor::submit`] never blocks and never rejects: each submission
//! becomes a tracked task that waits for one of `pool_size` semaphore
//! permits, runs the [`Transcriber`], deletes the source media file, and
//! records the outcome in the [`JobRegistry`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::job::JobId;
use crate::registry::JobRegistry;
use crate::transcriber::{Transcriber, TranscriptionRequest};

/// Lower bound of the default pool size.
pub const MIN_DEFAULT_POOL_SIZE: usize = 4;

/// Upper bound of the default pool size.
pub const MAX_DEFAULT_POOL_SIZE: usize = 8;

/// Pool size derived from the host's available parallelism, clamped to
/// [`MIN_DEFAULT_POOL_SIZE`]`..=`[`MAX_DEFAULT_POOL_SIZE`].
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_DEFAULT_POOL_SIZE)
        .clamp(MIN_DEFAULT_POOL_SIZE, MAX_DEFAULT_POOL_SIZE)
}

/// Point-in-time view of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub pool_size: usize,
    /// Jobs currently running the transcriber.
    pub active: usize,
    /// Jobs waiting for a free worker.
    pub queued: usize,
}

/// Runs submitted jobs on a bounded pool.
pub struct JobExecutor<T> {
    registry: Arc<JobRegistry>,
    transcriber: Arc<T>,
    permits: Arc<Semaphore>,
    pool_size: usize,
    tracker: TaskTracker,
    active: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
}

impl<T: Transcriber> JobExecutor<T> {
    /// Create an executor running at most `pool_size` jobs at once.
    pub fn new(registry: Arc<JobRegistry>, transcriber: Arc<T>, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            registry,
            transcriber,
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            tracker: TaskTracker::new(),
            active: Arc::new(AtomicUsize::new(0)),
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a job for background execution.
    ///
    /// Ownership of `media_path` passes to the background task, which
    /// deletes it exactly once whatever the outcome.
    pub fn submit(&self, job_id: JobId, media_path: PathBuf, language: String) {
        let span = tracing::info_span!("job", job_id = %job_id);
        let task = JobTask {
            request: TranscriptionRequest {
                job_id,
                media_path,
                language,
            },
            registry: Arc::clone(&self.registry),
            transcriber: Arc::clone(&self.transcriber),
            permits: Arc::clone(&self.permits),
            active: Arc::clone(&self.active),
            queued: Arc::clone(&self.queued),
        };
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.tracker.spawn(task.run().instrument(span));
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            pool_size: self.pool_size,
            active: self.active.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
        }
    }

    /// Stop the pool and wait for in-flight jobs.
    ///
    /// Jobs still waiting for a worker are marked `ERROR` without running.
    /// Returns `true` if every job finished within `timeout`. Jobs still
    /// running after the deadline are left to the runtime's shutdown.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.permits.close();
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for in-flight jobs");
        }
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }
}

/// One queued job and the handles it needs.
struct JobTask<T> {
    request: TranscriptionRequest,
    registry: Arc<JobRegistry>,
    transcriber: Arc<T>,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
}

impl<T: Transcriber> JobTask<T> {
    async fn run(self) {
        let job_id = self.request.job_id.clone();
        let media_path = self.request.media_path.clone();

        let permit = self.permits.acquire_owned().await;
        self.queued.fetch_sub(1, Ordering::SeqCst);
        let Ok(_permit) = permit else {
            remove_media(&media_path).await;
            record_failure(&self.registry, &job_id, "Worker pool is shut down".to_string()).await;
            return;
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        tracing::info!(language = %self.request.language, "Job started");

        let outcome = AssertUnwindSafe(self.transcriber.transcribe(self.request))
            .catch_unwind()
            .await;

        // The media file is gone before the job becomes terminal, so anyone
        // observing COMPLETED or ERROR also observes the cleanup.
        remove_media(&media_path).await;

        match outcome {
            Ok(Ok(result_path)) => {
                tracing::info!(result = %result_path.display(), "Job completed");
                if let Err(e) = self.registry.mark_completed(&job_id, result_path.clone()).await {
                    tracing::error!(error = %e, "Failed to record completed job");
                    discard_result(&result_path).await;
                }
            }
            Ok(Err(e)) => {
                let message = e.describe();
                tracing::warn!(error = %message, "Job failed");
                record_failure(&self.registry, &job_id, message).await;
            }
            Err(panic) => {
                let message = format!("Transcriber crashed: {}", panic_message(&*panic));
                tracing::error!(error = %message, "Job panicked");
                record_failure(&self.registry, &job_id, message).await;
            }
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn record_failure(registry: &JobRegistry, job_id: &str, message: String) {
    if let Err(e) = registry.mark_failed(job_id, message).await {
        tracing::error!(job_id, error = %e, "Failed to record failed job");
    }
}

/// Delete the source media file. Failures are logged, never propagated.
async fn remove_media(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed source media"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Source media already gone");
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove source media");
        }
    }
}

/// Delete a result that could not be attached to its job.
async fn discard_result(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to discard orphaned result");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::job::{Job, JobState};
    use crate::transcriber::TranscribeError;

    /// What the fake transcriber does for every request.
    enum Behaviour {
        /// Write `contents` to `<results>/<job_id>.srt`.
        Succeed(&'static str),
        Fail,
        Panic,
    }

    struct FakeTranscriber {
        behaviour: Behaviour,
        results: PathBuf,
        /// Requests block until a permit is available here.
        gate: Arc<Semaphore>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl FakeTranscriber {
        fn new(behaviour: Behaviour, results: &Path) -> Self {
            Self {
                behaviour,
                results: results.to_path_buf(),
                gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            }
        }

        fn gated(behaviour: Behaviour, results: &Path) -> Self {
            Self {
                gate: Arc::new(Semaphore::new(0)),
                ..Self::new(behaviour, results)
            }
        }
    }

    impl Transcriber for FakeTranscriber {
        async fn transcribe(
            &self,
            request: TranscriptionRequest,
        ) -> Result<PathBuf, TranscribeError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            let permit = self.gate.acquire().await.expect("gate open");
            permit.forget();
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            match self.behaviour {
                Behaviour::Succeed(contents) => {
                    let path = self.results.join(format!("{}.srt", request.job_id));
                    tokio::fs::write(&path, contents).await?;
                    Ok(path)
                }
                Behaviour::Fail => Err(TranscribeError::TranscriptionFailed {
                    exit_code: 1,
                    output_tail: vec!["Traceback: boom".to_string()],
                }),
                Behaviour::Panic => panic!("transcriber exploded"),
            }
        }
    }

    struct Harness {
        registry: Arc<JobRegistry>,
        executor: JobExecutor<FakeTranscriber>,
        transcriber: Arc<FakeTranscriber>,
        dir: TempDir,
    }

    impl Harness {
        fn new(make: impl FnOnce(&Path) -> FakeTranscriber, pool_size: usize) -> Self {
            let dir = tempfile::tempdir().expect("temp dir");
            let registry = Arc::new(JobRegistry::new());
            let transcriber = Arc::new(make(dir.path()));
            let executor = JobExecutor::new(Arc::clone(&registry), Arc::clone(&transcriber), pool_size);
            Self {
                registry,
                executor,
                transcriber,
                dir,
            }
        }

        /// Create a job plus a media file and submit it.
        async fn submit(&self, name: &str) -> (JobId, PathBuf) {
            let media = self.dir.path().join(format!("{name}.mp4"));
            std::fs::write(&media, b"fake media").expect("write media");
            let id = self.registry.create("en").await;
            self.executor.submit(id.clone(), media.clone(), "en".to_string());
            (id, media)
        }

        async fn wait_terminal(&self, id: &str) -> Job {
            for _ in 0..500 {
                let job = self.registry.get(id).await.expect("job exists");
                if job.is_terminal() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("job {id} never finished");
        }

        async fn wait_for(&self, check: impl Fn(ExecutorStats) -> bool) {
            for _ in 0..500 {
                if check(self.executor.stats()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("executor never reached expected state: {:?}", self.executor.stats());
        }
    }

    #[test]
    fn default_pool_size_is_bounded() {
        let size = default_pool_size();
        assert!((MIN_DEFAULT_POOL_SIZE..=MAX_DEFAULT_POOL_SIZE).contains(&size));
    }

    #[tokio::test]
    async fn success_marks_completed_and_removes_media() {
        let h = Harness::new(|d| FakeTranscriber::new(Behaviour::Succeed("subs"), d), 2);
        let (id, media) = h.submit("a").await;

        let job = h.wait_terminal(&id).await;

        assert_eq!(job.state(), JobState::Completed);
        let result = job.result_path().expect("result path");
        assert_eq!(std::fs::read_to_string(result).unwrap(), "subs");
        assert!(!media.exists());
    }

    #[tokio::test]
    async fn failure_marks_error_and_removes_media() {
        let h = Harness::new(|d| FakeTranscriber::new(Behaviour::Fail, d), 2);
        let (id, media) = h.submit("b").await;

        let job = h.wait_terminal(&id).await;

        assert_eq!(job.state(), JobState::Error);
        let message = job.error_message().expect("message");
        assert!(message.contains("non-zero code 1"));
        assert!(message.contains("Traceback: boom"));
        assert!(!media.exists());
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let h = Harness::new(|d| FakeTranscriber::new(Behaviour::Panic, d), 1);
        let (first, first_media) = h.submit("c1").await;
        let (second, _) = h.submit("c2").await;

        let job = h.wait_terminal(&first).await;
        assert_eq!(job.state(), JobState::Error);
        assert!(job.error_message().unwrap().contains("transcriber exploded"));
        assert!(!first_media.exists());

        // The pool keeps working after a crash.
        let job = h.wait_terminal(&second).await;
        assert_eq!(job.state(), JobState::Error);
        h.wait_for(|s| s.active == 0 && s.queued == 0).await;
    }

    #[tokio::test]
    async fn missing_media_does_not_change_outcome() {
        let h = Harness::new(|d| FakeTranscriber::new(Behaviour::Succeed("x"), d), 1);
        let id = h.registry.create("en").await;
        h.executor
            .submit(id.clone(), h.dir.path().join("never-written.mp4"), "en".into());

        let job = h.wait_terminal(&id).await;
        assert_eq!(job.state(), JobState::Completed);
    }

    #[tokio::test]
    async fn submissions_beyond_pool_are_queued() {
        let h = Harness::new(|d| FakeTranscriber::gated(Behaviour::Succeed("q"), d), 1);
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(h.submit(&format!("q{i}")).await.0);
        }

        h.wait_for(|s| s.active == 1 && s.queued == 2).await;
        for id in &ids {
            assert_eq!(h.registry.get(id).await.unwrap().state(), JobState::Processing);
        }

        h.transcriber.gate.add_permits(3);
        for id in &ids {
            assert_eq!(h.wait_terminal(id).await.state(), JobState::Completed);
        }
        assert_eq!(h.transcriber.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_pool_size() {
        let h = Harness::new(|d| FakeTranscriber::new(Behaviour::Succeed("p"), d), 2);
        let mut ids = Vec::new();
        for i in 0..8 {
            ids.push(h.submit(&format!("p{i}")).await.0);
        }
        for id in &ids {
            assert_eq!(h.wait_terminal(id).await.state(), JobState::Completed);
        }
        assert!(h.transcriber.max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn concurrent_jobs_have_independent_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let ok = JobExecutor::new(
            Arc::clone(&registry),
            Arc::new(FakeTranscriber::new(Behaviour::Succeed("ok"), dir.path())),
            2,
        );
        let bad = JobExecutor::new(
            Arc::clone(&registry),
            Arc::new(FakeTranscriber::new(Behaviour::Fail, dir.path())),
            2,
        );

        let a = registry.create("en").await;
        let b = registry.create("en").await;
        assert_ne!(a, b);
        ok.submit(a.clone(), dir.path().join("a.mp4"), "en".into());
        bad.submit(b.clone(), dir.path().join("b.mp4"), "en".into());

        for _ in 0..500 {
            if registry.counts().await.processing == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.get(&a).await.unwrap().state(), JobState::Completed);
        assert_eq!(registry.get(&b).await.unwrap().state(), JobState::Error);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_jobs() {
        let h = Harness::new(|d| FakeTranscriber::gated(Behaviour::Succeed("s"), d), 2);
        let (id, _) = h.submit("s").await;
        h.wait_for(|s| s.active == 1).await;
        h.transcriber.gate.add_permits(1);

        assert!(h.executor.shutdown(Duration::from_secs(5)).await);
        assert_eq!(h.registry.get(&id).await.unwrap().state(), JobState::Completed);
    }

    #[tokio::test]
    async fn shutdown_fails_queued_jobs_and_keeps_running_ones() {
        let h = Harness::new(|d| FakeTranscriber::gated(Behaviour::Succeed("r"), d), 1);
        let (running, _) = h.submit("r1").await;
        let (queued, queued_media) = h.submit("r2").await;
        h.wait_for(|s| s.active == 1 && s.queued == 1).await;

        // The running job is blocked, so the deadline passes.
        assert!(!h.executor.shutdown(Duration::from_millis(100)).await);

        let job = h.wait_terminal(&queued).await;
        assert_eq!(job.state(), JobState::Error);
        assert!(job.error_message().unwrap().contains("shut down"));
        assert!(!queued_media.exists());
        assert_eq!(h.executor.stats().queued, 0);

        h.transcriber.gate.add_permits(1);
        assert_eq!(h.wait_terminal(&running).await.state(), JobState::Completed);
    }

    #[test]
    fn panic_message_extracts_payload() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(&*boxed), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
