//! Subprocess execution with streamed output.
//!
//! [`run_streaming`] spawns a prepared [`Command`], forwards stdout and
//! stderr line by line to an [`OutputSink`] while the child runs, and keeps
//! only the last few lines in memory for diagnostics. Output draining and
//! the wait on the child are joined in the caller's task, so no detached
//! reader tasks outlive the process.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::sink::{OutputSink, OutputStream};
use super::types::TranscribeError;

/// Number of trailing output lines kept when not configured otherwise.
pub const DEFAULT_TAIL_LINES: usize = 20;

/// Result of a process that ran to completion.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    /// The last lines of combined stdout/stderr, oldest first.
    pub output_tail: Vec<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Bounded ring buffer of the most recent output lines.
#[derive(Debug)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn into_vec(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Spawn `cmd`, stream its output to `sink`, and wait for it to exit.
///
/// The caller sets program, arguments and working directory; stdio is
/// configured here. When `timeout` elapses the child is killed and
/// [`TranscribeError::Timeout`] is returned.
pub async fn run_streaming(
    cmd: &mut Command,
    job_id: &str,
    sink: &dyn OutputSink,
    tail_lines: usize,
    timeout: Option<Duration>,
) -> Result<ProcessOutcome, TranscribeError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(TranscribeError::Spawn)?;
    tracing::debug!(job_id, pid = child.id(), "Transcriber process started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let tail = Mutex::new(OutputTail::new(tail_lines));

    let waited = {
        let run = async {
            let (_, _, status) = tokio::join!(
                drain_lines(stdout, OutputStream::Stdout, job_id, sink, &tail),
                drain_lines(stderr, OutputStream::Stderr, job_id, sink, &tail),
                child.wait(),
            );
            status
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let output_tail = tail
        .into_inner()
        .map(OutputTail::into_vec)
        .unwrap_or_default();

    match waited {
        Some(Ok(status)) => Ok(ProcessOutcome {
            exit_code: status.code().unwrap_or(-1),
            output_tail,
            duration_ms,
        }),
        Some(Err(e)) => Err(TranscribeError::Io(e)),
        None => {
            if let Err(e) = child.kill().await {
                tracing::warn!(job_id, error = %e, "Failed to kill timed-out transcriber");
            }
            Err(TranscribeError::Timeout {
                elapsed_ms: duration_ms,
                output_tail,
            })
        }
    }
}

/// Forward every line of `stream` to the sink and the tail buffer.
///
/// Lines are decoded lossily so a stray non-UTF-8 byte in the transcriber's
/// progress output does not end the drain early.
async fn drain_lines<R: AsyncRead + Unpin>(
    stream: Option<R>,
    kind: OutputStream,
    job_id: &str,
    sink: &dyn OutputSink,
    tail: &Mutex<OutputTail>,
) {
    let Some(stream) = stream else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                sink.line(job_id, kind, &line);
                if let Ok(mut tail) = tail.lock() {
                    tail.push(line);
                }
            }
            Err(e) => {
                tracing::warn!(job_id, stream = kind.as_str(), error = %e, "Output stream read failed");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
