//! Destinations for transcriber process output.

use serde::Serialize;

/// Which pipe a line of process output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Receives diagnostic output from the external process, one line at a time.
///
/// Called from the job's own task while the process is still running, so
/// implementations must not block.
pub trait OutputSink: Send + Sync {
    fn line(&self, job_id: &str, stream: OutputStream, line: &str);
}

/// Default sink: forwards each line as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, job_id: &str, stream: OutputStream, line: &str) {
        tracing::info!(
            target: "scribe_core::transcriber::output",
            job_id,
            stream = stream.as_str(),
            "{line}"
        );
    }
}
