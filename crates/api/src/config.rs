use std::path::PathBuf;
use std::time::Duration;

use scribe_core::executor::default_pool_size;
use scribe_core::transcriber::TranscriberConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `300`, uploads can be large).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight jobs (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Maximum accepted request body in bytes (default: 2 GiB).
    pub max_upload_bytes: usize,
    /// Where uploaded media is staged until its job finishes.
    pub upload_dir: PathBuf,
    /// Number of concurrently running transcriptions.
    pub worker_pool_size: usize,
    /// Finished jobs older than this are evicted. `None` keeps them forever.
    pub job_retention: Option<Duration>,
    /// External transcriber settings.
    pub transcriber: TranscriberConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                          |
    /// |----------------------------|----------------------------------|
    /// | `HOST`                     | `0.0.0.0`                        |
    /// | `PORT`                     | `3000`                           |
    /// | `CORS_ORIGINS`             | `http://localhost:5173`          |
    /// | `REQUEST_TIMEOUT_SECS`     | `300`                            |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `30`                             |
    /// | `MAX_UPLOAD_BYTES`         | `2147483648`                     |
    /// | `UPLOAD_DIR`               | `<tmp>/scribe/uploads`           |
    /// | `RESULTS_DIR`              | `<tmp>/scribe/results`           |
    /// | `WORKER_DIR`               | `whisper_worker`                 |
    /// | `TRANSCRIBER_INTERPRETER`  | `python3` (empty runs directly)  |
    /// | `TRANSCRIBER_SCRIPT`       | `transcribe.py`                  |
    /// | `TRANSCRIBER_OUTPUT_FILE`  | `output.srt`                     |
    /// | `TRANSCRIBE_TIMEOUT_SECS`  | unset (no limit)                 |
    /// | `TRANSCRIBER_ISOLATE_RUNS` | `false`                          |
    /// | `WORKER_POOL_SIZE`         | available parallelism, 4..=8     |
    /// | `JOB_RETENTION_SECS`       | `86400` (`0` disables eviction)  |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = parse_var("REQUEST_TIMEOUT_SECS", 300);
        let shutdown_timeout_secs: u64 = parse_var("SHUTDOWN_TIMEOUT_SECS", 30);
        let max_upload_bytes: usize = parse_var("MAX_UPLOAD_BYTES", 2 * 1024 * 1024 * 1024);

        let scratch_root = std::env::temp_dir().join("scribe");
        let upload_dir = std::env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| scratch_root.join("uploads"));
        let results_dir = std::env::var("RESULTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| scratch_root.join("results"));

        let worker_pool_size: usize = match std::env::var("WORKER_POOL_SIZE") {
            Ok(v) => v.parse().expect("WORKER_POOL_SIZE must be a valid usize"),
            Err(_) => default_pool_size(),
        };

        let job_retention = match parse_var::<u64>("JOB_RETENTION_SECS", 86_400) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let worker_dir = std::env::var("WORKER_DIR").unwrap_or_else(|_| "whisper_worker".into());
        let mut transcriber = TranscriberConfig::new(worker_dir, results_dir);
        if let Ok(interpreter) = std::env::var("TRANSCRIBER_INTERPRETER") {
            let interpreter = interpreter.trim().to_string();
            transcriber.interpreter = (!interpreter.is_empty()).then_some(interpreter);
        }
        if let Ok(script) = std::env::var("TRANSCRIBER_SCRIPT") {
            transcriber.script = script;
        }
        if let Ok(output_file) = std::env::var("TRANSCRIBER_OUTPUT_FILE") {
            transcriber.output_file = output_file;
        }
        transcriber.timeout = std::env::var("TRANSCRIBE_TIMEOUT_SECS").ok().map(|v| {
            Duration::from_secs(v.parse().expect("TRANSCRIBE_TIMEOUT_SECS must be a valid u64"))
        });
        transcriber.isolate_runs = parse_var("TRANSCRIBER_ISOLATE_RUNS", false);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            max_upload_bytes,
            upload_dir,
            worker_pool_size,
            job_retention,
            transcriber,
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset.
///
/// Panics on an unparsable value: misconfiguration should fail at startup.
fn parse_var<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} has an invalid value '{raw}': {e}")),
        Err(_) => default,
    }
}
