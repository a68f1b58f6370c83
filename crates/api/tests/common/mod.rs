#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use scribe_api::config::ServerConfig;
use scribe_api::router::build_app_router;
use scribe_api::state::AppState;
use scribe_core::transcriber::TranscriberConfig;

/// Multipart boundary used by [`multipart_body`].
pub const BOUNDARY: &str = "scribe-test-boundary";

/// Stand-in for the external transcriber.
///
/// Behaviour is selected by the language argument:
///
/// - `fail`   -- prints a diagnostic to stderr and exits 1
/// - `silent` -- exits 0 without writing a result
/// - `slow`   -- sleeps for a second, then succeeds
/// - anything else succeeds immediately
///
/// On success `output.srt` contains one cue echoing the language and the
/// size of the media file.
const FAKE_TRANSCRIBER: &str = r#"#!/bin/bash
media="$1"
lang="$2"
echo "transcribing $media ($lang)"
case "$lang" in
  fail)
    echo "unsupported language: $lang" >&2
    exit 1
    ;;
  silent)
    exit 0
    ;;
  slow)
    sleep 1
    ;;
esac
size=$(wc -c < "$media" | tr -d ' ')
printf '1\n00:00:00,000 --> 00:00:01,000\n[%s] %s bytes\n\n' "$lang" "$size" > output.srt
"#;

/// A fully wired application backed by temporary directories.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub upload_dir: PathBuf,
    pub results_dir: PathBuf,
    _dirs: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Build an app after letting `customize` adjust the test configuration.
    pub fn with_config(customize: impl FnOnce(&mut ServerConfig)) -> Self {
        let dirs = tempfile::tempdir().expect("create temp dir");
        let worker_dir = dirs.path().join("worker");
        let upload_dir = dirs.path().join("uploads");
        let results_dir = dirs.path().join("results");
        std::fs::create_dir_all(&worker_dir).expect("create worker dir");
        std::fs::write(worker_dir.join("transcribe.sh"), FAKE_TRANSCRIBER).expect("write script");

        let mut config = test_config(&worker_dir, &upload_dir, &results_dir);
        customize(&mut config);
        let state = AppState::build(config.clone()).expect("build state");
        let router = build_app_router(state.clone(), &config);

        Self {
            router,
            state,
            upload_dir,
            results_dir,
            _dirs: dirs,
        }
    }

    /// Files currently staged in the upload directory.
    pub fn staged_uploads(&self) -> Vec<PathBuf> {
        list_dir(&self.upload_dir)
    }

    /// Submit `media` with `language` and return the transaction id.
    pub async fn submit(&self, media: &[u8], language: &str) -> String {
        let response = post_multipart(
            self.router.clone(),
            "/api/v1/submit",
            multipart_body(Some(("clip.mp4", media)), Some(language)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        json["transactionId"]
            .as_str()
            .expect("transactionId is a string")
            .to_string()
    }

    /// Poll the status endpoint until the job leaves `PROCESSING`.
    pub async fn wait_terminal(&self, id: &str) -> serde_json::Value {
        for _ in 0..500 {
            let response = get(self.router.clone(), &format!("/api/v1/status/{id}")).await;
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            if json["state"] != "PROCESSING" {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {id} never left PROCESSING");
    }
}

/// Build a test `ServerConfig` pointing at the given directories.
///
/// Runs the fake transcriber through `bash`; everything else keeps the
/// production defaults, including the shared worker directory.
pub fn test_config(worker_dir: &Path, upload_dir: &Path, results_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        max_upload_bytes: 16 * 1024 * 1024,
        upload_dir: upload_dir.to_path_buf(),
        worker_pool_size: 2,
        job_retention: None,
        transcriber: TranscriberConfig {
            interpreter: Some("bash".to_string()),
            script: "transcribe.sh".to_string(),
            ..TranscriberConfig::new(worker_dir, results_dir)
        },
    }
}

/// Build a `multipart/form-data` body with optional `file` and `language` parts.
pub fn multipart_body(file: Option<(&str, &[u8])>, language: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some((filename, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    if let Some(language) = language {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"language\"\r\n\r\n{language}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_multipart(app: Router, uri: &str, body: Vec<u8>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}
