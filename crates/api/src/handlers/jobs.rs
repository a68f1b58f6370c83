//! Handlers for the transcription job protocol.
//!
//! Clients submit media, poll the job state, and download the subtitle file
//! once the job is `COMPLETED`:
//!
//! ```text
//! POST /api/v1/submit                      submit
//! GET  /api/v1/status/{transaction_id}     get_status
//! GET  /api/v1/result/{transaction_id}     get_result
//! ```

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use scribe_core::error::CoreError;
use scribe_core::job::{JobState, JobStatus};
use scribe_core::registry::JOB_ENTITY;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::uploads::{self, StagedUpload};

/// Content type of the downloadable subtitle file.
pub const SUBRIP_CONTENT_TYPE: &str = "application/x-subrip";

/// Response body for a successful submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub transaction_id: String,
}

/// Response body for a status poll.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/submit
///
/// Multipart form with a `file` field (the media) and a `language` field
/// (opaque language code). Returns `202 Accepted` with the transaction id
/// as soon as the media is on disk; transcription runs in the background.
pub async fn submit(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let mut media: Option<StagedUpload> = None;
    let mut language: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                media = Some(uploads::stage_field(field, &state.config.upload_dir).await?);
            }
            "language" => {
                language = Some(field.text().await?);
            }
            _ => {} // ignore unknown fields
        }
    }

    let media =
        media.ok_or_else(|| AppError::BadRequest("Missing required 'file' field".into()))?;
    let language = language
        .ok_or_else(|| AppError::BadRequest("Missing required 'language' field".into()))?;

    let job_id = state.registry.create(&language).await;
    tracing::info!(
        job_id = %job_id,
        language = %language,
        size_bytes = media.size_bytes(),
        "Job submitted",
    );
    state
        .executor
        .submit(job_id.clone(), media.into_path(), language);

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            transaction_id: job_id,
        }),
    ))
}

// ---------------------------------------------------------------------------
// Poll
// ---------------------------------------------------------------------------

/// GET /api/v1/status/{transaction_id}
pub async fn get_status(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    let job = state.registry.get(&transaction_id).await?;
    Ok(Json(StatusResponse {
        state: job.state(),
        error: job.error_message().map(str::to_string),
    }))
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

/// GET /api/v1/result/{transaction_id}
///
/// Returns the subtitle file as an attachment named `{transaction_id}.srt`.
/// Responds `404` unless the job is `COMPLETED`; the file is left in place
/// so the download can be repeated.
pub async fn get_result(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> AppResult<Response> {
    let job = state.registry.get(&transaction_id).await?;
    let JobStatus::Completed { result_path } = &job.status else {
        return Err(not_found(&transaction_id));
    };

    let data = match tokio::fs::read(result_path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(job_id = %transaction_id, "Result file missing on disk");
            return Err(not_found(&transaction_id));
        }
        Err(e) => return Err(AppError::InternalError(e.to_string())),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, SUBRIP_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, data.len().to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{transaction_id}.srt\""),
        )
        .body(Body::from(data))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

fn not_found(transaction_id: &str) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: JOB_ENTITY,
        id: transaction_id.to_string(),
    })
}
