use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scribe_core::error::CoreError;
use serde::Serialize;

/// Message returned for every 5xx response in place of the real cause.
const INTERNAL_MESSAGE: &str = "An internal error occurred";

/// Errors surfaced by the HTTP handlers.
///
/// Every variant renders as `{ "error": <message>, "code": <CODE> }`.
/// Server-side failures are logged and replaced by a generic message.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `scribe_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request body exceeded the configured upload limit.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// The uploaded media could not be persisted.
    #[error("Upload failed: {0}")]
    Upload(#[source] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(err.body_text())
        } else {
            AppError::BadRequest(err.body_text())
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Core(CoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Core(CoreError::Validation(_)) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Core(CoreError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Core(CoreError::Internal(_))
            | AppError::Upload(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Core(CoreError::NotFound { .. }) => "NOT_FOUND",
            AppError::Core(CoreError::Validation(_)) => "VALIDATION_ERROR",
            AppError::Core(CoreError::Conflict(_)) => "CONFLICT",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            AppError::Upload(_) => "UPLOAD_FAILED",
            AppError::Core(CoreError::Internal(_)) | AppError::InternalError(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Core(CoreError::NotFound { entity, id }) => {
                format!("{entity} with id {id} not found")
            }
            AppError::Core(CoreError::Validation(msg) | CoreError::Conflict(msg))
            | AppError::BadRequest(msg)
            | AppError::PayloadTooLarge(msg) => msg.clone(),
            AppError::Upload(_) => "The uploaded file could not be stored".to_string(),
            AppError::Core(CoreError::Internal(_)) | AppError::InternalError(_) => {
                INTERNAL_MESSAGE.to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }

        let body = ErrorBody {
            error: self.public_message(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}
