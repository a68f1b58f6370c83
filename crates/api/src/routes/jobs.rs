//! Route definitions for the transcription job protocol.
//!
//! Mounted at `/api/v1`.
//!
//! ```text
//! POST /submit                      submit
//! POST /upload                      submit
//! GET  /status/{transaction_id}     get_status
//! GET  /result/{transaction_id}     get_result
//! ```

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/submit", post(jobs::submit))
        .route("/upload", post(jobs::submit))
        .route("/status/{transaction_id}", get(jobs::get_status))
        .route("/result/{transaction_id}", get(jobs::get_result))
}
