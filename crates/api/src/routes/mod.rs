pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the job protocol route tree, mounted under both `/api/v1` and
/// `/v1/api`.
///
/// Route hierarchy:
///
/// ```text
/// /submit                                  submit media (multipart)
/// /upload                                  alias of /submit
/// /status/{transaction_id}                 poll job state
/// /result/{transaction_id}                 download subtitles
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(jobs::router())
}
