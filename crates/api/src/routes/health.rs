use axum::extract::State;
use axum::{routing::get, Json, Router};
use scribe_core::executor::ExecutorStats;
use scribe_core::registry::JobCounts;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Tracked jobs per state.
    pub jobs: JobCounts,
    /// Worker pool occupancy.
    pub workers: ExecutorStats,
}

/// GET /health
///
/// Liveness plus a snapshot of the job registry and worker pool. The
/// service has no external dependencies to probe, so `status` is always
/// `"ok"` once it answers.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let jobs = state.registry.counts().await;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        jobs,
        workers: state.executor.stats(),
    })
}

/// Root-level routes, mounted outside `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
