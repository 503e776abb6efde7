//! Source job control handlers
//!
//! POST /sources/:id/start|pause|resume|cancel, GET /sources/:id/status,
//! GET /sources

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::ApiResult;
use crate::services::orchestrator::JobStatus;
use crate::AppState;

/// POST /sources/:id/start response
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub source_id: String,
    pub job: JobStatus,
}

/// Acknowledgement for pause/resume/cancel
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub source_id: String,
    pub accepted: bool,
}

/// GET /sources response entry
#[derive(Debug, Serialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobStatus>,
}

/// POST /sources/:id/start
///
/// Spawns the sync job and returns 200 with its initial status; 409 when a
/// job for this source is already running.
pub async fn start_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Json<StartResponse>> {
    let job = state.orchestrator.start(&source_id).await?;

    tracing::info!(source_id = %source_id, job_id = %job.job_id, "Sync start requested");

    Ok(Json(StartResponse { source_id, job }))
}

/// POST /sources/:id/pause
pub async fn pause_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Json<ControlResponse>> {
    state.orchestrator.pause(&source_id).await?;
    Ok(Json(ControlResponse {
        source_id,
        accepted: true,
    }))
}

/// POST /sources/:id/resume
pub async fn resume_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Json<ControlResponse>> {
    state.orchestrator.resume(&source_id).await?;
    Ok(Json(ControlResponse {
        source_id,
        accepted: true,
    }))
}

/// POST /sources/:id/cancel
pub async fn cancel_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Json<ControlResponse>> {
    state.orchestrator.cancel(&source_id).await?;
    Ok(Json(ControlResponse {
        source_id,
        accepted: true,
    }))
}

/// GET /sources/:id/status
pub async fn source_status(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    let status = state.orchestrator.status(&source_id).await?;
    Ok(Json(status))
}

/// GET /sources
pub async fn list_sources(State(state): State<AppState>) -> ApiResult<Json<Vec<SourceSummary>>> {
    let statuses = state.orchestrator.list_statuses().await;
    let summaries = state
        .config
        .sources
        .iter()
        .map(|descriptor| {
            let job = statuses
                .iter()
                .find(|(id, _)| id == &descriptor.id)
                .and_then(|(_, status)| status.clone());
            SourceSummary {
                source_id: descriptor.id.clone(),
                kind: descriptor.kind.to_string(),
                job,
            }
        })
        .collect();
    Ok(Json(summaries))
}

/// Build source control routes
pub fn source_routes() -> Router<AppState> {
    Router::new()
        .route("/sources", get(list_sources))
        .route("/sources/:id/start", post(start_source))
        .route("/sources/:id/pause", post(pause_source))
        .route("/sources/:id/resume", post(resume_source))
        .route("/sources/:id/cancel", post(cancel_source))
        .route("/sources/:id/status", get(source_status))
}
