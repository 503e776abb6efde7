//! Storage status handler

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::models::StorageSnapshot;
use crate::AppState;

/// GET /storage/status response
#[derive(Debug, Serialize)]
pub struct StorageStatusResponse {
    pub used_bytes: u64,
    pub budget_bytes: u64,
    pub free_bytes: u64,
    pub cleanup_candidates: usize,
    pub reclaimable_bytes: u64,
    pub taken_at: chrono::DateTime<chrono::Utc>,
    pub intake_paused: bool,
}

impl StorageStatusResponse {
    fn from_snapshot(snapshot: &StorageSnapshot, intake_paused: bool) -> Self {
        Self {
            used_bytes: snapshot.used_bytes,
            budget_bytes: snapshot.budget_bytes,
            free_bytes: snapshot.free_bytes(),
            cleanup_candidates: snapshot.cleanup_candidates.len(),
            reclaimable_bytes: snapshot.reclaimable_bytes(),
            taken_at: snapshot.taken_at,
            intake_paused,
        }
    }
}

/// GET /storage/status
///
/// Latest snapshot from the storage governor; 404 until the first scan
/// completes.
pub async fn storage_status(
    State(state): State<AppState>,
) -> ApiResult<Json<StorageStatusResponse>> {
    let snapshot = state.storage_snapshot.read().await.clone().ok_or_else(|| {
        ApiError::NotFound("no storage snapshot taken yet".to_string())
    })?;
    let intake_paused = *state.storage_pause.borrow();
    Ok(Json(StorageStatusResponse::from_snapshot(
        &snapshot,
        intake_paused,
    )))
}

/// Build storage routes
pub fn storage_routes() -> Router<AppState> {
    Router::new().route("/storage/status", get(storage_status))
}
