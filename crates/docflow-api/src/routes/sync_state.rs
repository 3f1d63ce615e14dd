use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use docflow_core::Error;
use docflow_storage::models::SyncStateRow;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct PutSyncStateRequest {
    pub state: Value,
}

/// GET /sync-state/{source_id} — the opaque cursor a source connector
/// persists between polls (SPEC_FULL.md §4.8).
#[utoipa::path(
    get,
    path = "/api/v1/sync-state/{source_id}",
    params(("source_id" = String, Path)),
    responses((status = 200, body = SyncStateRow), (status = 404, description = "No sync state recorded for this source")),
    tag = "sync-state"
)]
pub async fn get_sync_state(State(state): State<AppState>, Path(source_id): Path<String>) -> Result<Json<SyncStateRow>, ApiError> {
    let row = state
        .engine
        .db()
        .get_sync_state(&source_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("sync state for {source_id}")))?;
    Ok(Json(row))
}

/// PUT /sync-state/{source_id} — upserts the cursor, replacing any prior
/// value wholesale.
#[utoipa::path(
    put,
    path = "/api/v1/sync-state/{source_id}",
    params(("source_id" = String, Path)),
    request_body = PutSyncStateRequest,
    responses((status = 200, body = SyncStateRow)),
    tag = "sync-state"
)]
pub async fn put_sync_state(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
    Json(req): Json<PutSyncStateRequest>,
) -> Result<Json<SyncStateRow>, ApiError> {
    let row = state.engine.db().put_sync_state(&source_id, &req.state).await?;
    Ok(Json(row))
}

/// DELETE /sync-state/{source_id}
#[utoipa::path(
    delete,
    path = "/api/v1/sync-state/{source_id}",
    params(("source_id" = String, Path)),
    responses((status = 200, description = "Number of rows deleted (0 or 1)")),
    tag = "sync-state"
)]
pub async fn delete_sync_state(State(state): State<AppState>, Path(source_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let deleted = state.engine.db().delete_sync_state(&source_id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/sync-state/:source_id", get(get_sync_state).put(put_sync_state).delete(delete_sync_state))
        .with_state(state)
}
