use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use docflow_core::Error;
use docflow_engine::run_builder;
use docflow_storage::models::{BatchRow, RunGroupRow, RunStepRow};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateBatchRequest {
    pub source: String,
    pub name: String,
}

/// POST /batch/ — registers a new ingest batch, returning its id.
#[utoipa::path(
    post,
    path = "/api/v1/batch/",
    request_body = CreateBatchRequest,
    responses((status = 201, description = "Batch id")),
    tag = "batch"
)]
pub async fn create_batch(
    State(state): State<AppState>,
    Json(req): Json<CreateBatchRequest>,
) -> Result<Json<Value>, ApiError> {
    let id = state.engine.db().new_batch(&req.source, &req.name).await?;
    Ok(Json(serde_json::json!({ "id": id })))
}

/// GET /batch/
#[utoipa::path(get, path = "/api/v1/batch/", responses((status = 200, body = Vec<BatchRow>)), tag = "batch")]
pub async fn list_batches(State(state): State<AppState>) -> Result<Json<Vec<BatchRow>>, ApiError> {
    Ok(Json(state.engine.db().list_batches().await?))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct StartWorkflowsRequest {
    pub batch_id: i64,
    pub workflow_definition_id: String,
    pub param_definition_id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

/// POST /batch/start-workflows — creates a run group and fans it out across
/// every document already attached to the batch.
#[utoipa::path(
    post,
    path = "/api/v1/batch/start-workflows",
    request_body = StartWorkflowsRequest,
    responses((status = 201, body = RunGroupRow), (status = 409, description = "Batch already completed")),
    tag = "batch"
)]
pub async fn start_workflows(
    State(state): State<AppState>,
    Json(req): Json<StartWorkflowsRequest>,
) -> Result<Json<RunGroupRow>, ApiError> {
    let run_group = run_builder::create_run_group(
        &state.engine,
        &req.workflow_definition_id,
        &req.param_definition_id,
        req.batch_id,
        req.name.as_deref(),
    )
    .await?;
    run_builder::create_workflow_runs_for_batch(&state.engine, &run_group, req.priority).await?;
    Ok(Json(run_group))
}

#[derive(Debug, Deserialize)]
pub struct BatchIdQuery {
    pub batch_id: i64,
}

/// GET /batch/status?batch_id=…
#[utoipa::path(
    get,
    path = "/api/v1/batch/status",
    params(("batch_id" = i64, Query)),
    responses((status = 200, body = BatchRow), (status = 404, description = "Batch not found")),
    tag = "batch"
)]
pub async fn batch_status(
    State(state): State<AppState>,
    Query(q): Query<BatchIdQuery>,
) -> Result<Json<BatchRow>, ApiError> {
    let batch = state
        .engine
        .db()
        .get_batch(q.batch_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("batch {}", q.batch_id)))?;
    Ok(Json(batch))
}

/// GET /batch/{id}/steps
#[utoipa::path(
    get,
    path = "/api/v1/batch/{id}/steps",
    params(("id" = i64, Path)),
    responses((status = 200, body = Vec<RunStepRow>)),
    tag = "batch"
)]
pub async fn batch_steps(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Vec<RunStepRow>>, ApiError> {
    Ok(Json(state.engine.db().list_run_steps_for_batch(id).await?))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/batch/", get(list_batches).post(create_batch))
        .route("/batch/start-workflows", post(start_workflows))
        .route("/batch/status", get(batch_status))
        .route("/batch/:id/steps", get(batch_steps))
        .with_state(state)
}
