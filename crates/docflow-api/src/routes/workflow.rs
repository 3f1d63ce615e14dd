use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use docflow_core::{Error, ParamSetSource, RunStatus};
use docflow_engine::config::model::{ParamSet, WorkflowDefinition};
use docflow_engine::{document_ops, run_builder};
use docflow_storage::models::{DocumentRow, RunGroupRow, RunStepRow, WorkflowRunRow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::pagination::{paginate, ListOrPage, PageParams};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub batch_id: Option<i64>,
    #[serde(default)]
    pub include_steps: bool,
    #[serde(default)]
    pub include_doc_info: bool,
    pub page: Option<i64>,
    pub rows_per_page: Option<i64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct WorkflowRunExpanded {
    pub run: WorkflowRunRow,
    pub steps: Option<Vec<RunStepRow>>,
    pub document: Option<DocumentRow>,
}

/// GET /workflow/?batch_id=&include_steps=&include_doc_info=&page=&rows_per_page= —
/// every `WorkflowRun`, optionally scoped to a batch, optionally expanded
/// with its steps and/or document metadata, with the shared pagination
/// contract.
#[utoipa::path(
    get,
    path = "/api/v1/workflow/",
    params(
        ("batch_id" = Option<i64>, Query),
        ("include_steps" = Option<bool>, Query),
        ("include_doc_info" = Option<bool>, Query),
        ("page" = Option<i64>, Query),
        ("rows_per_page" = Option<i64>, Query),
    ),
    responses((status = 200, description = "Workflow runs, paginated or raw"), (status = 400, description = "page/rows_per_page mismatch")),
    tag = "workflow"
)]
pub async fn list_runs(
    State(state): State<AppState>,
    Query(q): Query<ListRunsQuery>,
) -> Result<ListOrPage<WorkflowRunExpanded>, ApiError> {
    let runs = state.engine.db().list_workflow_runs(q.batch_id).await?;
    let mut expanded = Vec::with_capacity(runs.len());
    for run in runs {
        let steps = if q.include_steps {
            Some(state.engine.db().list_run_steps_for_run(run.id).await?)
        } else {
            None
        };
        let document = if q.include_doc_info {
            state.engine.db().get_document(&run.doc_id).await?
        } else {
            None
        };
        expanded.push(WorkflowRunExpanded { run, steps, document });
    }
    let page = PageParams { page: q.page, rows_per_page: q.rows_per_page };
    Ok(paginate(expanded, page)?)
}

#[derive(Debug, Deserialize)]
pub struct RunsByBatchQuery {
    pub batch_id: Option<i64>,
}

/// GET /workflow/runs?batch_id=… — the unexpanded, unpaginated run list.
#[utoipa::path(
    get,
    path = "/api/v1/workflow/runs",
    params(("batch_id" = Option<i64>, Query)),
    responses((status = 200, body = Vec<WorkflowRunRow>)),
    tag = "workflow"
)]
pub async fn list_runs_by_batch(
    State(state): State<AppState>,
    Query(q): Query<RunsByBatchQuery>,
) -> Result<Json<Vec<WorkflowRunRow>>, ApiError> {
    Ok(Json(state.engine.db().list_workflow_runs(q.batch_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ByStatusQuery {
    pub status: RunStatus,
}

/// GET /workflow/by-status?status=…
#[utoipa::path(
    get,
    path = "/api/v1/workflow/by-status",
    params(("status" = RunStatus, Query)),
    responses((status = 200, body = Vec<WorkflowRunRow>)),
    tag = "workflow"
)]
pub async fn runs_by_status(
    State(state): State<AppState>,
    Query(q): Query<ByStatusQuery>,
) -> Result<Json<Vec<WorkflowRunRow>>, ApiError> {
    Ok(Json(state.engine.db().list_workflow_runs_by_status(q.status).await?))
}

/// GET /workflow/runs/{id}
#[utoipa::path(
    get,
    path = "/api/v1/workflow/runs/{id}",
    params(("id" = Uuid, Path)),
    responses((status = 200, body = WorkflowRunRow), (status = 404, description = "Run not found")),
    tag = "workflow"
)]
pub async fn get_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<WorkflowRunRow>, ApiError> {
    Ok(Json(state.engine.db().get_workflow_run(id).await?))
}

/// GET /workflow/runs/{id}/lifecycle
#[utoipa::path(
    get,
    path = "/api/v1/workflow/runs/{id}/lifecycle",
    params(("id" = Uuid, Path)),
    responses((status = 200, description = "Lifecycle history entries for this run")),
    tag = "workflow"
)]
pub async fn run_lifecycle(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    let history = state.engine.db().get_lifecycle_history_for_run(id).await?;
    Ok(Json(serde_json::to_value(history).map_err(|e| Error::Internal(e.into()))?))
}

/// GET /workflow/definitions
#[utoipa::path(get, path = "/api/v1/workflow/definitions", responses((status = 200, description = "All loaded workflow definitions")), tag = "workflow")]
pub async fn list_definitions(State(state): State<AppState>) -> Json<Vec<WorkflowDefinition>> {
    Json(state.engine.config().list_workflows().await)
}

/// GET /workflow/definitions/{id}
#[utoipa::path(
    get,
    path = "/api/v1/workflow/definitions/{id}",
    params(("id" = String, Path)),
    responses((status = 200, description = "The workflow definition"), (status = 404, description = "No such definition")),
    tag = "workflow"
)]
pub async fn get_definition(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<WorkflowDefinition>, ApiError> {
    Ok(Json(state.engine.config().get_workflow(&id).await?))
}

/// GET /workflow/param-sets
#[utoipa::path(get, path = "/api/v1/workflow/param-sets", responses((status = 200, description = "All loaded parameter sets")), tag = "workflow")]
pub async fn list_param_sets(State(state): State<AppState>) -> Json<Vec<ParamSet>> {
    Json(state.engine.config().list_param_sets().await)
}

/// GET /workflow/param-sets/{id}
#[utoipa::path(
    get,
    path = "/api/v1/workflow/param-sets/{id}",
    params(("id" = String, Path)),
    responses((status = 200, description = "The parameter set"), (status = 404, description = "No such parameter set")),
    tag = "workflow"
)]
pub async fn get_param_set(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<ParamSet>, ApiError> {
    Ok(Json(state.engine.config().get_param_set(&id).await?))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SaveParamSetRequest {
    /// Raw YAML text for a `ParamSet`; `source` is forced to `user`
    /// regardless of what the uploaded document says.
    pub yaml_content: String,
}

/// POST /workflow/param-sets (form: `yaml_content`) — persists a
/// user-authored parameter set, forcing `source: user` so it can later be
/// deleted through this same API.
#[utoipa::path(
    post,
    path = "/api/v1/workflow/param-sets",
    request_body(content = SaveParamSetRequest, content_type = "application/x-www-form-urlencoded"),
    responses((status = 201, description = "Parameter set saved"), (status = 409, description = "A parameter set with this id already exists")),
    tag = "workflow"
)]
pub async fn save_param_set(
    State(state): State<AppState>,
    Form(req): Form<SaveParamSetRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut param_set: ParamSet =
        serde_yaml::from_str(&req.yaml_content).map_err(|e| Error::invalid_input(format!("yaml_content: {e}")))?;
    param_set.source = ParamSetSource::User;
    state.engine.config().save_param_set(&param_set).await?;
    Ok(Json(serde_json::json!({ "id": param_set.id })))
}

/// DELETE /workflow/param-sets/{id} — rejects deleting a built-in set with
/// `403 Forbidden`.
#[utoipa::path(
    delete,
    path = "/api/v1/workflow/param-sets/{id}",
    params(("id" = String, Path)),
    responses((status = 200, description = "Parameter set deleted"), (status = 403, description = "Built-in parameter sets cannot be deleted"), (status = 404, description = "No such parameter set")),
    tag = "workflow"
)]
pub async fn delete_param_set(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    state.engine.config().delete_param_set(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// GET /workflow/run-groups
#[utoipa::path(get, path = "/api/v1/workflow/run-groups", responses((status = 200, body = Vec<RunGroupRow>)), tag = "workflow")]
pub async fn list_run_groups(State(state): State<AppState>) -> Result<Json<Vec<RunGroupRow>>, ApiError> {
    Ok(Json(state.engine.db().list_run_groups().await?))
}

/// GET /workflow/run_groups/{id}
#[utoipa::path(
    get,
    path = "/api/v1/workflow/run_groups/{id}",
    params(("id" = Uuid, Path)),
    responses((status = 200, body = RunGroupRow), (status = 404, description = "Run group not found")),
    tag = "workflow"
)]
pub async fn get_run_group(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<RunGroupRow>, ApiError> {
    Ok(Json(state.engine.db().get_run_group(id).await?))
}

/// GET /workflow/run_groups/{id}/stats — per-run and per-step status
/// counters for a run group.
#[utoipa::path(
    get,
    path = "/api/v1/workflow/run_groups/{id}/stats",
    params(("id" = Uuid, Path)),
    responses((status = 200, description = "Run and step status counters")),
    tag = "workflow"
)]
pub async fn run_group_stats(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    let run_counts = state.engine.db().get_run_group_counts(id).await?;
    let step_counts = state.engine.db().get_run_group_step_counts(id).await?;
    Ok(Json(serde_json::json!({ "runs": run_counts, "steps": step_counts })))
}

/// DELETE /workflow/run_groups/{id} — cascading delete of the run group and
/// everything under it.
#[utoipa::path(
    delete,
    path = "/api/v1/workflow/run_groups/{id}",
    params(("id" = Uuid, Path)),
    responses((status = 200, body = document_ops::DeleteCounts)),
    tag = "workflow"
)]
pub async fn delete_run_group(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<document_ops::DeleteCounts>, ApiError> {
    Ok(Json(document_ops::delete_run_group(&state.engine, id).await?))
}

/// GET /workflow/{id}/steps
#[utoipa::path(
    get,
    path = "/api/v1/workflow/{id}/steps",
    params(("id" = Uuid, Path)),
    responses((status = 200, body = Vec<RunStepRow>)),
    tag = "workflow"
)]
pub async fn run_steps(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Vec<RunStepRow>>, ApiError> {
    Ok(Json(state.engine.db().list_run_steps_for_run(id).await?))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateRunRequest {
    pub run_group_id: Uuid,
    pub doc_hash: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub run_params: Value,
}

/// POST /workflow/ — adds one more `WorkflowRun` to an existing run group,
/// for a caller attaching documents incrementally rather than fanning out
/// the whole batch via `/batch/start-workflows`.
#[utoipa::path(
    post,
    path = "/api/v1/workflow/",
    request_body = CreateRunRequest,
    responses((status = 201, body = WorkflowRunRow), (status = 404, description = "Run group not found")),
    tag = "workflow"
)]
pub async fn create_run(
    State(state): State<AppState>,
    Json(req): Json<CreateRunRequest>,
) -> Result<Json<WorkflowRunRow>, ApiError> {
    let run_group = state.engine.db().get_run_group(req.run_group_id).await?;
    let run = run_builder::create_workflow_run(&state.engine, &run_group, &req.doc_hash, req.priority, &req.run_params).await?;
    Ok(Json(run))
}

#[derive(Debug, Deserialize)]
pub struct RetryQuery {
    pub run_group_id: Uuid,
}

/// POST /workflow/retry?run_group_id=… — resets every FAILED step in the
/// group back to PENDING so the scheduler picks it up again.
#[utoipa::path(
    post,
    path = "/api/v1/workflow/retry",
    params(("run_group_id" = Uuid, Query)),
    responses((status = 200, description = "Number of steps reset")),
    tag = "workflow"
)]
pub async fn retry(State(state): State<AppState>, Query(q): Query<RetryQuery>) -> Result<Json<Value>, ApiError> {
    let reset = document_ops::reset_failed_steps(&state.engine, q.run_group_id).await?;
    Ok(Json(serde_json::json!({ "reset": reset })))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/workflow/", get(list_runs).post(create_run))
        .route("/workflow/by-status", get(runs_by_status))
        .route("/workflow/retry", post(retry))
        .route("/workflow/definitions", get(list_definitions))
        .route("/workflow/definitions/:id", get(get_definition))
        .route("/workflow/param-sets", get(list_param_sets).post(save_param_set))
        .route("/workflow/param-sets/:id", get(get_param_set).delete(delete_param_set))
        .route("/workflow/run-groups", get(list_run_groups))
        .route("/workflow/run_groups/:id", get(get_run_group).delete(delete_run_group))
        .route("/workflow/run_groups/:id/stats", get(run_group_stats))
        .route("/workflow/runs", get(list_runs_by_batch))
        .route("/workflow/runs/:id", get(get_run))
        .route("/workflow/runs/:id/lifecycle", get(run_lifecycle))
        .route("/workflow/:id/steps", get(run_steps))
        .with_state(state)
}
