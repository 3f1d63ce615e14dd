use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunGroupIdQuery {
    pub run_group_id: Uuid,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunDuration {
    pub run_id: Uuid,
    pub duration_secs: Option<i64>,
}

/// GET /stats/durations?run_group_id=… — per-run wall-clock duration,
/// `None` while a run hasn't completed yet.
#[utoipa::path(
    get,
    path = "/api/v1/stats/durations",
    params(("run_group_id" = Uuid, Query)),
    responses((status = 200, body = Vec<RunDuration>)),
    tag = "stats"
)]
pub async fn durations(
    State(state): State<AppState>,
    Query(q): Query<RunGroupIdQuery>,
) -> Result<Json<Vec<RunDuration>>, ApiError> {
    let rows = state.engine.db().get_run_group_durations(q.run_group_id).await?;
    let durations = rows
        .into_iter()
        .map(|(run_id, duration_secs)| RunDuration { run_id, duration_secs })
        .collect();
    Ok(Json(durations))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StepStat {
    pub step_type: String,
    pub completed: i64,
    pub failed: i64,
}

/// GET /stats/step-stats?run_group_id=… — completed/failed counts per step
/// type across a run group.
#[utoipa::path(
    get,
    path = "/api/v1/stats/step-stats",
    params(("run_group_id" = Uuid, Query)),
    responses((status = 200, body = Vec<StepStat>)),
    tag = "stats"
)]
pub async fn step_stats(
    State(state): State<AppState>,
    Query(q): Query<RunGroupIdQuery>,
) -> Result<Json<Vec<StepStat>>, ApiError> {
    let rows = state.engine.db().get_step_stats(q.run_group_id).await?;
    let stats = rows
        .into_iter()
        .map(|(step_type, completed, failed)| StepStat { step_type: step_type.to_string(), completed, failed })
        .collect();
    Ok(Json(stats))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/stats/durations", get(durations))
        .route("/stats/step-stats", get(step_stats))
        .with_state(state)
}
