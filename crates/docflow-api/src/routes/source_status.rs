use std::collections::HashMap;

use axum::extract::State;
use axum::routing::post;
use axum::{Form, Json, Router};
use docflow_core::Error;
use docflow_engine::document_ops;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SourceStatusRequest {
    pub source: String,
    /// JSON-encoded `{uri: hash}` map, carried as a form field rather than a
    /// JSON body so this endpoint matches the crawler-side form post it was
    /// designed against.
    pub hashes: String,
}

/// POST /source-status
#[utoipa::path(
    post,
    path = "/api/v1/source-status",
    request_body(content = SourceStatusRequest, content_type = "application/x-www-form-urlencoded"),
    responses((status = 200, description = "Per-URI status classification"), (status = 400, description = "Malformed hashes map")),
    tag = "source-status"
)]
pub async fn source_status(
    State(state): State<AppState>,
    Form(req): Form<SourceStatusRequest>,
) -> Result<Json<document_ops::DocStatusReport>, ApiError> {
    let hashes: HashMap<String, String> =
        serde_json::from_str(&req.hashes).map_err(|e| Error::invalid_input(format!("hashes: {e}")))?;
    let report = document_ops::get_doc_status(&state.engine, &req.source, &hashes).await?;
    Ok(Json(report))
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/source-status", post(source_status)).with_state(state)
}
