use axum::extract::{Multipart, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use docflow_core::Error;
use docflow_engine::document_ops;
use docflow_storage::models::DocumentUriRow;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    pub source: Option<String>,
    pub batch_id: Option<i64>,
}

/// GET /document/?source=…|batch_id=…
#[utoipa::path(
    get,
    path = "/api/v1/document/",
    params(("source" = Option<String>, Query), ("batch_id" = Option<i64>, Query)),
    responses((status = 200, body = Vec<DocumentUriRow>), (status = 400, description = "Neither source nor batch_id given")),
    tag = "document"
)]
pub async fn list_documents(
    State(state): State<AppState>,
    Query(q): Query<ListDocumentsQuery>,
) -> Result<Json<Vec<DocumentUriRow>>, ApiError> {
    let uris = match (q.source, q.batch_id) {
        (Some(source), _) => state.engine.db().get_uris_for_source(&source).await?,
        (None, Some(batch_id)) => state.engine.db().get_documents_in_batch(batch_id).await?,
        (None, None) => return Err(Error::invalid_input("one of source or batch_id is required").into()),
    };
    Ok(Json(uris))
}

/// One fully-buffered `multipart/form-data` ingest request: either a `file`
/// part or an `input_uri` field resolves the bytes (SPEC_FULL.md §4.9).
#[derive(Debug, Default)]
struct IngestFields {
    file_bytes: Option<Vec<u8>>,
    file_name: Option<String>,
    input_uri: Option<String>,
    source_uri: Option<String>,
    source: Option<String>,
    batch_id: Option<i64>,
    doc_meta: Option<Value>,
}

async fn read_multipart(mut multipart: Multipart) -> Result<IngestFields, ApiError> {
    let mut fields = IngestFields::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| Error::invalid_input(e.to_string()))? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                fields.file_name = field.file_name().map(str::to_string);
                fields.file_bytes = Some(field.bytes().await.map_err(|e| Error::invalid_input(e.to_string()))?.to_vec());
            }
            "input_uri" => fields.input_uri = Some(field.text().await.map_err(|e| Error::invalid_input(e.to_string()))?),
            "source_uri" => fields.source_uri = Some(field.text().await.map_err(|e| Error::invalid_input(e.to_string()))?),
            "source" => fields.source = Some(field.text().await.map_err(|e| Error::invalid_input(e.to_string()))?),
            "batch_id" => {
                let text = field.text().await.map_err(|e| Error::invalid_input(e.to_string()))?;
                fields.batch_id =
                    Some(text.parse().map_err(|_| Error::invalid_input(format!("batch_id: not an integer: {text}")))?);
            }
            "doc_meta" => {
                let text = field.text().await.map_err(|e| Error::invalid_input(e.to_string()))?;
                fields.doc_meta = Some(serde_json::from_str(&text).map_err(|e| Error::invalid_input(format!("doc_meta: {e}")))?);
            }
            _ => {}
        }
    }
    Ok(fields)
}

/// POST /document/ingest-document (multipart: `file` or `input_uri`,
/// `source_uri`, `source`, `batch_id`, optional `doc_meta`)
#[utoipa::path(
    post,
    path = "/api/v1/document/ingest-document",
    responses((status = 201, body = DocumentUriRow), (status = 400, description = "Missing file/input_uri or required fields"), (status = 409, description = "Batch already completed")),
    tag = "document"
)]
pub async fn ingest_document(State(state): State<AppState>, multipart: Multipart) -> Result<Json<DocumentUriRow>, ApiError> {
    let fields = read_multipart(multipart).await?;
    let source_uri = fields.source_uri.ok_or_else(|| Error::invalid_input("source_uri is required"))?;
    let source = fields.source.ok_or_else(|| Error::invalid_input("source is required"))?;

    let row = document_ops::create_document_from_uri(
        &state.engine,
        &source_uri,
        &source,
        None,
        fields.file_bytes,
        fields.input_uri.as_deref(),
        fields.doc_meta,
        fields.batch_id,
    )
    .await?;
    Ok(Json(row))
}

/// POST /document/cleanup-orphans
#[utoipa::path(
    post,
    path = "/api/v1/document/cleanup-orphans",
    responses((status = 200, description = "Number of orphaned documents deleted")),
    tag = "document"
)]
pub async fn cleanup_orphans(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let deleted = document_ops::delete_orphaned_documents(&state.engine).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteByUriQuery {
    pub uri: String,
    pub source: String,
}

/// DELETE /document/by-uri?uri=…&source=…
#[utoipa::path(
    delete,
    path = "/api/v1/document/by-uri",
    params(("uri" = String, Query), ("source" = String, Query)),
    responses((status = 200, body = document_ops::DeleteCounts), (status = 404, description = "URI not found")),
    tag = "document"
)]
pub async fn delete_by_uri(
    State(state): State<AppState>,
    Query(q): Query<DeleteByUriQuery>,
) -> Result<Json<document_ops::DeleteCounts>, ApiError> {
    let counts = document_ops::delete_document_uri_by_uri(&state.engine, &q.uri, &q.source).await?;
    Ok(Json(counts))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/document/", get(list_documents))
        .route("/document/ingest-document", post(ingest_document))
        .route("/document/cleanup-orphans", post(cleanup_orphans))
        .route("/document/by-uri", delete(delete_by_uri))
        .with_state(state)
}
