//! `GET /lancedb/*`: a read-only browse surface over the vector-store
//! databases `StoreHandler` writes into, grounded on the originating
//! system's `list`/`info`/`documents`/`vacuum` commands (`haiku-rag`). This
//! stack carries no real LanceDB table reader; `info`/`documents` report
//! what `DocumentDb` cross-check rows know about a database rather than
//! opening its on-disk table format.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use docflow_core::Error;
use docflow_engine::rag::RagClient;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LancedbListResponse {
    pub lancedb_dir: String,
    pub databases: Vec<docflow_engine::rag::LanceDbSummary>,
}

/// GET /lancedb/list — every database directory under `lancedb_dir` with its
/// on-disk size.
#[utoipa::path(
    get,
    path = "/api/v1/lancedb/list",
    responses((status = 200, body = LancedbListResponse)),
    tag = "lancedb"
)]
pub async fn list_databases(State(state): State<AppState>) -> Result<Json<LancedbListResponse>, ApiError> {
    let databases = state.engine.rag_client().list_databases().await?;
    Ok(Json(LancedbListResponse { lancedb_dir: state.engine.settings().lancedb_dir.clone(), databases }))
}

#[derive(Debug, Deserialize)]
pub struct DbQuery {
    pub db: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LancedbInfoResponse {
    pub db_name: String,
    pub documents: i64,
    pub chunks: i64,
    pub size_bytes: Option<u64>,
}

/// GET /lancedb/info?db=… — document/chunk counts this stack has recorded
/// for `db`, plus its on-disk size when the directory exists.
#[utoipa::path(
    get,
    path = "/api/v1/lancedb/info",
    params(("db" = String, Query)),
    responses((status = 200, body = LancedbInfoResponse), (status = 404, body = crate::error::ErrorResponse)),
    tag = "lancedb"
)]
pub async fn get_info(State(state): State<AppState>, Query(q): Query<DbQuery>) -> Result<Json<LancedbInfoResponse>, ApiError> {
    let (documents, chunks) = state.engine.db().count_document_db_rows_for_db(&q.db).await?;
    let size_bytes = state
        .engine
        .rag_client()
        .list_databases()
        .await?
        .into_iter()
        .find(|d| d.name == q.db)
        .map(|d| d.size_bytes);

    if documents == 0 && size_bytes.is_none() {
        return Err(Error::not_found(format!("lancedb database {}", q.db)).into());
    }
    Ok(Json(LancedbInfoResponse { db_name: q.db, documents, chunks, size_bytes }))
}

#[derive(Debug, Deserialize)]
pub struct DocumentsQuery {
    pub db: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub filter: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LancedbDocument {
    pub doc_hash: String,
    pub source: String,
    pub rag_id: String,
    pub chunk_count: i64,
}

/// GET /lancedb/documents?db=…&limit=&offset=&filter= — the `DocumentDb`
/// rows recorded for `db`, `filter` matching against `source` as a substring
/// (this stack's standing equivalent of the originating command's raw SQL
/// `WHERE` filter).
#[utoipa::path(
    get,
    path = "/api/v1/lancedb/documents",
    params(
        ("db" = String, Query),
        ("limit" = Option<i64>, Query),
        ("offset" = Option<i64>, Query),
        ("filter" = Option<String>, Query),
    ),
    responses((status = 200, body = Vec<LancedbDocument>)),
    tag = "lancedb"
)]
pub async fn list_documents(
    State(state): State<AppState>,
    Query(q): Query<DocumentsQuery>,
) -> Result<Json<Vec<LancedbDocument>>, ApiError> {
    let rows = state
        .engine
        .db()
        .get_document_db_rows_for_db(&q.db, q.filter.as_deref(), q.limit, q.offset)
        .await?;
    let documents = rows
        .into_iter()
        .map(|r| LancedbDocument { doc_hash: r.doc_hash, source: r.source, rag_id: r.rag_id, chunk_count: r.chunk_count })
        .collect();
    Ok(Json(documents))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct VacuumResponse {
    pub status: &'static str,
}

/// GET /lancedb/vacuum?db=… — triggers the backend's compaction. The
/// filesystem-marker adapter has nothing to compact; this only confirms
/// `db` exists.
#[utoipa::path(
    get,
    path = "/api/v1/lancedb/vacuum",
    params(("db" = String, Query)),
    responses((status = 200, body = VacuumResponse), (status = 404, body = crate::error::ErrorResponse)),
    tag = "lancedb"
)]
pub async fn vacuum(State(state): State<AppState>, Query(q): Query<DbQuery>) -> Result<Json<VacuumResponse>, ApiError> {
    state.engine.rag_client().vacuum(&q.db).await?;
    Ok(Json(VacuumResponse { status: "ok" }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/lancedb/list", get(list_databases))
        .route("/lancedb/info", get(get_info))
        .route("/lancedb/documents", get(list_documents))
        .route("/lancedb/vacuum", get(vacuum))
        .with_state(state)
}
