//! Library half of the HTTP API: the axum router and its OpenAPI document,
//! exposed so `docflow-cli serve` can run the same API in-process instead of
//! shelling out to the `docflow-api` binary. `src/main.rs` is a thin
//! wrapper around [`serve`].

pub mod auth;
pub mod error;
pub mod pagination;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use docflow_core::Settings;
use docflow_engine::Engine;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::source_status::source_status,
        routes::batch::create_batch,
        routes::batch::list_batches,
        routes::batch::start_workflows,
        routes::batch::batch_status,
        routes::batch::batch_steps,
        routes::document::list_documents,
        routes::document::ingest_document,
        routes::document::cleanup_orphans,
        routes::document::delete_by_uri,
        routes::workflow::list_runs,
        routes::workflow::list_runs_by_batch,
        routes::workflow::runs_by_status,
        routes::workflow::get_run,
        routes::workflow::run_lifecycle,
        routes::workflow::list_definitions,
        routes::workflow::get_definition,
        routes::workflow::list_param_sets,
        routes::workflow::get_param_set,
        routes::workflow::save_param_set,
        routes::workflow::delete_param_set,
        routes::workflow::list_run_groups,
        routes::workflow::get_run_group,
        routes::workflow::run_group_stats,
        routes::workflow::delete_run_group,
        routes::workflow::run_steps,
        routes::workflow::create_run,
        routes::workflow::retry,
        routes::stats::durations,
        routes::stats::step_stats,
        routes::sync_state::get_sync_state,
        routes::sync_state::put_sync_state,
        routes::sync_state::delete_sync_state,
        routes::lancedb::list_databases,
        routes::lancedb::get_info,
        routes::lancedb::list_documents,
        routes::lancedb::vacuum,
    ),
    components(schemas(
        error::ErrorResponse,
        routes::batch::CreateBatchRequest,
        routes::batch::StartWorkflowsRequest,
        routes::source_status::SourceStatusRequest,
        routes::workflow::CreateRunRequest,
        routes::workflow::SaveParamSetRequest,
        routes::workflow::WorkflowRunExpanded,
        routes::stats::RunDuration,
        routes::stats::StepStat,
        routes::sync_state::PutSyncStateRequest,
        routes::lancedb::LancedbListResponse,
        routes::lancedb::LancedbInfoResponse,
        routes::lancedb::LancedbDocument,
        routes::lancedb::VacuumResponse,
        docflow_engine::rag::LanceDbSummary,
        docflow_storage::models::DocumentUriRow,
        docflow_storage::models::DocumentRow,
        docflow_storage::models::BatchRow,
        docflow_storage::models::RunGroupRow,
        docflow_storage::models::WorkflowRunRow,
        docflow_storage::models::RunStepRow,
        docflow_storage::models::SyncStateRow,
        docflow_engine::document_ops::DeleteCounts,
    )),
    tags(
        (name = "batch", description = "Ingest batch lifecycle"),
        (name = "document", description = "Document ingestion and lookup"),
        (name = "source-status", description = "Source crawl reconciliation"),
        (name = "workflow", description = "Workflow definitions, parameter sets, run groups, and runs"),
        (name = "stats", description = "Run group timing and step statistics"),
        (name = "sync-state", description = "Per-source connector cursor storage"),
        (name = "lancedb", description = "Read-only browse over the vector-store databases"),
    ),
    info(
        title = "Docflow API",
        version = "0.1.0",
        description = "HTTP API for the document-ingestion workflow engine",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

/// Builds the full router: health check outside auth, everything else under
/// `/api/v1` behind the bearer-or-proxy-header middleware, plus CORS,
/// request tracing, and the swagger UI.
pub fn build_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .merge(routes::source_status::routes(state.clone()))
        .merge(routes::batch::routes(state.clone()))
        .merge(routes::document::routes(state.clone()))
        .merge(routes::workflow::routes(state.clone()))
        .merge(routes::stats::routes(state.clone()))
        .merge(routes::sync_state::routes(state.clone()))
        .merge(routes::lancedb::routes(state.clone()))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_auth));

    Router::new()
        .merge(routes::health::routes(state))
        .nest("/api/v1", authenticated)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

/// Binds and serves the API against an already-connected `Engine`. Used by
/// both the `docflow-api` binary and `docflow-cli serve`, so the two never
/// drift apart.
pub async fn serve(engine: Arc<Engine>, host: &str, port: u16) -> Result<()> {
    let state = AppState { engine };
    let app = build_router(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("parsing bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("binding to address")?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Settings-driven convenience wrapper around [`serve`] using
/// `settings.api_host`/`settings.api_port` as the bind address.
pub async fn serve_with_settings(settings: Settings) -> Result<()> {
    let engine = Engine::connect(settings.clone()).await.context("connecting engine")?;
    serve(Arc::new(engine), &settings.api_host, settings.api_port).await
}
