//! `FromRow` row types for every table in §3 of SPEC_FULL.md, plus the plain
//! `Create*` input structs repository methods take. Mirrors this codebase's
//! existing `models.rs` convention of pairing a row type with its creation
//! input rather than reusing one struct for both.

use chrono::{DateTime, Utc};
use docflow_core::{LifecycleEvent, RunStatus, WorkflowStepType};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DocumentRow {
    pub hash: String,
    pub mime_type: String,
    pub file_size: i64,
    pub doc_meta: Value,
}

#[derive(Debug, Clone)]
pub struct CreateDocument {
    pub hash: String,
    pub mime_type: String,
    pub file_size: i64,
    pub doc_meta: Value,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DocumentUriRow {
    pub id: Uuid,
    pub uri: String,
    pub source: String,
    pub doc_hash: String,
    pub version: i32,
    pub batch_id: Option<i64>,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DocumentUriHistoryRow {
    pub id: Uuid,
    pub document_uri_id: Uuid,
    pub action: String,
    pub hash_at_action: String,
    pub batch_id: Option<i64>,
    pub created_date: DateTime<Utc>,
    pub meta: Value,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BatchRow {
    pub id: i64,
    pub name: String,
    pub source: String,
    pub start_date: DateTime<Utc>,
    pub completed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentBytesRow {
    pub hash: String,
    pub artifact_type: String,
    pub storage_root: String,
    pub file_size: i64,
    pub file_bytes: Vec<u8>,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DocumentDbRow {
    pub id: Uuid,
    pub doc_hash: String,
    pub source: String,
    pub db_name: String,
    pub lancedb_dir: String,
    pub rag_id: String,
    pub chunk_count: i64,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StepConfigRow {
    pub id: Uuid,
    pub step_type: WorkflowStepType,
    pub config_json: Value,
    pub cuml_config_json: Value,
}

#[derive(Debug, Clone, FromRow)]
pub struct ConfigSetRow {
    pub id: Uuid,
    pub yaml_id: String,
    pub yaml_contents: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ConfigSetItemRow {
    pub config_set_id: Uuid,
    pub config_id: Uuid,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RunGroupRow {
    pub id: Uuid,
    pub workflow_definition_id: String,
    pub param_definition_id: String,
    pub batch_id: i64,
    pub name: Option<String>,
    pub created_date: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub status: RunStatus,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowRunRow {
    pub id: Uuid,
    pub run_group_id: Uuid,
    pub workflow_definition_id: String,
    pub batch_id: i64,
    pub doc_id: String,
    pub priority: i32,
    pub created_date: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub run_params: Value,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RunStepRow {
    pub id: Uuid,
    pub workflow_run_id: Uuid,
    pub workflow_step_number: i32,
    pub workflow_step_name: String,
    pub step_config_id: Uuid,
    pub step_type: WorkflowStepType,
    pub is_last_step: bool,
    pub retry: i32,
    pub retries: i32,
    pub status: RunStatus,
    pub worker_id: Option<Uuid>,
    pub created_date: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub meta: Value,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LifecycleHistoryRow {
    pub id: Uuid,
    pub run_group_id: Uuid,
    pub workflow_run_id: Uuid,
    pub step_id: Option<Uuid>,
    pub event: LifecycleEvent,
    pub status: RunStatus,
    pub start_date: DateTime<Utc>,
    pub completed_date: Option<DateTime<Utc>>,
    pub status_meta: Value,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkerCheckinRow {
    pub worker_id: Uuid,
    pub first_checkin: DateTime<Utc>,
    pub last_checkin: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SyncStateRow {
    pub source_id: String,
    pub state: Value,
    pub updated_date: DateTime<Utc>,
}
