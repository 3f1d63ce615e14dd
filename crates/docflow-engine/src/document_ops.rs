//! Document and artifact operations (SPEC_FULL.md §4.9): ingesting a
//! document by URI, deleting it with a content-hash-scoped cascade, source
//! status classification, and the maintenance operations the CLI/API expose
//! (reset-failed-steps, orphan cleanup, a read-only storage consistency
//! report).

use std::collections::HashMap;

use docflow_core::{ArtifactType, Error, Result};
use docflow_storage::models::{CreateDocument, DocumentUriRow};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::engine::Engine;
use crate::rag::RagClient;

/// Per-category delete counts for a cascading delete, plus the convenience
/// sum the HTTP layer reports as `total_deleted`.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DeleteCounts {
    pub document_uris: u64,
    pub document_uri_history: u64,
    pub documents: u64,
    pub workflow_runs: u64,
    pub run_steps: u64,
    pub lifecycle_history: u64,
    pub document_db_rows: u64,
    pub run_groups: u64,
    /// `DocumentDb` rows for which a RAG-side delete was attempted, whether
    /// or not the backend call itself succeeded (best-effort: never blocks
    /// `document_db_rows` from being deleted). Reported separately from
    /// `document_db_rows` rather than folded into `total_deleted`, since it
    /// counts an external-call attempt and not a deleted row.
    pub rag_deletions_attempted: u64,
    pub total_deleted: u64,
}

impl DeleteCounts {
    fn finalize(mut self) -> Self {
        self.total_deleted = self.document_uris
            + self.document_uri_history
            + self.documents
            + self.workflow_runs
            + self.run_steps
            + self.lifecycle_history
            + self.document_db_rows
            + self.run_groups;
        self
    }
}

/// One URI's classification against a caller-supplied `(uri, hash)` snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UriStatus {
    Matched,
    Mismatch,
    New,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DocStatusReport {
    pub statuses: HashMap<String, UriStatus>,
    /// URIs this source previously recorded that are absent from the
    /// caller's snapshot — candidates for `delete_document_uri_by_uri`.
    pub stale_uris: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StorageInconsistency {
    pub step_config_id: String,
    pub step_type: String,
    pub artifact_type: String,
    pub detail: String,
}

/// Guesses a MIME type from a filename's extension, falling back to
/// `application/octet-stream` for anything unrecognised.
fn guess_mime_type(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "html" | "htm" => "text/html",
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        "json" => "application/json",
        "csv" => "text/csv",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("sha256-{}", hex::encode(digest))
}

/// Reads `input_uri` bytes. Supports `file://` (local filesystem) and
/// `s3://bucket/key` (routed through `Engine::input_store`, independent of
/// the configured artifact storage target).
async fn fetch_input_bytes(engine: &Engine, input_uri: &str) -> Result<Vec<u8>> {
    if let Some(path) = input_uri.strip_prefix("file://") {
        return tokio::fs::read(path)
            .await
            .map_err(|e| Error::external(format!("reading {input_uri}: {e}")));
    }
    if let Some(rest) = input_uri.strip_prefix("s3://") {
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| Error::invalid_input(format!("malformed s3 uri: {input_uri}")))?;
        return engine.input_store().get_object(bucket, key).await;
    }
    Err(Error::invalid_input(format!(
        "unsupported input_uri scheme: {input_uri}"
    )))
}

/// Ingests one document by URI: resolves its bytes, computes a content
/// hash, writes the DOC artifact if absent, and records/updates the
/// `DocumentURI` pointing at it.
#[allow(clippy::too_many_arguments)]
pub async fn create_document_from_uri(
    engine: &Engine,
    source_uri: &str,
    source: &str,
    mime_type: Option<&str>,
    file_bytes: Option<Vec<u8>>,
    input_uri: Option<&str>,
    doc_meta: Option<Value>,
    batch_id: Option<i64>,
) -> Result<DocumentUriRow> {
    if let Some(batch_id) = batch_id {
        if engine.db().is_batch_completed(batch_id).await? {
            return Err(Error::batch_completed(format!("batch {batch_id}")));
        }
    }

    let bytes = match file_bytes {
        Some(bytes) => bytes,
        None => {
            let input_uri = input_uri
                .ok_or_else(|| Error::invalid_input("create_document_from_uri requires file_bytes or input_uri"))?;
            fetch_input_bytes(engine, input_uri).await?
        }
    };

    let hash = content_hash(&bytes);
    let mime_type = mime_type
        .map(str::to_string)
        .unwrap_or_else(|| guess_mime_type(source_uri).to_string());

    let doc_storage = engine.storage_for(ArtifactType::Doc, None)?;
    if !doc_storage.exists(&hash).await? {
        doc_storage.write(&hash, &bytes).await?;
    }

    engine
        .db()
        .create_document(&CreateDocument {
            hash: hash.clone(),
            mime_type,
            file_size: bytes.len() as i64,
            doc_meta: doc_meta.unwrap_or_else(|| json!({})),
        })
        .await?;

    match engine.db().find_document_uri(source_uri, source).await? {
        None => {
            let row = engine
                .db()
                .create_document_uri(source_uri, source, &hash, batch_id)
                .await?;
            engine
                .db()
                .add_history(row.id, "create", &hash, batch_id, &json!({}))
                .await?;
            Ok(row)
        }
        Some(existing) if existing.doc_hash == hash => Ok(existing),
        Some(existing) => {
            let row = engine.db().bump_document_uri_hash(existing.id, &hash).await?;
            engine
                .db()
                .add_history(row.id, "update", &hash, batch_id, &json!({ "previous_hash": existing.doc_hash }))
                .await?;
            Ok(row)
        }
    }
}

/// Deletes the `DocumentURI` for `(uri, source)`. If no other URI still
/// points at its hash, cascades: every `WorkflowRun`/`RunStep`/
/// `LifecycleHistory` row for that hash, the `Document` row, every artifact
/// the deleted steps' step types produce, and `DocumentDb` rows (best-effort
/// RAG-side deletion is attempted but never blocks the row delete).
pub async fn delete_document_uri_by_uri(engine: &Engine, uri: &str, source: &str) -> Result<DeleteCounts> {
    let existing = engine
        .db()
        .find_document_uri(uri, source)
        .await?
        .ok_or_else(|| Error::not_found(format!("document uri {uri} (source={source})")))?;

    let mut counts = DeleteCounts::default();
    counts.document_uri_history = engine.db().delete_document_uri_history(existing.id).await?;
    counts.document_uris = engine.db().delete_document_uri(existing.id).await?;

    let others = engine.db().count_uris_for_hash(&existing.doc_hash).await?;
    if others > 0 {
        return Ok(counts.finalize());
    }

    let (runs, steps, lifecycle, step_configs) =
        engine.db().delete_workflow_runs_for_doc(&existing.doc_hash).await?;
    counts.workflow_runs = runs;
    counts.run_steps = steps;
    counts.lifecycle_history = lifecycle;

    counts.documents = engine.db().delete_document(&existing.doc_hash).await?;

    for (step_config_id, step_type) in step_configs {
        for artifact_type in step_type.produces() {
            let storage = engine.storage_for(*artifact_type, Some((step_config_id, step_type)))?;
            match storage.delete(&existing.doc_hash).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
    }

    let rag_rows = engine.db().get_document_db_rows(&existing.doc_hash).await?;
    for row in &rag_rows {
        counts.rag_deletions_attempted += 1;
        if let Err(e) = engine.rag_client().delete(&row.db_name, &existing.doc_hash).await {
            tracing::warn!(db_name = %row.db_name, doc_hash = %existing.doc_hash, error = %e, "rag-side delete failed, continuing cascade");
        }
    }
    counts.document_db_rows = engine.db().delete_document_db_rows(&existing.doc_hash).await?;

    Ok(counts.finalize())
}

/// Cascading delete of a `RunGroup` and everything under it.
pub async fn delete_run_group(engine: &Engine, id: uuid::Uuid) -> Result<DeleteCounts> {
    let (run_groups, workflow_runs, run_steps, lifecycle_history) = engine.db().delete_run_group_cascade(id).await?;
    Ok(DeleteCounts {
        run_groups,
        workflow_runs,
        run_steps,
        lifecycle_history,
        ..Default::default()
    }
    .finalize())
}

/// Strips a leading `prefix-` or `prefix:` qualifier before hash comparison.
fn strip_hash_prefix(hash: &str) -> &str {
    for sep in ['-', ':'] {
        if let Some(idx) = hash.find(sep) {
            return &hash[idx + 1..];
        }
    }
    hash
}

/// Classifies every URI in `source_hashes` against what is actually stored
/// for `source`, and separately reports stored URIs the snapshot no longer
/// mentions (deletion candidates).
pub async fn get_doc_status(
    engine: &Engine,
    source: &str,
    source_hashes: &HashMap<String, String>,
) -> Result<DocStatusReport> {
    let stored = engine.db().get_uris_for_source(source).await?;
    let stored_by_uri: HashMap<&str, &DocumentUriRow> = stored.iter().map(|r| (r.uri.as_str(), r)).collect();

    let mut statuses = HashMap::with_capacity(source_hashes.len());
    for (uri, hash) in source_hashes {
        let status = match stored_by_uri.get(uri.as_str()) {
            None => UriStatus::New,
            Some(row) if strip_hash_prefix(&row.doc_hash) == strip_hash_prefix(hash) => UriStatus::Matched,
            Some(_) => UriStatus::Mismatch,
        };
        statuses.insert(uri.clone(), status);
    }

    let stale_uris = stored
        .iter()
        .filter(|row| !source_hashes.contains_key(&row.uri))
        .map(|row| row.uri.clone())
        .collect();

    Ok(DocStatusReport { statuses, stale_uris })
}

/// Bulk-resets every FAILED step of a run group back to PENDING, and its
/// owning run back to RUNNING, backing `/workflow/retry`.
pub async fn reset_failed_steps(engine: &Engine, run_group_id: uuid::Uuid) -> Result<u64> {
    engine.db().reset_failed_steps(run_group_id).await
}

/// Deletes every `Document` with zero referencing `DocumentURI` rows.
pub async fn delete_orphaned_documents(engine: &Engine) -> Result<u64> {
    engine.db().delete_orphaned_documents().await
}

/// Read-only consistency report: for every `StepConfig` still referenced by a
/// non-terminal `RunStep`, confirms each artifact type its step type produces
/// resolves to a constructible storage backend, in that step-config's own
/// artifact namespace (§4.1). Reports, never repairs.
pub async fn validate_storage(engine: &Engine) -> Result<Vec<StorageInconsistency>> {
    let step_configs = engine.db().list_step_configs_in_flight().await?;
    let mut inconsistencies = Vec::new();

    for (step_config_id, step_type) in step_configs {
        for artifact_type in step_type.produces() {
            if let Err(e) = engine.storage_for(*artifact_type, Some((step_config_id, step_type))) {
                inconsistencies.push(StorageInconsistency {
                    step_config_id: step_config_id.to_string(),
                    step_type: step_type.to_string(),
                    artifact_type: artifact_type.to_string(),
                    detail: e.to_string(),
                });
            }
        }
    }

    Ok(inconsistencies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_known_extensions() {
        assert_eq!(guess_mime_type("report.PDF"), "application/pdf");
        assert_eq!(guess_mime_type("notes.md"), "text/markdown");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        assert_eq!(guess_mime_type("blob.xyz"), "application/octet-stream");
        assert_eq!(guess_mime_type("no_extension"), "application/octet-stream");
    }

    #[test]
    fn content_hash_is_stable_and_prefixed() {
        let a = content_hash(b"hello");
        let b = content_hash(b"hello");
        assert_eq!(a, b);
        assert!(a.starts_with("sha256-"));
    }

    #[test]
    fn strip_hash_prefix_handles_dash_and_colon_and_bare() {
        assert_eq!(strip_hash_prefix("sha256-abc"), "abc");
        assert_eq!(strip_hash_prefix("sha256:abc"), "abc");
        assert_eq!(strip_hash_prefix("abc"), "abc");
    }
}
