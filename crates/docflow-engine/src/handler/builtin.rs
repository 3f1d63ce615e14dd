//! The five reference-pipeline handlers (validate/parse/chunk/embed/store)
//! and the passthrough used for `ingest`/`enrich`/`route` (SPEC_FULL.md
//! §4.7).

use std::future::Future;

use async_trait::async_trait;
use docflow_core::ArtifactType;
use serde_json::{json, Value};
use tracing::warn;

use super::context::StepContext;
use super::definition::{HandlerError, StepHandler};
use crate::rag::RagImportRequest;
use crate::reliability::RetryPolicy;

/// Retries `f` under `policy`, treating every `HandlerError::External` as
/// retryable and everything else as immediately fatal. Parsing and embedding
/// calls out to services that occasionally drop a connection mid-request;
/// document-shape errors never get better on retry.
async fn call_with_retry<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> Result<T, HandlerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HandlerError>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(HandlerError::External(msg)) if policy.has_attempts_remaining(attempt) => {
                let delay = policy.delay_for_attempt(attempt + 1);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %msg, "external call failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reads DOC bytes and records validation outcome in `doc_meta`. Does not
/// attempt full-format parsing: that is `parse`'s job; this only rejects
/// obviously-bad input (empty bytes, over a configured size ceiling).
pub struct ValidateHandler;

#[async_trait]
impl StepHandler for ValidateHandler {
    async fn handle(&self, ctx: &StepContext) -> Result<(), HandlerError> {
        let storage = ctx.storage(ArtifactType::Doc)?;
        let bytes = storage.read(&ctx.doc_hash).await?;

        let max_size = ctx.params().get("max_file_size").and_then(Value::as_u64);

        if bytes.is_empty() {
            return Err(HandlerError::DocumentInvalid(format!("{} has zero bytes", ctx.doc_hash)));
        }
        if let Some(max) = max_size {
            if bytes.len() as u64 > max {
                return Err(HandlerError::DocumentInvalid(format!(
                    "{} is {} bytes, exceeds max_file_size {max}",
                    ctx.doc_hash,
                    bytes.len()
                )));
            }
        }

        let doc_meta = json!({
            "is_valid": true,
            "page_count": Value::Null,
            "file_size": bytes.len(),
        });
        ctx.db().update_document_meta(&ctx.doc_hash, &doc_meta).await?;
        Ok(())
    }
}

/// Sends DOC bytes to the configured parsing service and writes both parsed
/// representations. Shortcuts when both outputs already exist and the step
/// config does not set `force: true`.
pub struct ParseHandler;

#[async_trait]
impl StepHandler for ParseHandler {
    async fn handle(&self, ctx: &StepContext) -> Result<(), HandlerError> {
        let md_storage = ctx.storage(ArtifactType::ParsedMd)?;
        let json_storage = ctx.storage(ArtifactType::ParsedJson)?;

        let force = ctx.param_bool("force", false);
        if !force && md_storage.exists(&ctx.doc_hash).await? && json_storage.exists(&ctx.doc_hash).await? {
            return Ok(());
        }

        let doc_storage = ctx.storage(ArtifactType::Doc)?;
        let bytes = doc_storage.read(&ctx.doc_hash).await?;

        let _permit = ctx
            .docling_permits()
            .acquire()
            .await
            .map_err(|e| HandlerError::External(format!("docling semaphore closed: {e}")))?;

        let url = format!("{}/convert", ctx.settings().docling_server_url);
        let retry = RetryPolicy::exponential().with_max_attempts(3);
        let parsed: Value = call_with_retry(&retry, || async {
            let response = ctx
                .http()
                .post(&url)
                .body(bytes.clone())
                .send()
                .await
                .map_err(|e| HandlerError::External(format!("docling request failed: {e}")))?;

            if !response.status().is_success() {
                return Err(HandlerError::External(format!(
                    "docling returned {} for {}",
                    response.status(),
                    ctx.doc_hash
                )));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| HandlerError::External(format!("docling response body: {e}")))
        })
        .await?;

        let markdown = parsed.get("markdown").and_then(Value::as_str).unwrap_or_default();
        json_storage.write(&ctx.doc_hash, parsed.to_string().as_bytes()).await?;
        md_storage.write(&ctx.doc_hash, markdown.as_bytes()).await?;
        Ok(())
    }
}

/// Splits the parsed document's text content into fixed-size,
/// overlapping-free chunks and writes the resulting list as a JSON array of
/// `{index, text}` objects.
pub struct ChunkHandler;

#[async_trait]
impl StepHandler for ChunkHandler {
    async fn handle(&self, ctx: &StepContext) -> Result<(), HandlerError> {
        let json_storage = ctx.storage(ArtifactType::ParsedJson)?;
        let parsed_bytes = json_storage.read(&ctx.doc_hash).await?;
        let parsed: Value = serde_json::from_slice(&parsed_bytes)
            .map_err(|e| HandlerError::External(format!("malformed parsed-json artifact: {e}")))?;
        let markdown = parsed.get("markdown").and_then(Value::as_str).unwrap_or_default().to_string();

        let chunk_size = ctx.params().get("chunk_size").and_then(Value::as_u64).unwrap_or(1000) as usize;
        if chunk_size == 0 {
            return Err(HandlerError::MissingParameter("chunk_size must be > 0".into()));
        }

        let chunks: Vec<Value> = markdown
            .as_bytes()
            .chunks(chunk_size)
            .enumerate()
            .map(|(index, bytes)| {
                json!({
                    "index": index,
                    "text": String::from_utf8_lossy(bytes),
                })
            })
            .collect();

        let chunks_storage = ctx.storage(ArtifactType::Chunks)?;
        let payload = Value::Array(chunks);
        chunks_storage.write(&ctx.doc_hash, payload.to_string().as_bytes()).await?;
        Ok(())
    }
}

/// Embeds each chunk in batches of `Settings::embed_batch_size` via the
/// configured Ollama-compatible embeddings endpoint.
pub struct EmbedHandler;

#[async_trait]
impl StepHandler for EmbedHandler {
    async fn handle(&self, ctx: &StepContext) -> Result<(), HandlerError> {
        let chunks_storage = ctx.storage(ArtifactType::Chunks)?;
        let chunks: Vec<Value> = serde_json::from_slice(&chunks_storage.read(&ctx.doc_hash).await?)
            .map_err(|e| HandlerError::External(format!("malformed chunks artifact: {e}")))?;

        let model = ctx.param_str("embed_model").unwrap_or_else(|| "nomic-embed-text".to_string());
        let batch_size = ctx.settings().embed_batch_size.max(1);

        let retry = RetryPolicy::exponential().with_max_attempts(3);
        let url = format!("{}/api/embed", ctx.settings().ollama_base_url);

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size) {
            let texts: Vec<&str> = batch.iter().filter_map(|c| c.get("text").and_then(Value::as_str)).collect();
            let vectors = call_with_retry(&retry, || async {
                let response = ctx
                    .http()
                    .post(&url)
                    .json(&json!({ "model": model, "input": texts }))
                    .send()
                    .await
                    .map_err(|e| HandlerError::External(format!("embedding request failed: {e}")))?;

                if !response.status().is_success() {
                    return Err(HandlerError::External(format!(
                        "embedding service returned {} for {}",
                        response.status(),
                        ctx.doc_hash
                    )));
                }

                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| HandlerError::External(format!("embedding response body: {e}")))?;
                Ok(body.get("embeddings").cloned().unwrap_or(Value::Array(vec![])))
            })
            .await?;
            embeddings.push(vectors);
        }

        let embeddings_storage = ctx.storage(ArtifactType::Embeddings)?;
        let payload = json!({ "model": model, "batches": embeddings });
        embeddings_storage.write(&ctx.doc_hash, payload.to_string().as_bytes()).await?;
        Ok(())
    }
}

/// Imports chunks (and embeddings, when produced) into the external RAG
/// system and records a `DocumentDb` cross-check row on success.
pub struct StoreHandler;

#[async_trait]
impl StepHandler for StoreHandler {
    async fn handle(&self, ctx: &StepContext) -> Result<(), HandlerError> {
        if !ctx.settings().do_rag {
            return Ok(());
        }

        let chunks_storage = ctx.storage(ArtifactType::Chunks)?;
        let chunks: Vec<Value> = serde_json::from_slice(&chunks_storage.read(&ctx.doc_hash).await?)
            .map_err(|e| HandlerError::External(format!("malformed chunks artifact: {e}")))?;

        let db_name = ctx.param_str("db_name").unwrap_or_else(|| "default".to_string());
        let source = ctx.source.clone().unwrap_or_else(|| "unknown".to_string());

        let retry = RetryPolicy::exponential().with_max_attempts(3);
        let import = call_with_retry(&retry, || async {
            ctx.rag_client()
                .import(RagImportRequest {
                    db_name: db_name.clone(),
                    doc_hash: ctx.doc_hash.clone(),
                    source: source.clone(),
                    chunks: chunks.clone(),
                })
                .await
                .map_err(|e| HandlerError::External(format!("rag import failed: {e}")))
        })
        .await?;

        ctx.db()
            .create_document_db_row(
                &ctx.doc_hash,
                &source,
                &db_name,
                &import.lancedb_dir,
                &import.rag_id,
                chunks.len() as i64,
            )
            .await?;
        Ok(())
    }
}

/// `ingest`/`enrich`/`route` ship no processing body; they exist so a
/// workflow definition can declare a pipeline stage without a bundled
/// handler (SPEC_FULL.md §4.7).
pub struct PassthroughHandler;

#[async_trait]
impl StepHandler for PassthroughHandler {
    async fn handle(&self, _ctx: &StepContext) -> Result<(), HandlerError> {
        Ok(())
    }
}
