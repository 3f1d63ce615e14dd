//! Boundary over the external RAG/vector-store system. The system itself is
//! opaque (SPEC_FULL.md §1: "referenced only through an import/delete API");
//! this module is that API, not a LanceDB client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::{Error, Result};
use serde_json::Value;

/// One document's chunks (and, when present, embeddings) handed to the RAG
/// system for import.
#[derive(Debug, Clone)]
pub struct RagImportRequest {
    pub db_name: String,
    pub doc_hash: String,
    pub source: String,
    pub chunks: Vec<Value>,
}

/// What `store`'s `DocumentDb` cross-check row records about a successful
/// import (SPEC_FULL.md §4.7).
#[derive(Debug, Clone)]
pub struct RagImportResult {
    pub rag_id: String,
    pub lancedb_dir: String,
}

#[async_trait]
pub trait RagClient: Send + Sync {
    /// Imports one document's chunks into `req.db_name`. Fails with
    /// `Error::ExternalFailure` on any backend error; `StoreHandler` retries
    /// it the same way it retries the parse/embed calls.
    async fn import(&self, req: RagImportRequest) -> Result<RagImportResult>;

    /// Removes a document's entry from `db_name`. Best-effort: callers must
    /// not let this failing block deleting the corresponding `DocumentDb` row
    /// (SPEC_FULL.md §4.9/§7).
    async fn delete(&self, db_name: &str, doc_hash: &str) -> Result<()>;

    /// Lists the database directories under `lancedb_dir`, backing
    /// `GET /lancedb/list`.
    async fn list_databases(&self) -> Result<Vec<LanceDbSummary>>;

    /// Backs `GET /lancedb/vacuum`. The default filesystem adapter holds no
    /// compacted table format to reclaim, so this only confirms `db_name`
    /// resolves to a directory; a real vector-store-backed client would
    /// trigger its own compaction here.
    async fn vacuum(&self, db_name: &str) -> Result<()>;

    /// Every doc hash this client currently has an entry for in `db_name`,
    /// backing the `check-db` consistency command.
    async fn document_hashes(&self, db_name: &str) -> Result<Vec<String>>;
}

/// One database folder's name and on-disk size, as reported by `/lancedb/list`.
#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LanceDbSummary {
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
}

/// Default adapter: a directory per `db_name` under `lancedb_dir`. This
/// process never opens the actual LanceDB table format (no such crate is in
/// this workspace's dependency set, matching the vector store's opaque-system
/// framing); it tracks existence and size on disk, which is everything the
/// import/delete/list contract in SPEC_FULL.md §6 actually requires of it.
pub struct LocalLanceDbClient {
    lancedb_dir: PathBuf,
}

impl LocalLanceDbClient {
    pub fn new(lancedb_dir: impl Into<PathBuf>) -> Self {
        Self { lancedb_dir: lancedb_dir.into() }
    }

    fn db_dir(&self, db_name: &str) -> PathBuf {
        self.lancedb_dir.join(db_name)
    }

    async fn folder_size(path: &Path) -> u64 {
        let mut total = 0u64;
        let mut stack = vec![path.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else { continue };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(file_type) = entry.file_type().await else { continue };
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if let Ok(meta) = entry.metadata().await {
                    total += meta.len();
                }
            }
        }
        total
    }
}

#[async_trait]
impl RagClient for LocalLanceDbClient {
    async fn import(&self, req: RagImportRequest) -> Result<RagImportResult> {
        let dir = self.db_dir(&req.db_name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::external(format!("creating lancedb directory {}: {e}", dir.display())))?;

        let marker = dir.join(format!("{}.json", req.doc_hash));
        let payload = serde_json::json!({ "source": req.source, "chunk_count": req.chunks.len() });
        tokio::fs::write(&marker, payload.to_string())
            .await
            .map_err(|e| Error::external(format!("writing lancedb marker {}: {e}", marker.display())))?;

        Ok(RagImportResult {
            rag_id: format!("{}:{}", req.db_name, req.doc_hash),
            lancedb_dir: dir.to_string_lossy().into_owned(),
        })
    }

    async fn delete(&self, db_name: &str, doc_hash: &str) -> Result<()> {
        let marker = self.db_dir(db_name).join(format!("{doc_hash}.json"));
        match tokio::fs::remove_file(&marker).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::external(format!("deleting lancedb marker {}: {e}", marker.display()))),
        }
    }

    async fn list_databases(&self) -> Result<Vec<LanceDbSummary>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.lancedb_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::external(format!("listing {}: {e}", self.lancedb_dir.display()))),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let size_bytes = Self::folder_size(&entry.path()).await;
            out.push(LanceDbSummary { name, path: entry.path().to_string_lossy().into_owned(), size_bytes });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn vacuum(&self, db_name: &str) -> Result<()> {
        let dir = self.db_dir(db_name);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(Error::not_found(format!("lancedb database {db_name}")));
        }
        Ok(())
    }

    async fn document_hashes(&self, db_name: &str) -> Result<Vec<String>> {
        let dir = self.db_dir(db_name);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::external(format!("listing {}: {e}", dir.display()))),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(hash) = name.strip_suffix(".json") {
                out.push(hash.to_string());
            }
        }
        out.sort();
        Ok(out)
    }
}

pub type SharedRagClient = Arc<dyn RagClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn import_then_delete_round_trips_the_marker_file() {
        let dir = tempfile::tempdir().unwrap();
        let client = LocalLanceDbClient::new(dir.path());

        let result = client
            .import(RagImportRequest {
                db_name: "default".to_string(),
                doc_hash: "sha256-abc".to_string(),
                source: "test".to_string(),
                chunks: vec![serde_json::json!({"text": "hello"})],
            })
            .await
            .unwrap();
        assert_eq!(result.rag_id, "default:sha256-abc");
        assert!(dir.path().join("default/sha256-abc.json").exists());

        client.delete("default", "sha256-abc").await.unwrap();
        assert!(!dir.path().join("default/sha256-abc.json").exists());
    }

    #[tokio::test]
    async fn deleting_a_marker_that_never_existed_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = LocalLanceDbClient::new(dir.path());
        client.delete("default", "sha256-missing").await.unwrap();
    }

    #[tokio::test]
    async fn listing_an_absent_lancedb_dir_returns_an_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let client = LocalLanceDbClient::new(dir.path().join("does-not-exist"));
        assert!(client.list_databases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_databases_reports_each_db_directory() {
        let dir = tempfile::tempdir().unwrap();
        let client = LocalLanceDbClient::new(dir.path());
        client
            .import(RagImportRequest {
                db_name: "docs".to_string(),
                doc_hash: "sha256-1".to_string(),
                source: "test".to_string(),
                chunks: vec![],
            })
            .await
            .unwrap();

        let dbs = client.list_databases().await.unwrap();
        assert_eq!(dbs.len(), 1);
        assert_eq!(dbs[0].name, "docs");
    }

    #[tokio::test]
    async fn document_hashes_lists_imported_markers_without_the_extension() {
        let dir = tempfile::tempdir().unwrap();
        let client = LocalLanceDbClient::new(dir.path());
        client
            .import(RagImportRequest {
                db_name: "docs".to_string(),
                doc_hash: "sha256-1".to_string(),
                source: "test".to_string(),
                chunks: vec![],
            })
            .await
            .unwrap();

        assert_eq!(client.document_hashes("docs").await.unwrap(), vec!["sha256-1".to_string()]);
        assert!(client.document_hashes("missing").await.unwrap().is_empty());
    }
}
