//! Content-addressed artifact storage, behind one trait with three concrete
//! backends (§4.1). Each artifact type is stored under its own logical root
//! (`storage_root`, e.g. `"raw"`, `"markdown"`, `"chunks"`) so the same hash
//! can carry independent blobs per pipeline stage.

use async_trait::async_trait;
use docflow_core::{Error, Result, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::repositories::Database;

#[async_trait]
pub trait StorageOperator: Send + Sync {
    async fn read(&self, hash: &str) -> Result<Vec<u8>>;
    async fn write(&self, hash: &str, data: &[u8]) -> Result<()>;
    async fn exists(&self, hash: &str) -> Result<bool>;
    async fn delete(&self, hash: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<String>>;
    /// A stable, human-readable locator for this blob (not necessarily
    /// fetchable by HTTP clients) recorded in `document_uri_history` meta.
    fn uri(&self, hash: &str) -> String;
}

/// Stores artifact bytes directly in Postgres, in `document_bytes`. Used by
/// default for small deployments that want one dependency to back up.
pub struct DbStorageOperator {
    db: Database,
    artifact_type: String,
    storage_root: String,
}

impl DbStorageOperator {
    pub fn new(db: Database, artifact_type: impl Into<String>, storage_root: impl Into<String>) -> Self {
        Self {
            db,
            artifact_type: artifact_type.into(),
            storage_root: storage_root.into(),
        }
    }
}

#[async_trait]
impl StorageOperator for DbStorageOperator {
    async fn read(&self, hash: &str) -> Result<Vec<u8>> {
        self.db.blob_read(&self.artifact_type, &self.storage_root, hash).await
    }

    async fn write(&self, hash: &str, data: &[u8]) -> Result<()> {
        self.db.blob_write(&self.artifact_type, &self.storage_root, hash, data).await
    }

    async fn exists(&self, hash: &str) -> Result<bool> {
        self.db.blob_exists(&self.artifact_type, &self.storage_root, hash).await
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        self.db.blob_delete(&self.artifact_type, &self.storage_root, hash).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.db.blob_list(&self.artifact_type, &self.storage_root).await
    }

    fn uri(&self, hash: &str) -> String {
        format!("db://{}/{}/{}", self.artifact_type, self.storage_root, hash)
    }
}

/// Stores artifact bytes as files under `{base_dir}/{storage_root}/`, sharded
/// by the last two characters of the hash to keep any one directory from
/// holding an unmanageable number of entries.
pub struct FileStorageOperator {
    base_dir: PathBuf,
    storage_root: String,
}

impl FileStorageOperator {
    pub fn new(base_dir: impl Into<PathBuf>, storage_root: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            storage_root: storage_root.into(),
        }
    }

    fn shard_dir(&self, hash: &str) -> PathBuf {
        let suffix = if hash.len() >= 2 { &hash[hash.len() - 2..] } else { hash };
        self.base_dir.join(&self.storage_root).join(suffix)
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        self.shard_dir(hash).join(hash)
    }
}

#[async_trait]
impl StorageOperator for FileStorageOperator {
    async fn read(&self, hash: &str) -> Result<Vec<u8>> {
        fs::read(self.path_for(hash))
            .await
            .map_err(|e| Error::not_found(format!("artifact {hash} in {}: {e}", self.storage_root)))
    }

    async fn write(&self, hash: &str, data: &[u8]) -> Result<()> {
        let dir = self.shard_dir(hash);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::external(format!("creating {}: {e}", dir.display())))?;
        let path = dir.join(hash);
        let tmp_path = dir.join(format!("{hash}.tmp"));
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| Error::external(format!("writing {}: {e}", tmp_path.display())))?;
        file.write_all(data)
            .await
            .map_err(|e| Error::external(format!("writing {}: {e}", tmp_path.display())))?;
        file.flush().await.map_err(|e| Error::external(e.to_string()))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| Error::external(format!("renaming into place {}: {e}", path.display())))?;
        Ok(())
    }

    async fn exists(&self, hash: &str) -> Result<bool> {
        Ok(fs::metadata(self.path_for(hash)).await.is_ok())
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        fs::remove_file(self.path_for(hash))
            .await
            .map_err(|e| Error::not_found(format!("artifact {hash} in {}: {e}", self.storage_root)))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let root = self.base_dir.join(&self.storage_root);
        let mut out = Vec::new();
        let mut shards = match fs::read_dir(&root).await {
            Ok(r) => r,
            Err(_) => return Ok(out),
        };
        while let Ok(Some(shard)) = shards.next_entry().await {
            if !shard.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let mut entries = fs::read_dir(shard.path())
                .await
                .map_err(|e| Error::external(e.to_string()))?;
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Some(name) = entry.file_name().to_str() {
                    if !name.ends_with(".tmp") {
                        out.push(name.to_string());
                    }
                }
            }
        }
        Ok(out)
    }

    fn uri(&self, hash: &str) -> String {
        format!("file://{}", self.path_for(hash).display())
    }
}

/// Object-store backend for an S3-compatible bucket. Network calls route
/// through a generic `ObjectStoreClient` so unit tests can substitute a fake
/// without standing up a real bucket.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()>;
    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

pub struct S3StorageOperator {
    client: Arc<dyn ObjectStoreClient>,
    bucket: String,
    storage_root: String,
}

impl S3StorageOperator {
    pub fn new(client: Arc<dyn ObjectStoreClient>, bucket: impl Into<String>, storage_root: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            storage_root: storage_root.into(),
        }
    }

    fn key_for(&self, hash: &str) -> String {
        format!("{}/{}", self.storage_root, hash)
    }
}

#[async_trait]
impl StorageOperator for S3StorageOperator {
    async fn read(&self, hash: &str) -> Result<Vec<u8>> {
        self.client.get_object(&self.bucket, &self.key_for(hash)).await
    }

    async fn write(&self, hash: &str, data: &[u8]) -> Result<()> {
        self.client.put_object(&self.bucket, &self.key_for(hash), data).await
    }

    async fn exists(&self, hash: &str) -> Result<bool> {
        self.client.head_object(&self.bucket, &self.key_for(hash)).await
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        self.client.delete_object(&self.bucket, &self.key_for(hash)).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.storage_root);
        let keys = self.client.list_objects(&self.bucket, &prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(|s| s.to_string()))
            .collect())
    }

    fn uri(&self, hash: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.key_for(hash))
    }
}

/// Resolves the configured backend for one artifact type's storage root, per
/// §4.1: every artifact type uses the same `file_store_target`, each under
/// its own named root directory/table-partition/key-prefix.
pub fn get_storage_operator(
    settings: &Settings,
    db: &Database,
    storage_root: &str,
    artifact_type: &str,
    object_store: Option<Arc<dyn ObjectStoreClient>>,
) -> Result<Arc<dyn StorageOperator>> {
    let target: docflow_core::FileStoreTarget = settings.file_store_target.parse()?;
    Ok(match target {
        docflow_core::FileStoreTarget::Db => {
            Arc::new(DbStorageOperator::new(db.clone(), artifact_type, storage_root))
        }
        docflow_core::FileStoreTarget::Fs => {
            Arc::new(FileStorageOperator::new(Path::new(&settings.file_store_dir), storage_root))
        }
        docflow_core::FileStoreTarget::S3 => {
            let client = object_store
                .ok_or_else(|| Error::invalid_input("s3 storage target selected but no object store client configured"))?;
            Arc::new(S3StorageOperator::new(client, settings.artifact_s3.bucket.clone(), storage_root))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_operator_round_trips() {
        let dir = tempdir().unwrap();
        let op = FileStorageOperator::new(dir.path(), "chunks");
        assert!(!op.exists("abc123").await.unwrap());
        op.write("abc123", b"hello").await.unwrap();
        assert!(op.exists("abc123").await.unwrap());
        assert_eq!(op.read("abc123").await.unwrap(), b"hello");
        let listed = op.list().await.unwrap();
        assert_eq!(listed, vec!["abc123".to_string()]);
        op.delete("abc123").await.unwrap();
        assert!(!op.exists("abc123").await.unwrap());
    }

    #[tokio::test]
    async fn file_operator_shards_by_hash_suffix() {
        let dir = tempdir().unwrap();
        let op = FileStorageOperator::new(dir.path(), "raw");
        op.write("deadbeef", b"x").await.unwrap();
        assert!(dir.path().join("raw").join("ef").join("deadbeef").exists());
    }

    struct FakeObjectStore {
        blob: std::sync::Mutex<Option<Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStoreClient for FakeObjectStore {
        async fn get_object(&self, _bucket: &str, _key: &str) -> Result<Vec<u8>> {
            self.blob
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::not_found("missing"))
        }
        async fn put_object(&self, _bucket: &str, _key: &str, data: &[u8]) -> Result<()> {
            *self.blob.lock().unwrap() = Some(data.to_vec());
            Ok(())
        }
        async fn head_object(&self, _bucket: &str, _key: &str) -> Result<bool> {
            Ok(self.blob.lock().unwrap().is_some())
        }
        async fn delete_object(&self, _bucket: &str, _key: &str) -> Result<()> {
            *self.blob.lock().unwrap() = None;
            Ok(())
        }
        async fn list_objects(&self, _bucket: &str, prefix: &str) -> Result<Vec<String>> {
            if self.blob.lock().unwrap().is_some() {
                Ok(vec![format!("{prefix}known-hash")])
            } else {
                Ok(vec![])
            }
        }
    }

    #[tokio::test]
    async fn s3_operator_strips_storage_root_prefix_on_list() {
        let client: Arc<dyn ObjectStoreClient> = Arc::new(FakeObjectStore { blob: std::sync::Mutex::new(None) });
        let op = S3StorageOperator::new(client, "my-bucket", "embeddings");
        op.write("known-hash", b"vec").await.unwrap();
        let listed = op.list().await.unwrap();
        assert_eq!(listed, vec!["known-hash".to_string()]);
    }
}
