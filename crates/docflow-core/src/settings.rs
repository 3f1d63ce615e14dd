//! Process-wide settings, loaded once from the environment and shared as an
//! `Arc<Settings>` through `AppState`/the engine handle rather than held as a
//! lazily-initialized global (see SPEC_FULL.md §9 on global singletons).

use std::env;

use serde::Serialize;

use crate::error::{Error, Result};

/// Credentials and location for one S3-compatible bucket. Used for both the
/// input-document bucket and the artifact-storage bucket; they are
/// configured independently.
#[derive(Debug, Clone, Serialize)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint_url: String,
    pub access_key_id: String,
    pub access_secret: String,
    pub region: String,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            bucket: "default".to_string(),
            endpoint_url: "default".to_string(),
            access_key_id: "default".to_string(),
            access_secret: "default".to_string(),
            region: "default".to_string(),
        }
    }
}

impl S3Settings {
    fn from_env(prefix: &str) -> Self {
        let var = |suffix: &str, default: &str| {
            env::var(format!("{prefix}__{suffix}")).unwrap_or_else(|_| default.to_string())
        };
        Self {
            bucket: var("BUCKET", "default"),
            endpoint_url: var("ENDPOINT_URL", "default"),
            access_key_id: var("ACCESS_KEY_ID", "default"),
            access_secret: var("ACCESS_SECRET", "default"),
            region: var("REGION", "default"),
        }
    }

    /// Fails validation if any field was left at its placeholder default;
    /// only called for the backend that is actually selected.
    pub fn validate(&self, label: &str) -> Result<()> {
        if self.access_key_id.is_empty() || self.access_key_id == "default" {
            return Err(Error::invalid_input(format!("{label}.access_key_id is required")));
        }
        if self.access_secret.is_empty() || self.access_secret == "default" {
            return Err(Error::invalid_input(format!("{label}.access_secret is required")));
        }
        if self.region.is_empty() || self.region == "default" {
            return Err(Error::invalid_input(format!("{label}.region is required")));
        }
        if self.bucket.is_empty() || self.bucket == "default" {
            return Err(Error::invalid_input(format!("{label}.bucket is required")));
        }
        Ok(())
    }
}

/// Which concrete `StorageOperator` backend to use for artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStoreTarget {
    Db,
    Fs,
    S3,
}

impl std::str::FromStr for FileStoreTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "db" => Ok(FileStoreTarget::Db),
            "fs" => Ok(FileStoreTarget::Fs),
            "s3" => Ok(FileStoreTarget::S3),
            other => Err(Error::invalid_input(format!("unknown file_store_target: {other}"))),
        }
    }
}

/// The process-wide configuration object. Constructed once via
/// [`Settings::from_env`] and shared behind an `Arc`.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub doc_db_url: String,
    pub docling_server_url: String,
    pub docling_http_timeout_secs: u64,
    pub log_level: String,

    pub file_store_target: String,
    pub file_store_dir: String,
    pub lancedb_dir: String,
    pub document_store_dir: String,
    pub parsed_markdown_store_dir: String,
    pub parsed_json_store_dir: String,
    pub chunks_store_dir: String,
    pub embeddings_store_dir: String,

    pub ingest_queue_concurrency: usize,
    pub ingest_worker_concurrency: usize,
    pub docling_concurrency: usize,

    pub input_s3: S3Settings,
    pub artifact_s3: S3Settings,

    pub workflow_dir: String,
    pub default_workflow_id: String,
    pub param_dir: String,
    pub default_param_id: String,

    pub worker_checkin_interval_secs: u64,
    pub worker_checkin_timeout_secs: u64,
    pub worker_task_count: usize,
    pub embed_batch_size: usize,
    pub ollama_base_url: String,

    pub do_rag: bool,

    /// Shared secret checked against `Authorization: Bearer <token>`. `None`
    /// disables bearer auth (the proxy header, if set, is still honored).
    pub api_auth_token: Option<String>,
    /// Header name a trusted reverse proxy sets after authenticating the
    /// caller itself; its mere presence (non-empty) satisfies auth.
    pub api_auth_proxy_header: String,

    /// Default bind address for `docflow-api`/`docflow-cli serve`; overridable
    /// per-invocation by the CLI's `--host`/`--port` flags.
    pub api_host: String,
    pub api_port: u16,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Load settings from the process environment. `DOC_DB_URL` is the only
    /// field without a usable default; its absence is a configuration error.
    ///
    /// Callers that also want a `.env` file loaded (development convenience)
    /// should call `dotenvy::dotenv().ok()` before this, matching the
    /// convention this codebase already uses in its binaries.
    pub fn from_env() -> Result<Self> {
        let doc_db_url = env::var("DOC_DB_URL")
            .map_err(|_| Error::invalid_input("DOC_DB_URL must be set"))?;

        Ok(Self {
            doc_db_url,
            docling_server_url: env_string("DOCLING_SERVER_URL", "http://localhost:5001/v1"),
            docling_http_timeout_secs: env_parsed("DOCLING_HTTP_TIMEOUT", 600),
            log_level: env_string("LOG_LEVEL", "INFO"),

            file_store_target: env_string("FILE_STORE_TARGET", "fs"),
            file_store_dir: env_string("FILE_STORE_DIR", "file_store"),
            lancedb_dir: env_string("LANCEDB_DIR", "lancedb"),
            document_store_dir: env_string("DOCUMENT_STORE_DIR", "raw"),
            parsed_markdown_store_dir: env_string("PARSED_MARKDOWN_STORE_DIR", "markdown"),
            parsed_json_store_dir: env_string("PARSED_JSON_STORE_DIR", "json"),
            chunks_store_dir: env_string("CHUNKS_STORE_DIR", "chunks"),
            embeddings_store_dir: env_string("EMBEDDINGS_STORE_DIR", "embeddings"),

            ingest_queue_concurrency: env_parsed("INGEST_QUEUE_CONCURRENCY", 20),
            ingest_worker_concurrency: env_parsed("INGEST_WORKER_CONCURRENCY", 10),
            docling_concurrency: env_parsed("DOCLING_CONCURRENCY", 3),

            input_s3: S3Settings::from_env("INPUT_S3"),
            artifact_s3: S3Settings::from_env("ARTIFACT_S3"),

            workflow_dir: env_string("WORKFLOW_DIR", "config/workflows"),
            default_workflow_id: env_string("DEFAULT_WORKFLOW_ID", "batch_split"),
            param_dir: env_string("PARAM_DIR", "config/params"),
            default_param_id: env_string("DEFAULT_PARAM_ID", "default"),

            worker_checkin_interval_secs: env_parsed("WORKER_CHECKIN_INTERVAL", 120),
            worker_checkin_timeout_secs: env_parsed("WORKER_CHECKIN_TIMEOUT", 600),
            worker_task_count: env_parsed("WORKER_TASK_COUNT", 5),
            embed_batch_size: env_parsed("EMBED_BATCH_SIZE", 1000),
            ollama_base_url: env_string("OLLAMA_BASE_URL", "http://localhost:11434"),

            do_rag: env_parsed("DO_RAG", true),

            api_auth_token: env::var("API_AUTH_TOKEN").ok().filter(|v| !v.is_empty()),
            api_auth_proxy_header: env_string("API_AUTH_PROXY_HEADER", "X-Forwarded-User"),

            api_host: env_string("API_HOST", "0.0.0.0"),
            api_port: env_parsed("API_PORT", 9000),
        })
    }

    /// Parse [`FileStoreTarget`] and, when it needs S3, validate those
    /// credentials are actually set. Called by `validate-settings` and by
    /// `db-init`/`serve`/`worker` at startup so a bad config fails fast.
    pub fn validate(&self) -> Result<()> {
        let target: FileStoreTarget = self.file_store_target.parse()?;
        if target == FileStoreTarget::S3 {
            self.artifact_s3.validate("artifact_s3")?;
        }
        if self.worker_task_count == 0 {
            return Err(Error::invalid_input("worker_task_count must be >= 1"));
        }
        Ok(())
    }

    /// Settings rendered with secrets redacted, for `validate-settings --dump`.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            for key in ["input_s3", "artifact_s3"] {
                if let Some(s3) = obj.get_mut(key).and_then(|v| v.as_object_mut()) {
                    s3.insert("access_key_id".to_string(), serde_json::json!("***"));
                    s3.insert("access_secret".to_string(), serde_json::json!("***"));
                }
            }
            if obj.contains_key("api_auth_token") {
                obj.insert("api_auth_token".to_string(), serde_json::json!(self.api_auth_token.as_ref().map(|_| "***")));
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_target_parses_known_values() {
        assert_eq!("db".parse::<FileStoreTarget>().unwrap(), FileStoreTarget::Db);
        assert_eq!("fs".parse::<FileStoreTarget>().unwrap(), FileStoreTarget::Fs);
        assert_eq!("s3".parse::<FileStoreTarget>().unwrap(), FileStoreTarget::S3);
        assert!("bogus".parse::<FileStoreTarget>().is_err());
    }

    #[test]
    fn default_s3_settings_fail_validation() {
        let s3 = S3Settings::default();
        assert!(s3.validate("test").is_err());
    }

    #[test]
    fn fully_populated_s3_settings_validate() {
        let s3 = S3Settings {
            bucket: "my-bucket".into(),
            endpoint_url: "https://s3.example.com".into(),
            access_key_id: "AKIA".into(),
            access_secret: "secret".into(),
            region: "us-east-1".into(),
        };
        assert!(s3.validate("test").is_ok());
    }

    #[test]
    fn redacted_settings_hide_s3_secrets() {
        // SAFETY (test-only): exercising from_env's defaulting behavior,
        // no shared mutable state beyond the process environment.
        unsafe {
            std::env::set_var("DOC_DB_URL", "postgres://localhost/test");
        }
        let settings = Settings::from_env().unwrap();
        let dumped = settings.redacted();
        assert_eq!(dumped["input_s3"]["access_secret"], "***");
    }
}
