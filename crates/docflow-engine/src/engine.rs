//! `Engine` is the one fallible constructor for this crate (SPEC_FULL.md §9):
//! it owns the database pool, the loaded configuration, the handler
//! registry, and the shared HTTP client, and is handed around the rest of
//! the workspace as an `Arc<Engine>` rather than reached for through a
//! lazily-initialized global.

use std::sync::Arc;
use std::time::Duration;

use docflow_core::{artifacts_from_steps, ArtifactType, Error, FileStoreTarget, Result, Settings, WorkflowStepType};
use docflow_storage::{AwsS3Client, Database, ObjectStoreClient, StorageOperator};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::ConfigRegistry;
use crate::handler::HandlerRegistry;
use crate::rag::{LocalLanceDbClient, RagClient};

pub struct Engine {
    db: Database,
    settings: Arc<Settings>,
    config: Arc<ConfigRegistry>,
    handlers: Arc<HandlerRegistry>,
    http: reqwest::Client,
    docling_permits: Arc<Semaphore>,
    object_store: Option<Arc<dyn ObjectStoreClient>>,
    input_store: Arc<dyn ObjectStoreClient>,
    rag_client: Arc<dyn RagClient>,
}

impl Engine {
    /// Connects to Postgres, loads the workflow/param-set directories, and
    /// wires up the built-in handler registry. Everything downstream
    /// (worker pool, HTTP API, CLI) shares one `Arc<Engine>`.
    pub async fn connect(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let db = Database::from_url(&settings.doc_db_url).await?;
        let config = ConfigRegistry::load(&settings.workflow_dir, &settings.param_dir).await?;
        let handlers = HandlerRegistry::with_builtins();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.docling_http_timeout_secs))
            .build()
            .map_err(|e| Error::external(format!("building http client: {e}")))?;

        let target: FileStoreTarget = settings.file_store_target.parse()?;
        let object_store: Option<Arc<dyn ObjectStoreClient>> = match target {
            FileStoreTarget::S3 => Some(Arc::new(AwsS3Client::new(&settings.artifact_s3))),
            FileStoreTarget::Db | FileStoreTarget::Fs => None,
        };

        let docling_permits = Arc::new(Semaphore::new(settings.docling_concurrency.max(1)));
        let input_store: Arc<dyn ObjectStoreClient> = Arc::new(AwsS3Client::new(&settings.input_s3));
        let rag_client: Arc<dyn RagClient> = Arc::new(LocalLanceDbClient::new(&settings.lancedb_dir));

        Ok(Self {
            db,
            settings: Arc::new(settings),
            config: Arc::new(config),
            handlers: Arc::new(handlers),
            http,
            docling_permits,
            object_store,
            input_store,
            rag_client,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config(&self) -> &ConfigRegistry {
        &self.config
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn docling_permits(&self) -> &Semaphore {
        &self.docling_permits
    }

    /// Resolves the configured backend for one artifact kind, rooted under
    /// the step-config that produced it. Per SPEC_FULL.md §3 invariant 5 and
    /// §4.1's selection rule: `DOC` artifacts need no step-config and root at
    /// the empty string; every other artifact type roots at
    /// `str(step_config.id)` so two StepConfigs of the same step type never
    /// share a write key-space (Testable Property 10). `step_config` is the
    /// `(id, step_type)` of the `StepConfig` the caller resolved this
    /// artifact against; passing `None` for a non-`DOC` artifact type is a
    /// caller error.
    pub fn storage_for(
        &self,
        artifact_type: ArtifactType,
        step_config: Option<(Uuid, WorkflowStepType)>,
    ) -> Result<Arc<dyn StorageOperator>> {
        let config_root = match artifact_type {
            ArtifactType::Doc => String::new(),
            _ => {
                let (step_config_id, step_type) = step_config.ok_or_else(|| {
                    Error::invalid_input(format!("step_config required to resolve storage for {artifact_type}"))
                })?;
                let produces = artifacts_from_steps();
                let produces_this = produces.get(&step_type).map(|types| types.contains(&artifact_type)).unwrap_or(false);
                if !produces_this {
                    return Err(Error::invalid_input(format!(
                        "step type {step_type} does not produce artifact type {artifact_type}"
                    )));
                }
                step_config_id.to_string()
            }
        };

        let subdir = self.storage_subdir_for(artifact_type);
        let storage_root = if config_root.is_empty() { subdir.to_string() } else { format!("{subdir}/{config_root}") };

        docflow_storage::get_storage_operator(
            &self.settings,
            &self.db,
            &storage_root,
            artifact_type.as_str(),
            self.object_store.clone(),
        )
    }

    /// Fetches bytes referenced by `input_uri` on document ingestion
    /// (`s3://` scheme; `file://` is handled directly by the caller against
    /// the local filesystem). Independent of `artifact_s3` / the configured
    /// artifact storage target — inputs always arrive over `input_s3`.
    pub fn input_store(&self) -> &Arc<dyn ObjectStoreClient> {
        &self.input_store
    }

    /// The import/delete/list boundary over the vector store (SPEC_FULL.md
    /// §1, §4.7, §6). Handlers and the document-delete cascade call through
    /// this rather than touching a vector-store client directly.
    pub fn rag_client(&self) -> &Arc<dyn RagClient> {
        &self.rag_client
    }

    /// The per-artifact-type subdirectory/table-partition name (§6
    /// Configuration), underneath which [`storage_for`](Self::storage_for)
    /// further nests by step-config id.
    fn storage_subdir_for(&self, artifact_type: ArtifactType) -> &str {
        match artifact_type {
            ArtifactType::Doc => &self.settings.document_store_dir,
            ArtifactType::ParsedMd => &self.settings.parsed_markdown_store_dir,
            ArtifactType::ParsedJson => &self.settings.parsed_json_store_dir,
            ArtifactType::Chunks => &self.settings.chunks_store_dir,
            ArtifactType::Embeddings => &self.settings.embeddings_store_dir,
            ArtifactType::Rag => &self.settings.lancedb_dir,
        }
    }
}
