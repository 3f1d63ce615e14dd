//! Shared domain types for the document-ingestion workflow engine: the
//! artifact/step-type/status enumerations, the error taxonomy, and process
//! settings. `docflow-storage`, `docflow-engine`, `docflow-api`, and
//! `docflow-cli` all depend on this crate; it depends on none of them.

pub mod error;
pub mod settings;
pub mod types;

pub use error::{Error, Result};
pub use settings::{FileStoreTarget, S3Settings, Settings};
pub use types::{
    artifacts_from_steps, ArtifactType, LifecycleEvent, ParamSetSource, RunStatus,
    WorkflowStepType,
};
