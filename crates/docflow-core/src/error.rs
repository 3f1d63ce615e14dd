//! The domain error taxonomy shared by every crate in the workspace.
//!
//! `docflow-storage` and `docflow-engine` return `Error` directly; `docflow-api`
//! maps it onto HTTP status codes (see its `common` module); `docflow-cli`
//! prints it and maps it onto a process exit code.

use thiserror::Error;

/// Result type alias used throughout the engine and storage layers.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in the ingestion workflow engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A document, URI, batch, run, run-group, step, step-config, workflow-def,
    /// param-set, or artifact key was looked up and does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint the caller should have respected was violated
    /// (duplicate workflow-definition id, duplicate param-set id on upload).
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// An illegal step-status transition, or a worker tried to mutate a step
    /// it does not own.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed input: bad YAML, bad JSON metadata, unknown URI scheme,
    /// unknown storage target, artifact/step-type mismatch, bad pagination.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A downstream system (storage backend, embedding service, RAG service,
    /// parsing service) failed.
    #[error("external failure: {0}")]
    ExternalFailure(String),

    /// Ingest was attempted against a batch that has already been completed.
    #[error("batch already completed: {0}")]
    BatchCompleted(String),

    /// A handler rejected its input document as invalid.
    #[error("document invalid: {0}")]
    DocumentInvalid(String),

    /// Caller attempted an operation it is not permitted to perform (e.g.
    /// deleting a built-in param-set).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Anything that doesn't fit the taxonomy above (I/O, serialization,
    /// lower-level library errors wrapped with context).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Error::Duplicate(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Error::ExternalFailure(msg.into())
    }

    pub fn batch_completed(msg: impl Into<String>) -> Self {
        Error::BatchCompleted(msg.into())
    }

    pub fn document_invalid(msg: impl Into<String>) -> Self {
        Error::DocumentInvalid(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Error::Forbidden(msg.into())
    }
}

