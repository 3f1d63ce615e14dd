//! Enumerations shared by every crate that touches the run model.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// The byte-addressed artifact kinds a step can read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Doc,
    ParsedMd,
    ParsedJson,
    Chunks,
    Embeddings,
    Rag,
}

impl ArtifactType {
    /// The `(artifact_type, storage_root)` value stored in `DocumentBytes` /
    /// used as a filesystem subdirectory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Doc => "document",
            ArtifactType::ParsedMd => "parsed_markdown",
            ArtifactType::ParsedJson => "parsed_json",
            ArtifactType::Chunks => "chunks",
            ArtifactType::Embeddings => "embeddings",
            ArtifactType::Rag => "rag",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(ArtifactType::Doc),
            "parsed_markdown" => Ok(ArtifactType::ParsedMd),
            "parsed_json" => Ok(ArtifactType::ParsedJson),
            "chunks" => Ok(ArtifactType::Chunks),
            "embeddings" => Ok(ArtifactType::Embeddings),
            "rag" => Ok(ArtifactType::Rag),
            other => Err(crate::Error::invalid_input(format!(
                "unknown artifact type: {other}"
            ))),
        }
    }
}

/// The typed pipeline stages a workflow definition can declare, in the order
/// the reference pipeline uses them (validate → parse → chunk → embed →
/// store); `ingest`, `enrich`, and `route` exist for custom pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStepType {
    Ingest,
    Validate,
    Parse,
    Chunk,
    Embed,
    Store,
    Enrich,
    Route,
}

impl WorkflowStepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStepType::Ingest => "ingest",
            WorkflowStepType::Validate => "validate",
            WorkflowStepType::Parse => "parse",
            WorkflowStepType::Chunk => "chunk",
            WorkflowStepType::Embed => "embed",
            WorkflowStepType::Store => "store",
            WorkflowStepType::Enrich => "enrich",
            WorkflowStepType::Route => "route",
        }
    }

    /// The artifact kinds this step type produces, per `ARTIFACTS_FROM_STEPS`.
    /// `validate`/`enrich`/`route` annotate `doc_meta` or control flow rather
    /// than producing artifacts of their own.
    pub fn produces(&self) -> &'static [ArtifactType] {
        match self {
            WorkflowStepType::Ingest => &[ArtifactType::Doc],
            WorkflowStepType::Parse => &[ArtifactType::ParsedMd, ArtifactType::ParsedJson],
            WorkflowStepType::Chunk => &[ArtifactType::Chunks],
            WorkflowStepType::Embed => &[ArtifactType::Embeddings],
            WorkflowStepType::Store => &[ArtifactType::Rag],
            WorkflowStepType::Validate | WorkflowStepType::Enrich | WorkflowStepType::Route => &[],
        }
    }
}

impl fmt::Display for WorkflowStepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStepType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(WorkflowStepType::Ingest),
            "validate" => Ok(WorkflowStepType::Validate),
            "parse" => Ok(WorkflowStepType::Parse),
            "chunk" => Ok(WorkflowStepType::Chunk),
            "embed" => Ok(WorkflowStepType::Embed),
            "store" => Ok(WorkflowStepType::Store),
            "enrich" => Ok(WorkflowStepType::Enrich),
            "route" => Ok(WorkflowStepType::Route),
            other => Err(crate::Error::invalid_input(format!(
                "unknown workflow step type: {other}"
            ))),
        }
    }
}

/// Which artifact type the given step type is expected to emit, returning a
/// `Vec` copy of the `produces()` slice for call sites that want ownership
/// (the `ARTIFACTS_FROM_STEPS` mapping from the original schema).
pub fn artifacts_from_steps() -> HashMap<WorkflowStepType, Vec<ArtifactType>> {
    [
        WorkflowStepType::Ingest,
        WorkflowStepType::Validate,
        WorkflowStepType::Parse,
        WorkflowStepType::Chunk,
        WorkflowStepType::Embed,
        WorkflowStepType::Store,
        WorkflowStepType::Enrich,
        WorkflowStepType::Route,
    ]
    .into_iter()
    .map(|st| (st, st.produces().to_vec()))
    .collect()
}

/// Status shared by `RunStep`, `WorkflowRun`, and (derived) `RunGroup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Error,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Error => "ERROR",
            RunStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// The six lifecycle events the dispatcher may fire around a step transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    GroupStart,
    GroupEnd,
    ItemStart,
    ItemEnd,
    ItemFailed,
    StepStart,
    StepEnd,
    StepFailed,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleEvent::GroupStart => "group_start",
            LifecycleEvent::GroupEnd => "group_end",
            LifecycleEvent::ItemStart => "item_start",
            LifecycleEvent::ItemEnd => "item_end",
            LifecycleEvent::ItemFailed => "item_failed",
            LifecycleEvent::StepStart => "step_start",
            LifecycleEvent::StepEnd => "step_end",
            LifecycleEvent::StepFailed => "step_failed",
        };
        f.write_str(s)
    }
}

/// Source of a parameter-set definition: built into the deployment, or
/// uploaded by a user at runtime. Only `User` param-sets may be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParamSetSource {
    App,
    User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_type_round_trips_through_str() {
        for at in [
            ArtifactType::Doc,
            ArtifactType::ParsedMd,
            ArtifactType::ParsedJson,
            ArtifactType::Chunks,
            ArtifactType::Embeddings,
            ArtifactType::Rag,
        ] {
            assert_eq!(at.as_str().parse::<ArtifactType>().unwrap(), at);
        }
    }

    #[test]
    fn step_type_round_trips_through_str() {
        for st in [
            WorkflowStepType::Ingest,
            WorkflowStepType::Validate,
            WorkflowStepType::Parse,
            WorkflowStepType::Chunk,
            WorkflowStepType::Embed,
            WorkflowStepType::Store,
            WorkflowStepType::Enrich,
            WorkflowStepType::Route,
        ] {
            assert_eq!(st.as_str().parse::<WorkflowStepType>().unwrap(), st);
        }
    }

    #[test]
    fn unknown_artifact_type_is_invalid_input() {
        let err = "bogus".parse::<ArtifactType>().unwrap_err();
        assert!(matches!(err, crate::Error::InvalidInput(_)));
    }

    #[test]
    fn parse_produces_two_artifacts() {
        assert_eq!(
            WorkflowStepType::Parse.produces(),
            &[ArtifactType::ParsedMd, ArtifactType::ParsedJson]
        );
    }

    #[test]
    fn validate_produces_nothing() {
        assert!(WorkflowStepType::Validate.produces().is_empty());
    }
}
