//! `StepContext`: the single typed argument every handler receives
//! (SPEC_FULL.md §4.7), replacing the originating system's introspection of
//! handler parameter names.

use std::sync::Arc;

use docflow_core::{ArtifactType, Result, Settings};
use docflow_storage::{Database, StorageOperator};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::config::WorkflowDefinition;
use crate::engine::Engine;
use crate::rag::RagClient;
use docflow_storage::models::{RunGroupRow, RunStepRow, StepConfigRow, WorkflowRunRow};

/// Everything a handler could need to process one `RunStep`. The struct is
/// total: a handler that doesn't need `run_params`, say, simply never reads
/// it, rather than the dispatcher having to know in advance which fields
/// each handler wants.
pub struct StepContext {
    pub run_step: RunStepRow,
    pub workflow_run: WorkflowRunRow,
    pub workflow_def: WorkflowDefinition,
    pub step_config: StepConfigRow,
    pub run_group: RunGroupRow,
    pub batch_id: Option<i64>,
    pub source: Option<String>,
    pub doc_hash: String,
    pub run_params: Value,
    /// The handler's own declared default parameters (`StepSpec::default_params`),
    /// used as the base that `step_config.config_json` is merged on top of.
    pub default_params: Value,
    engine: Arc<Engine>,
}

impl StepContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_step: RunStepRow,
        workflow_run: WorkflowRunRow,
        workflow_def: WorkflowDefinition,
        step_config: StepConfigRow,
        run_group: RunGroupRow,
        batch_id: Option<i64>,
        source: Option<String>,
        doc_hash: String,
        run_params: Value,
        default_params: Value,
        engine: Arc<Engine>,
    ) -> Self {
        Self {
            run_step,
            workflow_run,
            workflow_def,
            step_config,
            run_group,
            batch_id,
            source,
            doc_hash,
            run_params,
            default_params,
            engine,
        }
    }

    /// The storage operator for `artifact_type`, resolved the same way for
    /// every handler (backend chosen by `Settings::file_store_target`, root
    /// scoped to this step's own `step_config` per SPEC_FULL.md §4.1).
    pub fn storage(&self, artifact_type: ArtifactType) -> Result<Arc<dyn StorageOperator>> {
        self.engine.storage_for(artifact_type, Some((self.step_config.id, self.step_config.step_type)))
    }

    pub fn db(&self) -> &Database {
        self.engine.db()
    }

    pub fn settings(&self) -> &Settings {
        self.engine.settings()
    }

    pub fn http(&self) -> &reqwest::Client {
        self.engine.http()
    }

    pub fn docling_permits(&self) -> &Semaphore {
        self.engine.docling_permits()
    }

    pub fn rag_client(&self) -> &Arc<dyn RagClient> {
        self.engine.rag_client()
    }

    /// `default_params` overlaid by `step_config.config_json`: the config
    /// set by an operator always wins over a handler's own fallback.
    pub fn params(&self) -> Value {
        merge_shallow(&self.default_params, &self.step_config.config_json)
    }

    pub fn param_str(&self, key: &str) -> Option<String> {
        self.params().get(key).and_then(|v| v.as_str()).map(str::to_string)
    }

    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.params().get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }
}

/// Shallow merge: every top-level key of `overlay` replaces the matching key
/// of `base`; keys only present in `base` pass through unchanged.
fn merge_shallow(base: &Value, overlay: &Value) -> Value {
    let (Some(base_obj), Some(overlay_obj)) = (base.as_object(), overlay.as_object()) else {
        return if overlay.is_null() { base.clone() } else { overlay.clone() };
    };
    let mut merged = base_obj.clone();
    for (k, v) in overlay_obj {
        merged.insert(k.clone(), v.clone());
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_keys_win_over_base() {
        let base = json!({"a": 1, "b": 2});
        let overlay = json!({"b": 20, "c": 3});
        assert_eq!(merge_shallow(&base, &overlay), json!({"a": 1, "b": 20, "c": 3}));
    }

    #[test]
    fn non_object_overlay_falls_back_to_base() {
        let base = json!({"a": 1});
        assert_eq!(merge_shallow(&base, &Value::Null), base);
    }
}
