//! Workflow-definition and parameter-set shapes (SPEC_FULL.md §4.2), loaded
//! one YAML file per definition from the directories named by
//! `Settings::workflow_dir` / `Settings::param_dir`.

use std::collections::BTreeMap;

use docflow_core::{Error, ParamSetSource, Result, WorkflowStepType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a workflow definition's `item_steps` list: which step type
/// this is, which handler (looked up by name in the `HandlerRegistry`) runs
/// it, how many attempts it gets, and the parameters it falls back to when
/// the step config's `config_json` doesn't set them. A `Vec` rather than a
/// map so YAML declaration order is pipeline order, with no reliance on a
/// map-ordering crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub step_type: WorkflowStepType,
    pub handler: String,
    #[serde(default = "default_retries")]
    pub retries: i32,
    #[serde(default)]
    pub default_params: Value,
}

fn default_retries() -> i32 {
    3
}

/// A workflow definition: an ordered pipeline of typed steps plus the
/// lifecycle handlers fired around group/item/step transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub meta: Value,
    pub item_steps: Vec<StepSpec>,
    #[serde(default)]
    pub lifecycle_events: BTreeMap<docflow_core::LifecycleEvent, Vec<String>>,
}

impl WorkflowDefinition {
    pub fn step(&self, step_type: WorkflowStepType) -> Option<&StepSpec> {
        self.item_steps.iter().find(|spec| spec.step_type == step_type)
    }

    pub fn handlers_for(&self, event: docflow_core::LifecycleEvent) -> &[String] {
        self.lifecycle_events.get(&event).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// A parameter-set: per-step-type configuration, shared across run groups
/// whenever its canonical text matches one already persisted (SPEC_FULL.md
/// §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSet {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub meta: Value,
    #[serde(default = "default_source")]
    pub source: ParamSetSource,
    #[serde(default)]
    pub config: BTreeMap<WorkflowStepType, Value>,
}

fn default_source() -> ParamSetSource {
    ParamSetSource::App
}

impl ParamSet {
    /// The config for `step_type`, defaulting to an empty object per
    /// SPEC_FULL.md §4.2 ("Missing step types default to an empty config").
    pub fn config_for(&self, step_type: WorkflowStepType) -> Value {
        self.config.get(&step_type).cloned().unwrap_or_else(|| Value::Object(Default::default()))
    }

    /// Canonical text form used as the ConfigSet dedup key: re-serialise
    /// through a `BTreeMap`-ordered `Value` so two semantically identical
    /// YAML documents (different key order, incidental whitespace) collapse
    /// to the same bytes. See SPEC_FULL.md §4.2 on canonicalisation.
    pub fn canonical_text(&self) -> Result<String> {
        let value = serde_json::to_value(self).map_err(|e| Error::invalid_input(e.to_string()))?;
        let canonical = crate::config::dedup::canonicalize(&value);
        serde_json::to_string(&canonical).map_err(|e| Error::invalid_input(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_step_type_defaults_to_empty_object() {
        let ps = ParamSet {
            id: "p".into(),
            name: None,
            meta: Value::Null,
            source: ParamSetSource::App,
            config: BTreeMap::new(),
        };
        assert_eq!(ps.config_for(WorkflowStepType::Chunk), Value::Object(Default::default()));
    }

    #[test]
    fn canonical_text_is_stable_across_key_order() {
        let yaml_a = "id: p\nconfig:\n  parse: {a: 1, b: 2}\n";
        let yaml_b = "id: p\nconfig:\n  parse: {b: 2, a: 1}\n";
        let a: ParamSet = serde_yaml::from_str(yaml_a).unwrap();
        let b: ParamSet = serde_yaml::from_str(yaml_b).unwrap();
        assert_eq!(a.canonical_text().unwrap(), b.canonical_text().unwrap());
    }
}
