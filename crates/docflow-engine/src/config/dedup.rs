//! The config-sharing algorithm (SPEC_FULL.md §4.2): turns a parameter-set
//! into a per-step-type set of persistent `StepConfig` rows, sharing rows
//! across parameter-sets whose cumulative prefix is identical.

use std::collections::{BTreeMap, HashMap};

use docflow_core::{Error, Result, WorkflowStepType};
use docflow_storage::Database;
use serde_json::Value;

use super::model::{ParamSet, WorkflowDefinition};

/// Recursively re-serialises a `Value` through a `BTreeMap` so object keys
/// come out lexicographically sorted. `serde_json::Value::Object` is
/// backed by a map whose iteration order depends on feature flags
/// (insertion order unless `preserve_order` is off); routing through
/// `BTreeMap` makes the canonical form deterministic regardless.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            serde_json::to_value(sorted).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Computes `step_config_ids(param_set) -> {step_type: step_config_id}`.
///
/// Looks up an existing `ConfigSet` by exact canonical-text match first
/// (step 1-2 of SPEC_FULL.md §4.2); only on a miss does it walk the
/// workflow's steps in order, growing the cumulative config and
/// find-or-inserting a `StepConfig` row per step (step 3), which is exactly
/// what `Database::create_config_set` does transactionally.
pub async fn step_config_ids(
    db: &Database,
    workflow: &WorkflowDefinition,
    param_set: &ParamSet,
) -> Result<HashMap<WorkflowStepType, uuid::Uuid>> {
    let yaml_contents = param_set.canonical_text()?;

    if let Some(existing) = db.find_config_set_by_text(&param_set.id, &yaml_contents).await? {
        let items = db.config_set_items(existing.id).await?;
        return Ok(items.into_iter().map(|sc| (sc.step_type, sc.id)).collect());
    }

    let mut cumulative: BTreeMap<WorkflowStepType, Value> = BTreeMap::new();
    let mut ordered_steps = Vec::with_capacity(workflow.item_steps.len());
    for spec in &workflow.item_steps {
        let config = param_set.config_for(spec.step_type);
        cumulative.insert(spec.step_type, config.clone());
        let cuml_value = serde_json::to_value(&cumulative).map_err(|e| Error::invalid_input(e.to_string()))?;
        let cuml_config_json = canonicalize(&cuml_value);
        ordered_steps.push((spec.step_type, config, cuml_config_json));
    }

    let config_set_id = db.create_config_set(&param_set.id, &yaml_contents, &ordered_steps).await?;
    let items = db.config_set_items(config_set_id).await?;
    Ok(items.into_iter().map(|sc| (sc.step_type, sc.id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalize_sorts_object_keys() {
        let value = json!({"b": 1, "a": 2});
        let canon = canonicalize(&value);
        let rendered = serde_json::to_string(&canon).unwrap();
        assert_eq!(rendered, r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonicalize_recurses_into_nested_objects() {
        let value = json!({"outer": {"z": 1, "a": 2}});
        let canon = canonicalize(&value);
        assert_eq!(serde_json::to_string(&canon).unwrap(), r#"{"outer":{"a":2,"z":1}}"#);
    }

    #[test]
    fn canonicalize_leaves_arrays_in_place_but_canonicalizes_elements() {
        let value = json!([{"b": 1, "a": 2}, 3]);
        let canon = canonicalize(&value);
        assert_eq!(serde_json::to_string(&canon).unwrap(), r#"[{"a":2,"b":1},3]"#);
    }
}
