//! Builds `RunGroup`/`WorkflowRun`/`RunStep` rows from a workflow definition
//! and a parameter-set (SPEC_FULL.md §4.3), using the config deduplicator to
//! resolve each step's `StepConfig` id.

use std::collections::HashSet;

use docflow_core::{Error, Result};
use docflow_storage::models::{RunGroupRow, WorkflowRunRow};
use serde_json::Value;

use crate::config::dedup::step_config_ids;
use crate::engine::Engine;

/// Creates the `RunGroup` row that every `WorkflowRun` produced from the
/// same (workflow, param-set, batch) triple will be attached to.
pub async fn create_run_group(
    engine: &Engine,
    workflow_definition_id: &str,
    param_definition_id: &str,
    batch_id: i64,
    name: Option<&str>,
) -> Result<RunGroupRow> {
    if engine.db().is_batch_completed(batch_id).await? {
        return Err(Error::batch_completed(format!("batch {batch_id}")));
    }
    engine
        .db()
        .create_run_group(workflow_definition_id, param_definition_id, batch_id, name)
        .await
}

/// Creates one `WorkflowRun` (and its ordered `RunStep`s) for a single
/// document against a run group's workflow/param-set.
pub async fn create_workflow_run(
    engine: &Engine,
    run_group: &RunGroupRow,
    doc_hash: &str,
    priority: i32,
    run_params: &Value,
) -> Result<WorkflowRunRow> {
    let workflow = engine.config().get_workflow(&run_group.workflow_definition_id).await?;
    let param_set = engine.config().get_param_set(&run_group.param_definition_id).await?;
    let config_ids = step_config_ids(engine.db(), &workflow, &param_set).await?;

    let last_index = workflow.item_steps.len().saturating_sub(1);
    let mut steps = Vec::with_capacity(workflow.item_steps.len());
    for (index, spec) in workflow.item_steps.iter().enumerate() {
        let step_config_id = *config_ids
            .get(&spec.step_type)
            .ok_or_else(|| Error::invalid_input(format!("no step config resolved for {}", spec.step_type)))?;
        steps.push((
            (index + 1) as i32,
            spec.handler.clone(),
            step_config_id,
            spec.step_type,
            index == last_index,
            spec.retries,
        ));
    }

    engine
        .db()
        .create_workflow_run(
            run_group.id,
            &run_group.workflow_definition_id,
            run_group.batch_id,
            doc_hash,
            priority,
            run_params,
            &steps,
        )
        .await
}

/// Fans a run group out across every distinct document already attached to
/// its batch, skipping any hash more than one `DocumentUri` happens to
/// reference twice.
pub async fn create_workflow_runs_for_batch(
    engine: &Engine,
    run_group: &RunGroupRow,
    priority: i32,
) -> Result<Vec<WorkflowRunRow>> {
    let uris = engine.db().get_documents_in_batch(run_group.batch_id).await?;
    let mut seen = HashSet::new();
    let mut runs = Vec::new();
    for uri in uris {
        if !seen.insert(uri.doc_hash.clone()) {
            continue;
        }
        let run = create_workflow_run(engine, run_group, &uri.doc_hash, priority, &Value::Object(Default::default()))
            .await?;
        runs.push(run);
    }
    Ok(runs)
}
