//! The lifecycle dispatcher: computes the six `LifecycleEvent` conditions
//! around a step transition and fires each event's handler list (SPEC_FULL.md
//! §4.8).

use docflow_core::{LifecycleEvent, Result, RunStatus};
use docflow_storage::RunGroupCounts;
use serde_json::json;
use tracing::warn;

use crate::engine::Engine;
use crate::handler::StepContext;

/// Computes which of the six events fired around this step's transition into
/// `new_status`, given the run-group's aggregate run counters and the run's
/// own step counters (both read *after* the transition and its rollup).
pub fn events_for_transition(
    new_status: RunStatus,
    is_first_step: bool,
    is_last_step: bool,
    run_counts: RunGroupCounts,
    step_counts: RunGroupCounts,
) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();

    if new_status == RunStatus::Running {
        events.push(LifecycleEvent::StepStart);
        if is_first_step {
            events.push(LifecycleEvent::ItemStart);
            let exactly_one_running_step =
                step_counts.running == 1 && step_counts.completed == 0 && step_counts.failed == 0 && step_counts.error == 0;
            if exactly_one_running_step {
                events.push(LifecycleEvent::GroupStart);
            }
        }
    } else if new_status == RunStatus::Completed {
        events.push(LifecycleEvent::StepEnd);
        if is_last_step {
            events.push(LifecycleEvent::ItemEnd);
            let group_drained = run_counts.running == 0 && run_counts.pending == 0 && run_counts.error == 0;
            if group_drained {
                events.push(LifecycleEvent::GroupEnd);
            }
        }
    } else if new_status == RunStatus::Failed {
        events.push(LifecycleEvent::StepFailed);
        events.push(LifecycleEvent::ItemFailed);
    }

    events
}

/// Fires every handler registered for `event` in `ctx.workflow_def`,
/// sequentially, recording one `LifecycleHistory` row per handler. A
/// handler failure is logged and recorded as a FAILED row; it never
/// propagates to the caller, matching SPEC_FULL.md §4.8 ("do not poison the
/// main step outcome") and keeping each handler's own outcome independent of
/// its neighbours'.
pub async fn dispatch(engine: &Engine, ctx: &StepContext, event: LifecycleEvent) -> Result<()> {
    let handler_names = ctx.workflow_def.handlers_for(event).to_vec();
    for name in handler_names {
        let outcome = match engine.handlers().get(&name) {
            Some(handler) => handler.handle(ctx).await.map_err(|e| e.to_string()),
            None => Err(format!("no handler registered under name {name:?}")),
        };

        let status = if outcome.is_ok() { RunStatus::Completed } else { RunStatus::Failed };
        let status_meta = match &outcome {
            Ok(()) => json!({ "handler": name }),
            Err(message) => json!({ "handler": name, "error": message }),
        };

        if let Err(e) = &outcome {
            warn!(event = %event, handler = %name, error = %e, "lifecycle handler failed");
        }

        let row = engine
            .db()
            .create_lifecycle_history(ctx.run_group.id, ctx.workflow_run.id, Some(ctx.run_step.id), event, status, &status_meta)
            .await?;
        engine.db().close_lifecycle_history(row.id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pending: i64, running: i64, completed: i64, error: i64, failed: i64) -> RunGroupCounts {
        RunGroupCounts { pending, running, completed, error, failed }
    }

    #[test]
    fn first_step_starting_fires_item_and_group_start() {
        let events = events_for_transition(RunStatus::Running, true, false, counts(0, 1, 0, 0, 0), counts(0, 1, 0, 0, 0));
        assert_eq!(
            events,
            vec![LifecycleEvent::StepStart, LifecycleEvent::ItemStart, LifecycleEvent::GroupStart]
        );
    }

    #[test]
    fn middle_step_starting_fires_only_step_start() {
        let events = events_for_transition(RunStatus::Running, false, false, counts(0, 2, 0, 0, 0), counts(0, 2, 0, 0, 0));
        assert_eq!(events, vec![LifecycleEvent::StepStart]);
    }

    #[test]
    fn group_start_does_not_fire_when_a_second_run_is_already_mid_flight() {
        let events = events_for_transition(RunStatus::Running, true, false, counts(0, 2, 0, 0, 0), counts(0, 1, 0, 0, 0));
        assert_eq!(events, vec![LifecycleEvent::StepStart, LifecycleEvent::ItemStart]);
    }

    #[test]
    fn last_step_completing_fires_item_and_group_end_when_group_drained() {
        let events = events_for_transition(RunStatus::Completed, false, true, counts(0, 0, 3, 0, 0), counts(0, 0, 1, 0, 0));
        assert_eq!(events, vec![LifecycleEvent::StepEnd, LifecycleEvent::ItemEnd, LifecycleEvent::GroupEnd]);
    }

    #[test]
    fn last_step_completing_does_not_drain_group_while_siblings_are_still_running() {
        let events = events_for_transition(RunStatus::Completed, false, true, counts(0, 1, 2, 0, 0), counts(0, 0, 1, 0, 0));
        assert_eq!(events, vec![LifecycleEvent::StepEnd, LifecycleEvent::ItemEnd]);
    }

    #[test]
    fn failed_step_fires_step_and_item_failed() {
        let events = events_for_transition(RunStatus::Failed, false, false, counts(0, 0, 0, 0, 1), counts(0, 0, 0, 0, 1));
        assert_eq!(events, vec![LifecycleEvent::StepFailed, LifecycleEvent::ItemFailed]);
    }
}
