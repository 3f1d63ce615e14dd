//! The worker pool (SPEC_FULL.md §4.5): one process-local checkin loop, poll
//! loop, and reaper loop, coordinated through a `tokio::sync::watch`
//! shutdown channel and a bounded `Semaphore` of `worker_task_count` permits.
//! Leasing itself goes through `Scheduler::lease_next`, which already holds
//! the process-local mutex and the `set_step_status` atomic transition.

use std::sync::Arc;
use std::time::Duration;

use docflow_core::{Result, RunStatus};
use docflow_storage::models::RunStepRow;
use rand::Rng;
use serde_json::json;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::handler::StepContext;
use crate::lifecycle;
use crate::scheduler::Scheduler;

/// Handle to a running worker pool. Dropping it does not stop the pool —
/// call [`WorkerHandle::shutdown`] for a graceful stop, mirroring the
/// explicit `close()`/`shutdown()` shape SPEC_FULL.md §9 asks for instead of
/// relying on `Drop`.
pub struct WorkerHandle {
    worker_id: Uuid,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Signals every loop to stop taking new work, then waits (up to
    /// `timeout`) for in-flight lease-and-run tasks to finish committing
    /// their final state.
    pub async fn shutdown(mut self, timeout: Duration) {
        let _ = self.shutdown_tx.send(true);
        let deadline = tokio::time::Instant::now() + timeout;
        for task in self.tasks.drain(..) {
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "worker task panicked during shutdown"),
                Err(_) => warn!("worker shutdown timed out waiting for an in-flight task"),
            }
        }
    }
}

/// Spawns the checkin, poll, and reaper loops for one worker process and
/// returns a handle to coordinate shutdown. `top` is always 1 in the poll
/// loop (SPEC_FULL.md §4.5: "acquires a permit and spawns one lease-and-run
/// task").
pub fn spawn(engine: Arc<Engine>, batch_id: Option<i64>) -> WorkerHandle {
    let worker_id = Uuid::now_v7();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(Scheduler::new());
    let permits = Arc::new(Semaphore::new(engine.settings().worker_task_count));

    info!(%worker_id, "worker starting");

    let checkin_task = tokio::spawn(checkin_loop(engine.clone(), worker_id, shutdown_rx.clone()));
    let reaper_task = tokio::spawn(reaper_loop(engine.clone(), shutdown_rx.clone()));
    let poll_task = tokio::spawn(poll_loop(engine, scheduler, permits, worker_id, batch_id, shutdown_rx));

    WorkerHandle {
        worker_id,
        shutdown_tx,
        tasks: vec![checkin_task, reaper_task, poll_task],
    }
}

/// Writes a fresh `WorkerCheckin` row every `worker_checkin_interval_secs`,
/// so the reaper can tell this process apart from a dead one.
async fn checkin_loop(engine: Arc<Engine>, worker_id: Uuid, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(engine.settings().worker_checkin_interval_secs.max(1));
    loop {
        if let Err(e) = engine.db().worker_checkin(worker_id).await {
            warn!(%worker_id, error = %e, "worker checkin failed");
        } else {
            debug!(%worker_id, "worker checked in");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Wakes every `worker_checkin_timeout_secs` (plus a little jitter so many
/// processes don't all sweep in lockstep) and resurrects steps owned by
/// workers that stopped checking in.
async fn reaper_loop(engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) {
    let timeout_secs = engine.settings().worker_checkin_timeout_secs.max(1);
    loop {
        let jitter_secs = rand::thread_rng().gen_range(0..=(timeout_secs / 10).max(1));
        let wait = Duration::from_secs(timeout_secs + jitter_secs);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }

        match engine.db().find_dead_workers(timeout_secs as i64).await {
            Ok(dead) => {
                for checkin in dead {
                    match engine.db().reap_worker(checkin.worker_id).await {
                        Ok(reclaimed) => {
                            if reclaimed > 0 {
                                info!(worker_id = %checkin.worker_id, reclaimed, "reaped dead worker");
                            }
                        }
                        Err(e) => error!(worker_id = %checkin.worker_id, error = %e, "failed to reap dead worker"),
                    }
                }
            }
            Err(e) => error!(error = %e, "failed to list dead workers"),
        }
    }
}

/// Whenever a permit is free, acquires it and spawns one lease-and-run task.
/// Stops acquiring new permits once `shutdown` fires; in-flight tasks keep
/// their permit until they finish.
async fn poll_loop(
    engine: Arc<Engine>,
    scheduler: Arc<Scheduler>,
    permits: Arc<Semaphore>,
    worker_id: Uuid,
    batch_id: Option<i64>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let permit = tokio::select! {
            acquired = permits.clone().acquire_owned() => acquired.expect("semaphore never closed"),
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        };

        let leased = scheduler.lease_next(&engine, worker_id, batch_id, 1).await;
        match leased {
            Ok(Some(step)) => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run_step(&engine, worker_id, step).await;
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            Err(e) => {
                drop(permit);
                warn!(%worker_id, error = %e, "lease attempt failed");
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
    }
}

/// Loads the context a step needs, fires the pre-execution lifecycle
/// events, runs its handler, and fires the post-execution ones. Every error
/// here becomes a step ERROR rather than propagating — handler exceptions
/// "do not crash the worker" (SPEC_FULL.md §7).
#[tracing::instrument(skip(engine), fields(step_id = %step.id, worker_id = %worker_id))]
async fn run_step(engine: &Arc<Engine>, worker_id: Uuid, step: RunStepRow) {
    let ctx = match build_context(engine, &step).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "failed to build step context; leaving step RUNNING for the reaper");
            return;
        }
    };

    if let Err(e) = fire_start_events(engine, &ctx).await {
        warn!(error = %e, "failed to dispatch start-of-step lifecycle events");
    }

    let handler_name = ctx.workflow_def.step(ctx.run_step.step_type).map(|spec| spec.handler.as_str()).unwrap_or_default();
    let handler = engine.handlers().get(handler_name);

    let outcome = match handler {
        Some(handler) => handler.handle(&ctx).await,
        None => Err(crate::handler::HandlerError::MissingParameter(format!(
            "no handler registered for step type {}",
            ctx.run_step.step_type
        ))),
    };

    match outcome {
        Ok(()) => {
            if let Err(e) = complete_step(engine, &ctx, worker_id).await {
                error!(error = %e, "failed to record step completion");
            }
        }
        Err(e) => {
            warn!(error = %e, "handler returned an error; recording step ERROR");
            let message = e.to_string();
            if let Err(e) = engine
                .db()
                .set_step_status(step.id, RunStatus::Error, Some(worker_id), false, Some(&json!({ "error": message })))
                .await
            {
                error!(error = %e, "failed to record step ERROR");
            }
        }
    }
}

/// Assembles the `StepContext` a handler needs: the run, its workflow
/// definition, its step config, its run group, and the batch's `source`
/// (absent for runs not tied to a batch).
async fn build_context(engine: &Arc<Engine>, step: &RunStepRow) -> Result<StepContext> {
    let workflow_run = engine.db().get_workflow_run(step.workflow_run_id).await?;
    let run_group = engine.db().get_run_group(workflow_run.run_group_id).await?;
    let workflow_def = engine.config().get_workflow(&run_group.workflow_definition_id).await?;
    let step_config = engine.db().get_step_config(step.step_config_id).await?;

    let source = match engine.db().get_batch(workflow_run.batch_id).await? {
        Some(batch) => Some(batch.source),
        None => None,
    };

    let default_params = workflow_def
        .step(step.step_type)
        .map(|spec| spec.default_params.clone())
        .unwrap_or(serde_json::Value::Null);

    Ok(StepContext::new(
        step.clone(),
        workflow_run.clone(),
        workflow_def,
        step_config,
        run_group,
        Some(workflow_run.batch_id),
        source,
        workflow_run.doc_id.clone(),
        workflow_run.run_params.clone(),
        default_params,
        engine.clone(),
    ))
}

async fn fire_start_events(engine: &Engine, ctx: &StepContext) -> Result<()> {
    let is_first_step = ctx.run_step.workflow_step_number == 1;
    let step_counts = engine.db().get_run_group_step_counts(ctx.run_group.id).await?;
    let events = lifecycle::events_for_transition(
        RunStatus::Running,
        is_first_step,
        ctx.run_step.is_last_step,
        Default::default(),
        step_counts,
    );
    for event in events {
        lifecycle::dispatch(engine, ctx, event).await?;
    }
    Ok(())
}

async fn complete_step(engine: &Engine, ctx: &StepContext, worker_id: Uuid) -> Result<()> {
    engine
        .db()
        .set_step_status(ctx.run_step.id, RunStatus::Completed, Some(worker_id), false, None)
        .await?;

    let run_counts = engine.db().get_run_group_counts(ctx.run_group.id).await?;
    let events = lifecycle::events_for_transition(
        RunStatus::Completed,
        ctx.run_step.workflow_step_number == 1,
        ctx.run_step.is_last_step,
        run_counts,
        Default::default(),
    );
    for event in events {
        lifecycle::dispatch(engine, ctx, event).await?;
    }
    Ok(())
}
