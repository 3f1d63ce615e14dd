//! The scheduler: a thin wrapper around `Database::get_runnable_steps` plus
//! the process-local `tokio::sync::Mutex` that serialises "select runnable +
//! attempt lease" within one worker pool (SPEC_FULL.md §4.4, §5).

use docflow_core::{Error, Result, RunStatus};
use docflow_storage::models::RunStepRow;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::engine::Engine;

/// Owns no state beyond the lease-serialising lock; the authoritative
/// runnable-step selection and the at-most-one-owner guarantee both live in
/// `Database` under a `FOR UPDATE` row lock. The mutex here only reduces
/// wasted contention when several local tasks wake at once and would
/// otherwise all select the same top candidate and race to lease it.
pub struct Scheduler {
    lease_lock: Mutex<()>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { lease_lock: Mutex::new(()) }
    }

    /// Selects up to `top` runnable steps and attempts to lease the first
    /// one a concurrent caller hasn't already taken. Returns `None` when
    /// nothing is runnable right now.
    pub async fn lease_next(
        &self,
        engine: &Engine,
        worker_id: Uuid,
        batch_id: Option<i64>,
        top: i64,
    ) -> Result<Option<RunStepRow>> {
        let _guard = self.lease_lock.lock().await;

        let candidates = engine.db().get_runnable_steps(top, batch_id).await?;
        for candidate in candidates {
            match engine
                .db()
                .set_step_status(candidate.id, RunStatus::Running, Some(worker_id), true, None)
                .await
            {
                Ok(leased) => return Ok(Some(leased)),
                // Another worker leased it between our SELECT and our lease attempt.
                Err(Error::InvalidState(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}
