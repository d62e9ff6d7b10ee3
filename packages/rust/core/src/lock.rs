//! Single-flight sync lock.
//!
//! The lock is the `running` run row itself: acquisition atomically inserts
//! a run record unless one is already running, so concurrent triggers from
//! any surface collapse to one active sync per database.

use tracing::info;

use docsteward_shared::{Result, RunStats, RunStatus, TriggerType};
use docsteward_storage::Storage;

/// Try to acquire the sync lock by starting a run.
///
/// Returns the new run id, or `None` when another run holds the lock.
/// Never blocks or waits.
pub async fn acquire(storage: &Storage, trigger: TriggerType) -> Result<Option<String>> {
    let run_id = storage.try_start_run(trigger).await?;
    match &run_id {
        Some(id) => info!(run_id = %id, trigger = %trigger, "sync lock acquired"),
        None => info!(trigger = %trigger, "sync already running, skipping"),
    }
    Ok(run_id)
}

/// Release the lock by recording the run's terminal state.
///
/// Must be called exactly once per acquired run, on success and failure
/// paths alike. A run left `running` by a crash holds the lock until an
/// operator clears it.
pub async fn release(
    storage: &Storage,
    run_id: &str,
    status: RunStatus,
    stats: &RunStats,
    error_message: Option<&str>,
) -> Result<()> {
    storage.finish_run(run_id, status, stats, error_message).await?;
    info!(run_id = %run_id, status = %status, "sync lock released");
    Ok(())
}
