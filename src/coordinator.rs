//! Claim-and-dispatch: the per-candidate state machine
//! `candidate → claimed → dispatched → {linked, failed}`.
//!
//! The claim is committed in one conditional store write (schedule update +
//! execution insert); the trigger call happens strictly after it so a slow or
//! hanging remote cannot hold the transaction open. Any contention signal
//! (revision conflict, fresh lock, advanced next_run_at) silently abandons
//! the candidate — some other invocation owns that firing.

use std::sync::atomic::Ordering as AtomicOrdering;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::EngineConfig;
use crate::error::{StoreError, TriggerError};
use crate::metrics::EngineMetrics;
use crate::schedule::{
  ExecutionError, ExecutionId, ExecutionStatus, RunId, Schedule, ScheduleExecution, ScheduleId,
  ScheduleLock,
};
use crate::store::ScheduleStore;
use crate::trigger::RunTrigger;

/// Why a due candidate produced no firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  /// The schedule no longer exists (deleted between query and claim).
  Missing,
  /// Disabled between query and claim.
  Disabled,
  /// `next_run_at` is no longer due (another process already advanced it).
  NotDue,
  /// A lock younger than the grace window is present — another invocation is
  /// presumed still handling this firing.
  Locked,
  /// `max_runs` or `stop_at` was reached; the schedule was disabled instead
  /// of fired.
  StopConditionReached,
  /// The conditional commit lost to a concurrent writer.
  Contended,
}

/// Result of processing one due candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
  /// The claim was committed and an execution record exists. `dispatched`
  /// tells whether the trigger call succeeded; a failed dispatch leaves the
  /// execution in `Error` and the firing permanently skipped, since
  /// `next_run_at` advanced inside the claim.
  Fired { dispatched: bool },
  Skipped(SkipReason),
}

/// Attempts to claim and dispatch one due schedule.
///
/// Errors are only returned for store faults on the claim path itself;
/// contention of every kind is a normal `Skipped` outcome. Post-dispatch
/// bookkeeping failures are logged and absorbed — the lock they would have
/// cleared expires on its own after the grace window.
pub async fn process_due_schedule(
  store: &dyn ScheduleStore,
  trigger: &dyn RunTrigger,
  config: &EngineConfig,
  metrics: &EngineMetrics,
  schedule_id: ScheduleId,
  now: DateTime<Utc>,
) -> Result<ClaimOutcome, StoreError> {
  // --- Steps 1-4: re-validate against a fresh revisioned read ---

  let Some(versioned) = store.get_schedule(schedule_id).await? else {
    debug!(%schedule_id, "Due candidate no longer exists; skipping.");
    return Ok(ClaimOutcome::Skipped(SkipReason::Missing));
  };
  let revision = versioned.revision;
  let mut schedule = versioned.doc;

  if !schedule.enabled {
    debug!(%schedule_id, "Due candidate was disabled; skipping.");
    return Ok(ClaimOutcome::Skipped(SkipReason::Disabled));
  }

  let Some(due_at) = schedule.next_run_at.filter(|at| *at <= now) else {
    debug!(%schedule_id, "next_run_at already advanced by another process; skipping.");
    metrics.claims_contended.fetch_add(1, AtomicOrdering::Relaxed);
    return Ok(ClaimOutcome::Skipped(SkipReason::NotDue));
  };

  if let Some(lock) = &schedule.lock {
    let age = now.signed_duration_since(lock.locked_at);
    if age < lock_grace(config) {
      debug!(
        %schedule_id,
        locked_by = %lock.locked_by,
        lock_age_secs = age.num_seconds(),
        "Fresh lock present; another invocation owns this firing."
      );
      metrics.claims_contended.fetch_add(1, AtomicOrdering::Relaxed);
      return Ok(ClaimOutcome::Skipped(SkipReason::Locked));
    }
    // Stale lock: the holder died or hung past the grace window. Claim over it.
    debug!(
      %schedule_id,
      locked_by = %lock.locked_by,
      lock_age_secs = age.num_seconds(),
      "Ignoring stale lock."
    );
  }

  if schedule.stop_condition_reached(now) {
    schedule.enabled = false;
    schedule.lock = None;
    return match store.update_schedule(schedule, revision).await {
      Ok(()) => {
        info!(%schedule_id, "Stop condition reached; schedule disabled.");
        metrics.schedules_stopped.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(ClaimOutcome::Skipped(SkipReason::StopConditionReached))
      }
      Err(e) if e.is_conflict() => {
        metrics.claims_contended.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(ClaimOutcome::Skipped(SkipReason::Contended))
      }
      Err(e) => Err(e),
    };
  }

  // --- Step 5: take the claim ---

  schedule.lock = Some(ScheduleLock {
    locked_at: now,
    locked_by: config.claimant.clone(),
  });
  // Seed with the due timestamp so interval recurrences stay on their grid.
  let next_run = schedule.recurrence.next_run_at(now, Some(due_at));
  schedule.run_count += 1;
  schedule.next_run_at = Some(next_run);
  if schedule.max_runs.is_some_and(|max| schedule.run_count >= max) {
    schedule.enabled = false;
  }

  let execution = ScheduleExecution {
    id: Uuid::new_v4(),
    schedule_id,
    group_id: schedule.group_id,
    scheduled_for: due_at,
    started_at: now,
    status: ExecutionStatus::Started,
    run_id: None,
    error: None,
    completed_at: None,
  };

  match store
    .commit_claim(schedule.clone(), revision, execution.clone())
    .await
  {
    Ok(()) => {}
    Err(e) if e.is_conflict() => {
      debug!(%schedule_id, "Lost the claim to a concurrent invocation.");
      metrics.claims_contended.fetch_add(1, AtomicOrdering::Relaxed);
      return Ok(ClaimOutcome::Skipped(SkipReason::Contended));
    }
    Err(e) => return Err(e),
  }
  metrics.claims_won.fetch_add(1, AtomicOrdering::Relaxed);
  info!(
    %schedule_id,
    execution_id = %execution.id,
    scheduled_for = %due_at,
    next_run = %next_run,
    run_count = schedule.run_count,
    "Claimed due schedule."
  );

  // --- Steps 6-8: dispatch outside the transaction ---

  let call_start = Instant::now();
  let dispatch_result = trigger.trigger_run(&schedule.run_config).await;
  metrics.trigger_call_duration.record(call_start.elapsed());

  match dispatch_result {
    Ok(run_id) => {
      metrics.runs_triggered.fetch_add(1, AtomicOrdering::Relaxed);
      info!(%schedule_id, execution_id = %execution.id, %run_id, "Run triggered.");
      if let Err(e) = link_dispatched_run(store, schedule_id, execution.id, run_id, now).await {
        warn!(
          %schedule_id,
          execution_id = %execution.id,
          error = %e,
          "Failed to record successful dispatch; the lock will expire after the grace window."
        );
      }
      Ok(ClaimOutcome::Fired { dispatched: true })
    }
    Err(trigger_error) => {
      metrics.trigger_failures.fetch_add(1, AtomicOrdering::Relaxed);
      metrics.executions_errored.fetch_add(1, AtomicOrdering::Relaxed);
      warn!(
        %schedule_id,
        execution_id = %execution.id,
        error = %trigger_error,
        "Dispatch failed; this firing is skipped (next_run_at already advanced)."
      );
      if let Err(e) =
        record_dispatch_failure(store, schedule_id, execution.id, &trigger_error, now).await
      {
        warn!(
          %schedule_id,
          execution_id = %execution.id,
          error = %e,
          "Failed to record dispatch failure; the lock will expire after the grace window."
        );
      }
      Ok(ClaimOutcome::Fired { dispatched: false })
    }
  }
}

fn lock_grace(config: &EngineConfig) -> ChronoDuration {
  ChronoDuration::from_std(config.lock_grace).unwrap_or_else(|_| ChronoDuration::minutes(5))
}

/// Step 7: attach the run to the execution, stamp the schedule's
/// last-run fields, and release the lock.
async fn link_dispatched_run(
  store: &dyn ScheduleStore,
  schedule_id: ScheduleId,
  execution_id: ExecutionId,
  run_id: RunId,
  now: DateTime<Utc>,
) -> Result<(), StoreError> {
  if let Some(versioned) = store.get_execution(execution_id).await? {
    let mut execution = versioned.doc;
    execution.run_id = Some(run_id);
    store.update_execution(execution, versioned.revision).await?;
  }
  update_schedule_with_retry(store, schedule_id, |schedule| {
    schedule.last_run_at = Some(now);
    schedule.last_run_id = Some(run_id);
    schedule.lock = None;
  })
  .await
}

/// Step 8: mark the execution failed and release the lock so the *next*
/// scheduled firing can proceed on the natural poll cadence.
async fn record_dispatch_failure(
  store: &dyn ScheduleStore,
  schedule_id: ScheduleId,
  execution_id: ExecutionId,
  trigger_error: &TriggerError,
  now: DateTime<Utc>,
) -> Result<(), StoreError> {
  if let Some(versioned) = store.get_execution(execution_id).await? {
    let mut execution = versioned.doc;
    execution.status = ExecutionStatus::Error;
    execution.error = Some(ExecutionError {
      message: trigger_error.message.clone(),
      code: trigger_error.code.clone(),
    });
    execution.completed_at = Some(now);
    store.update_execution(execution, versioned.revision).await?;
  }
  update_schedule_with_retry(store, schedule_id, |schedule| {
    schedule.lock = None;
  })
  .await
}

/// Small CAS retry loop for the post-dispatch schedule writes, which can race
/// with manual enable/disable from the operator surface.
async fn update_schedule_with_retry<F>(
  store: &dyn ScheduleStore,
  schedule_id: ScheduleId,
  mut apply: F,
) -> Result<(), StoreError>
where
  F: FnMut(&mut Schedule),
{
  const ATTEMPTS: usize = 3;
  for _ in 0..ATTEMPTS {
    let Some(versioned) = store.get_schedule(schedule_id).await? else {
      // Deleted externally mid-flight; nothing left to update.
      return Ok(());
    };
    let mut schedule = versioned.doc;
    apply(&mut schedule);
    match store.update_schedule(schedule, versioned.revision).await {
      Ok(()) => return Ok(()),
      Err(e) if e.is_conflict() => continue,
      Err(e) => return Err(e),
    }
  }
  Err(StoreError::Conflict {
    kind: "schedule",
    id: schedule_id,
  })
}
