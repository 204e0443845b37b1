//! Due-job poller: the engine's first tick loop.
//!
//! Each tick queries for enabled schedules whose `next_run_at` has arrived,
//! oldest first and capped at the configured batch size, then hands each
//! candidate to the coordinator independently. The cap is the backpressure
//! device: a full batch leaves the remaining due schedules for the next tick
//! instead of doing unbounded work now.

use std::sync::atomic::Ordering as AtomicOrdering;

use chrono::Utc;
use tracing::{debug, warn};

use crate::coordinator::{process_due_schedule, ClaimOutcome};
use crate::engine::EngineConfig;
use crate::error::StoreError;
use crate::metrics::EngineMetrics;
use crate::store::ScheduleStore;
use crate::trigger::RunTrigger;

/// What one poll tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
  /// Due candidates the query returned.
  pub due: usize,
  /// Candidates claimed (an execution record exists for each).
  pub fired: usize,
  /// Claimed candidates whose trigger call succeeded.
  pub dispatched: usize,
  /// Candidates skipped as contended/disabled/stopped.
  pub skipped: usize,
  /// Candidates that errored; logged and left for a later tick.
  pub failed: usize,
}

/// Runs one poll tick. Only the due-schedule query itself aborts the tick;
/// each candidate's failure is isolated, logged, and skipped.
pub async fn poll_tick(
  store: &dyn ScheduleStore,
  trigger: &dyn RunTrigger,
  config: &EngineConfig,
  metrics: &EngineMetrics,
) -> Result<PollSummary, StoreError> {
  let query_now = Utc::now();
  let due = store
    .due_schedules(query_now, config.poll_batch_size)
    .await
    .inspect_err(|_| {
      metrics.tick_errors.fetch_add(1, AtomicOrdering::Relaxed);
    })?;

  let mut summary = PollSummary {
    due: due.len(),
    ..PollSummary::default()
  };
  metrics
    .schedules_polled
    .fetch_add(due.len(), AtomicOrdering::Relaxed);
  if due.len() >= config.poll_batch_size {
    debug!(
      batch = config.poll_batch_size,
      "Poll batch is full; remaining due schedules will be caught next tick."
    );
  }

  for schedule in due {
    match process_due_schedule(store, trigger, config, metrics, schedule.id, Utc::now()).await {
      Ok(ClaimOutcome::Fired { dispatched }) => {
        summary.fired += 1;
        if dispatched {
          summary.dispatched += 1;
        }
      }
      Ok(ClaimOutcome::Skipped(reason)) => {
        debug!(schedule_id = %schedule.id, ?reason, "Candidate skipped.");
        summary.skipped += 1;
      }
      Err(e) => {
        warn!(
          schedule_id = %schedule.id,
          error = %e,
          "Failed processing due schedule; continuing with remaining candidates."
        );
        summary.failed += 1;
      }
    }
  }

  Ok(summary)
}
