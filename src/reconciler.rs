//! Execution reconciler: reflects terminal Run status onto execution records.
//!
//! Pure state synchronization — the reconciler owns nothing. Runs still in
//! flight, and runs that are not visible yet because their dispatch just
//! happened, are left untouched and re-checked next tick. All updates for a
//! tick land in one batch write.

use std::sync::atomic::Ordering as AtomicOrdering;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::engine::EngineConfig;
use crate::error::StoreError;
use crate::metrics::EngineMetrics;
use crate::schedule::{ExecutionError, ExecutionStatus};
use crate::store::{ExecutionCompletion, ScheduleStore};

/// What one reconcile tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
  /// Started executions (with a run attached) the query returned.
  pub inflight: usize,
  /// Executions whose run succeeded.
  pub completed: usize,
  /// Executions whose run ended in a failure-like status.
  pub errored: usize,
  /// Executions left untouched (run still going, or not yet visible).
  pub pending: usize,
}

/// Runs one reconcile tick.
pub async fn reconcile_tick(
  store: &dyn ScheduleStore,
  config: &EngineConfig,
  metrics: &EngineMetrics,
) -> Result<ReconcileSummary, StoreError> {
  let started = store
    .started_executions(config.reconcile_batch_size)
    .await
    .inspect_err(|_| {
      metrics.tick_errors.fetch_add(1, AtomicOrdering::Relaxed);
    })?;
  metrics
    .executions_inflight_current
    .store(started.len(), AtomicOrdering::Relaxed);

  let now = Utc::now();
  let mut summary = ReconcileSummary {
    inflight: started.len(),
    ..ReconcileSummary::default()
  };
  let mut completions = Vec::new();

  for versioned in started {
    let mut execution = versioned.doc;
    let Some(run_id) = execution.run_id else {
      continue;
    };

    let run = match store.get_run(run_id).await {
      Ok(Some(run)) => run,
      Ok(None) => {
        // Dispatch race: the run service has not made the run visible yet.
        debug!(execution_id = %execution.id, %run_id, "Run not visible yet; re-checking next tick.");
        summary.pending += 1;
        continue;
      }
      Err(e) => {
        warn!(
          execution_id = %execution.id,
          %run_id,
          error = %e,
          "Failed reading run; continuing with remaining executions."
        );
        continue;
      }
    };

    if !run.status.is_terminal() {
      summary.pending += 1;
      continue;
    }

    if run.status.is_success() {
      execution.status = ExecutionStatus::Completed;
      summary.completed += 1;
    } else {
      execution.status = ExecutionStatus::Error;
      execution.error = Some(ExecutionError {
        message: run
          .error
          .unwrap_or_else(|| format!("run ended with status {}", run.status.as_str())),
        code: Some(run.status.as_str().to_string()),
      });
      summary.errored += 1;
    }
    execution.completed_at = Some(now);
    completions.push(ExecutionCompletion {
      execution,
      revision: versioned.revision,
    });
  }

  if !completions.is_empty() {
    store.complete_executions(completions).await.inspect_err(|_| {
      metrics.tick_errors.fetch_add(1, AtomicOrdering::Relaxed);
    })?;
    metrics
      .executions_completed
      .fetch_add(summary.completed, AtomicOrdering::Relaxed);
    metrics
      .executions_errored
      .fetch_add(summary.errored, AtomicOrdering::Relaxed);
    info!(
      completed = summary.completed,
      errored = summary.errored,
      pending = summary.pending,
      "Reconciled execution statuses."
    );
  }

  Ok(summary)
}
