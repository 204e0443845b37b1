//! Hung-job janitor: the backstop against runs that never report completion.
//!
//! A crashed worker, a lost callback, or a network partition leaves a Run in
//! `Running` forever; without the janitor its execution would stay `Started`
//! permanently. The janitor force-writes a `Timeout` status on such runs and
//! nothing else — the reconciler picks the change up on its next tick. It
//! never touches Schedule or ScheduleExecution documents.

use std::sync::atomic::Ordering as AtomicOrdering;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::warn;

use crate::engine::EngineConfig;
use crate::error::StoreError;
use crate::metrics::EngineMetrics;
use crate::schedule::RunStatus;
use crate::store::ScheduleStore;

/// What one janitor tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorSummary {
  /// Hung runs the query returned.
  pub hung: usize,
  /// Runs force-terminated this tick.
  pub terminated: usize,
}

/// Runs one janitor tick.
pub async fn janitor_tick(
  store: &dyn ScheduleStore,
  config: &EngineConfig,
  metrics: &EngineMetrics,
) -> Result<JanitorSummary, StoreError> {
  let now = Utc::now();
  let timeout =
    ChronoDuration::from_std(config.run_timeout).unwrap_or_else(|_| ChronoDuration::minutes(30));
  let cutoff = now - timeout;

  let hung = store
    .hung_runs(cutoff, config.janitor_batch_size)
    .await
    .inspect_err(|_| {
      metrics.tick_errors.fetch_add(1, AtomicOrdering::Relaxed);
    })?;

  let mut summary = JanitorSummary {
    hung: hung.len(),
    ..JanitorSummary::default()
  };

  for mut run in hung {
    let run_id = run.id;
    let age_secs = now.signed_duration_since(run.started_at).num_seconds();
    run.status = RunStatus::Timeout;
    run.ended_at = Some(now);
    run.error = Some(format!(
      "run did not complete within {}s and was force-terminated",
      config.run_timeout.as_secs()
    ));
    match store.put_run(run).await {
      Ok(()) => {
        summary.terminated += 1;
        metrics.runs_timed_out.fetch_add(1, AtomicOrdering::Relaxed);
        warn!(%run_id, age_secs, "Force-terminated hung run.");
      }
      Err(e) => {
        warn!(
          %run_id,
          error = %e,
          "Failed to force-terminate hung run; continuing with remaining runs."
        );
      }
    }
  }

  Ok(summary)
}
