//! tests/common.rs
//! Shared helper functions for integration tests.

#![allow(dead_code)] // Not every test binary uses every helper.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tracing_subscriber::fmt::TestWriter;
use uuid::Uuid;

use scankeeper::{
  EngineConfig, MemoryStore, Recurrence, Run, RunConfig, RunId, RunStatus, RunTrigger, Schedule,
  ScheduleExecution, ScheduleId, ScheduleStore, TriggerError,
};

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG) // Show debug for engine internals
    .with_writer(TestWriter::new()) // Write to test output
    .with_test_writer() // Enable per-test log capture
    .try_init();
}

// Engine config with a deterministic claimant identity; intervals are
// irrelevant when ticks are driven directly.
pub fn test_config() -> EngineConfig {
  EngineConfig {
    claimant: "test-poller".to_string(),
    ..EngineConfig::default()
  }
}

// A fully populated schedule around the given recurrence, due at `next_run_at`.
pub fn schedule_with(recurrence: Recurrence, next_run_at: DateTime<Utc>) -> Schedule {
  Schedule {
    id: Uuid::new_v4(),
    group_id: Uuid::new_v4(),
    recurrence,
    run_config: RunConfig::new("full"),
    enabled: true,
    next_run_at: Some(next_run_at),
    last_run_at: None,
    last_run_id: None,
    run_count: 0,
    max_runs: None,
    stop_at: None,
    lock: None,
  }
}

// A daily UTC schedule that came due one minute ago. Anchoring time_of_day to
// the due instant keeps the post-claim next_run_at a full day out, so a test
// never races a second legitimate firing.
pub fn due_daily_schedule(now: DateTime<Utc>) -> Schedule {
  let due = now - ChronoDuration::minutes(1);
  schedule_with(Recurrence::daily(due.time(), "UTC"), due)
}

// Reads a schedule back, panicking if it vanished.
pub async fn fetch_schedule(store: &MemoryStore, id: ScheduleId) -> Schedule {
  store
    .get_schedule(id)
    .await
    .expect("store read failed")
    .expect("schedule missing")
    .doc
}

// Returns the single execution a schedule produced, panicking on any other count.
pub fn single_execution(store: &MemoryStore, schedule_id: ScheduleId) -> ScheduleExecution {
  let executions = store.executions_for(schedule_id);
  assert_eq!(
    executions.len(),
    1,
    "expected exactly one execution, found {}",
    executions.len()
  );
  executions.into_iter().next().unwrap()
}

// Flips a run into the given status, stamping ended_at for terminal ones.
pub async fn set_run_status(
  store: &MemoryStore,
  run_id: RunId,
  status: RunStatus,
  error: Option<&str>,
) {
  let mut run = store
    .get_run(run_id)
    .await
    .expect("store read failed")
    .expect("run missing");
  run.status = status;
  if status.is_terminal() {
    run.ended_at = Some(Utc::now());
  }
  run.error = error.map(str::to_string);
  store.put_run(run).await.expect("store write failed");
}

// --- Fake run trigger ---

/// What the fake trigger does when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
  /// Return a run id and register a Running run document in the store.
  Succeed,
  /// Return a run id but register nothing (dispatch race: the run service
  /// has not made the run visible yet).
  SucceedWithoutRun,
  /// Fail with a 503-coded error.
  Fail,
}

/// Records calls and, in `Succeed` mode, plays the run service's part by
/// inserting the Running run document.
#[derive(Debug, Clone)]
pub struct FakeTrigger {
  mode: TriggerMode,
  store: MemoryStore,
  calls: Arc<AtomicUsize>,
  last_run_id: Arc<Mutex<Option<RunId>>>,
}

impl FakeTrigger {
  pub fn new(store: MemoryStore, mode: TriggerMode) -> Self {
    Self {
      mode,
      store,
      calls: Arc::new(AtomicUsize::new(0)),
      last_run_id: Arc::new(Mutex::new(None)),
    }
  }

  pub fn call_count(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn last_run_id(&self) -> Option<RunId> {
    *self.last_run_id.lock()
  }
}

#[async_trait]
impl RunTrigger for FakeTrigger {
  async fn trigger_run(&self, _config: &RunConfig) -> Result<RunId, TriggerError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match self.mode {
      TriggerMode::Fail => Err(TriggerError::with_code("scan service unavailable", "503")),
      mode => {
        let run_id = Uuid::new_v4();
        *self.last_run_id.lock() = Some(run_id);
        if mode == TriggerMode::Succeed {
          self
            .store
            .put_run(Run {
              id: run_id,
              status: RunStatus::Running,
              started_at: Utc::now(),
              ended_at: None,
              error: None,
            })
            .await
            .map_err(|e| TriggerError::new(e.to_string()))?;
        }
        Ok(run_id)
      }
    }
  }
}
