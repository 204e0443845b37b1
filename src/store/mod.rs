//! Persistence seam for schedule state.
//!
//! All cross-process coordination in the engine happens through this trait:
//! the poller, coordinator, reconciler, and janitor share no memory, only the
//! store. Writes are compare-and-swap on a per-document `revision`, which is
//! how the claiming transaction's read-check-write pattern is realized — a
//! racing writer loses with [`StoreError::Conflict`] instead of clobbering.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::schedule::{
  ExecutionId, Run, RunId, Schedule, ScheduleExecution, ScheduleId,
};

/// A document paired with the store revision it was read at.
///
/// The revision is opaque to callers beyond equality: pass it back on a
/// conditional write to assert "unchanged since I read it".
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
  pub doc: T,
  pub revision: u64,
}

/// Batched status update applied to one started execution by the reconciler.
#[derive(Debug, Clone)]
pub struct ExecutionCompletion {
  pub execution: ScheduleExecution,
  pub revision: u64,
}

/// Document store holding Schedule, ScheduleExecution, and Run records.
///
/// Implementations must provide per-document atomic conditional writes and an
/// atomic claim commit; they do not need cross-document isolation beyond that.
/// Queries take a `limit` so every tick does bounded work.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
  // --- Schedules ---

  /// Create a schedule document (operator surface and tests).
  async fn insert_schedule(&self, schedule: Schedule) -> Result<(), StoreError>;

  /// Fetch one schedule with its revision.
  async fn get_schedule(&self, id: ScheduleId) -> Result<Option<Versioned<Schedule>>, StoreError>;

  /// Enabled schedules with `next_run_at <= now`, ordered by `next_run_at`
  /// ascending, at most `limit` of them.
  async fn due_schedules(
    &self,
    now: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<Schedule>, StoreError>;

  /// Conditionally replace a schedule; fails with `Conflict` if it changed
  /// since the read that produced `expected_revision`.
  async fn update_schedule(
    &self,
    schedule: Schedule,
    expected_revision: u64,
  ) -> Result<(), StoreError>;

  /// The claiming transaction: replace the schedule (conditional on
  /// `expected_revision`) and insert the execution, atomically. Either both
  /// writes land or neither does.
  async fn commit_claim(
    &self,
    schedule: Schedule,
    expected_revision: u64,
    execution: ScheduleExecution,
  ) -> Result<(), StoreError>;

  // --- Executions ---

  /// Fetch one execution with its revision.
  async fn get_execution(
    &self,
    id: ExecutionId,
  ) -> Result<Option<Versioned<ScheduleExecution>>, StoreError>;

  /// Conditionally replace an execution.
  async fn update_execution(
    &self,
    execution: ScheduleExecution,
    expected_revision: u64,
  ) -> Result<(), StoreError>;

  /// Executions with `status == Started` and a `run_id`, oldest first, at most
  /// `limit` of them. The reconciler's work queue.
  async fn started_executions(
    &self,
    limit: usize,
  ) -> Result<Vec<Versioned<ScheduleExecution>>, StoreError>;

  /// Apply a batch of reconciler completions in one transaction.
  async fn complete_executions(
    &self,
    completions: Vec<ExecutionCompletion>,
  ) -> Result<(), StoreError>;

  // --- Runs ---

  /// Fetch one run.
  async fn get_run(&self, id: RunId) -> Result<Option<Run>, StoreError>;

  /// Unconditionally write a run document. Used by the run service to record
  /// progress and by the janitor to force-terminate hung runs.
  async fn put_run(&self, run: Run) -> Result<(), StoreError>;

  /// Runs with `status == Running` and `started_at < cutoff`, oldest first,
  /// at most `limit` of them. The janitor's work queue.
  async fn hung_runs(
    &self,
    cutoff: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<Run>, StoreError>;
}
