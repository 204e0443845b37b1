use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::schedule::{
  ExecutionId, ExecutionStatus, Run, RunId, RunStatus, Schedule, ScheduleExecution, ScheduleId,
};
use crate::store::{ExecutionCompletion, ScheduleStore, Versioned};

/// In-memory [`ScheduleStore`] with per-document revisions.
///
/// A single mutex over all three collections makes every trait method — the
/// claim commit in particular — trivially atomic, which is exactly the
/// transactional guarantee the engine relies on. Suitable for tests and for
/// embedded single-process deployments; horizontally scaled deployments want a
/// shared database behind the same trait.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
  inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
  schedules: HashMap<ScheduleId, Versioned<Schedule>>,
  executions: HashMap<ExecutionId, Versioned<ScheduleExecution>>,
  runs: HashMap<RunId, Run>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of executions ever recorded (test observability).
  pub fn execution_count(&self) -> usize {
    self.inner.lock().executions.len()
  }

  /// Snapshot of all executions for a schedule, unordered (test observability).
  pub fn executions_for(&self, schedule_id: ScheduleId) -> Vec<ScheduleExecution> {
    self
      .inner
      .lock()
      .executions
      .values()
      .filter(|v| v.doc.schedule_id == schedule_id)
      .map(|v| v.doc.clone())
      .collect()
  }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
  async fn insert_schedule(&self, schedule: Schedule) -> Result<(), StoreError> {
    let mut inner = self.inner.lock();
    inner.schedules.insert(
      schedule.id,
      Versioned {
        doc: schedule,
        revision: 0,
      },
    );
    Ok(())
  }

  async fn get_schedule(&self, id: ScheduleId) -> Result<Option<Versioned<Schedule>>, StoreError> {
    Ok(self.inner.lock().schedules.get(&id).cloned())
  }

  async fn due_schedules(
    &self,
    now: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<Schedule>, StoreError> {
    let inner = self.inner.lock();
    let mut due: Vec<&Schedule> = inner
      .schedules
      .values()
      .map(|v| &v.doc)
      .filter(|s| s.enabled && s.next_run_at.is_some_and(|at| at <= now))
      .collect();
    due.sort_by_key(|s| s.next_run_at);
    Ok(due.into_iter().take(limit).cloned().collect())
  }

  async fn update_schedule(
    &self,
    schedule: Schedule,
    expected_revision: u64,
  ) -> Result<(), StoreError> {
    let mut inner = self.inner.lock();
    inner.swap_schedule(schedule, expected_revision)
  }

  async fn commit_claim(
    &self,
    schedule: Schedule,
    expected_revision: u64,
    execution: ScheduleExecution,
  ) -> Result<(), StoreError> {
    let mut inner = self.inner.lock();
    // The revision check guards the whole commit: if it fails, the execution
    // insert must not happen either.
    inner.swap_schedule(schedule, expected_revision)?;
    inner.executions.insert(
      execution.id,
      Versioned {
        doc: execution,
        revision: 0,
      },
    );
    Ok(())
  }

  async fn get_execution(
    &self,
    id: ExecutionId,
  ) -> Result<Option<Versioned<ScheduleExecution>>, StoreError> {
    Ok(self.inner.lock().executions.get(&id).cloned())
  }

  async fn update_execution(
    &self,
    execution: ScheduleExecution,
    expected_revision: u64,
  ) -> Result<(), StoreError> {
    let mut inner = self.inner.lock();
    inner.swap_execution(execution, expected_revision)
  }

  async fn started_executions(
    &self,
    limit: usize,
  ) -> Result<Vec<Versioned<ScheduleExecution>>, StoreError> {
    let inner = self.inner.lock();
    let mut started: Vec<&Versioned<ScheduleExecution>> = inner
      .executions
      .values()
      .filter(|v| v.doc.status == ExecutionStatus::Started && v.doc.run_id.is_some())
      .collect();
    started.sort_by_key(|v| v.doc.started_at);
    Ok(started.into_iter().take(limit).cloned().collect())
  }

  async fn complete_executions(
    &self,
    completions: Vec<ExecutionCompletion>,
  ) -> Result<(), StoreError> {
    let mut inner = self.inner.lock();
    // All-or-nothing: validate every revision before applying any write.
    for completion in &completions {
      let current = inner
        .executions
        .get(&completion.execution.id)
        .ok_or(StoreError::NotFound {
          kind: "execution",
          id: completion.execution.id,
        })?;
      if current.revision != completion.revision {
        return Err(StoreError::Conflict {
          kind: "execution",
          id: completion.execution.id,
        });
      }
    }
    for completion in completions {
      let revision = completion.revision + 1;
      inner.executions.insert(
        completion.execution.id,
        Versioned {
          doc: completion.execution,
          revision,
        },
      );
    }
    Ok(())
  }

  async fn get_run(&self, id: RunId) -> Result<Option<Run>, StoreError> {
    Ok(self.inner.lock().runs.get(&id).cloned())
  }

  async fn put_run(&self, run: Run) -> Result<(), StoreError> {
    self.inner.lock().runs.insert(run.id, run);
    Ok(())
  }

  async fn hung_runs(
    &self,
    cutoff: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<Run>, StoreError> {
    let inner = self.inner.lock();
    let mut hung: Vec<&Run> = inner
      .runs
      .values()
      .filter(|r| r.status == RunStatus::Running && r.started_at < cutoff)
      .collect();
    hung.sort_by_key(|r| r.started_at);
    Ok(hung.into_iter().take(limit).cloned().collect())
  }
}

impl Inner {
  fn swap_schedule(&mut self, schedule: Schedule, expected_revision: u64) -> Result<(), StoreError> {
    let current = self.schedules.get_mut(&schedule.id).ok_or(StoreError::NotFound {
      kind: "schedule",
      id: schedule.id,
    })?;
    if current.revision != expected_revision {
      return Err(StoreError::Conflict {
        kind: "schedule",
        id: schedule.id,
      });
    }
    current.doc = schedule;
    current.revision += 1;
    Ok(())
  }

  fn swap_execution(
    &mut self,
    execution: ScheduleExecution,
    expected_revision: u64,
  ) -> Result<(), StoreError> {
    let current = self
      .executions
      .get_mut(&execution.id)
      .ok_or(StoreError::NotFound {
        kind: "execution",
        id: execution.id,
      })?;
    if current.revision != expected_revision {
      return Err(StoreError::Conflict {
        kind: "execution",
        id: execution.id,
      });
    }
    current.doc = execution;
    current.revision += 1;
    Ok(())
  }
}
