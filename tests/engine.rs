//! End-to-end tests for the engine handle: builder validation, the full
//! claim → dispatch → reconcile pipeline under the interval loops, shutdown.

mod common;

use std::time::Duration as StdDuration;

use chrono::Utc;
use scankeeper::{
  BuildError, EngineBuilder, MemoryStore, RunStatus, ScanKeeper, ScheduleStore,
};

use crate::common::{
  due_daily_schedule, set_run_status, setup_tracing, FakeTrigger, TriggerMode,
};

// Polls an assertion until it holds or the deadline passes.
async fn wait_until<F: Fn() -> bool>(what: &str, deadline: StdDuration, check: F) {
  let started = std::time::Instant::now();
  while started.elapsed() < deadline {
    if check() {
      return;
    }
    tokio::time::sleep(StdDuration::from_millis(25)).await;
  }
  panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn builder_requires_store_and_trigger() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);

  let missing_store = EngineBuilder::new().trigger(trigger.clone()).build();
  assert!(matches!(missing_store, Err(BuildError::MissingStore)));

  let missing_trigger = EngineBuilder::new().store(store.clone()).build();
  assert!(matches!(missing_trigger, Err(BuildError::MissingTrigger)));

  let zero_batch = ScanKeeper::builder()
    .store(store.clone())
    .trigger(trigger.clone())
    .poll_batch_size(0)
    .build();
  assert!(matches!(zero_batch, Err(BuildError::ZeroBatchSize)));

  let zero_interval = ScanKeeper::builder()
    .store(store)
    .trigger(trigger)
    .poll_interval(StdDuration::ZERO)
    .build();
  assert!(matches!(zero_interval, Err(BuildError::ZeroInterval)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_claims_dispatches_and_reconciles() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);

  let schedule = due_daily_schedule(Utc::now());
  let schedule_id = schedule.id;
  store.insert_schedule(schedule).await.unwrap();

  let engine = ScanKeeper::builder()
    .store(store.clone())
    .trigger(trigger.clone())
    .poll_interval(StdDuration::from_millis(50))
    .reconcile_interval(StdDuration::from_millis(80))
    .janitor_interval(StdDuration::from_secs(60))
    .claimant("engine-test")
    .build()
    .unwrap();

  // The poll loop claims and dispatches on its own.
  wait_until("claim and dispatch", StdDuration::from_secs(5), || {
    trigger.call_count() >= 1 && store.executions_for(schedule_id).len() == 1
  })
  .await;

  // Finish the run; the reconcile loop completes the execution.
  set_run_status(&store, trigger.last_run_id().unwrap(), RunStatus::Succeeded, None).await;
  wait_until("reconciliation", StdDuration::from_secs(5), || {
    store
      .executions_for(schedule_id)
      .first()
      .is_some_and(|e| e.status == scankeeper::ExecutionStatus::Completed)
  })
  .await;

  // Exactly one firing happened: the daily schedule is no longer due.
  assert_eq!(trigger.call_count(), 1);

  let snapshot = engine.metrics_snapshot();
  assert_eq!(snapshot.claims_won, 1);
  assert_eq!(snapshot.runs_triggered, 1);
  assert_eq!(snapshot.executions_completed, 1);

  engine
    .shutdown_graceful(Some(StdDuration::from_secs(5)))
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_engine_shuts_down_cleanly() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);

  let engine = ScanKeeper::builder()
    .store(store)
    .trigger(trigger)
    .build()
    .unwrap();

  tokio::time::sleep(StdDuration::from_millis(50)).await;
  engine
    .shutdown_graceful(Some(StdDuration::from_secs(5)))
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forced_shutdown_stops_loops() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);

  let engine = ScanKeeper::builder()
    .store(store)
    .trigger(trigger)
    .poll_interval(StdDuration::from_millis(20))
    .build()
    .unwrap();

  tokio::time::sleep(StdDuration::from_millis(60)).await;
  engine
    .shutdown_force(Some(StdDuration::from_secs(5)))
    .await
    .unwrap();
}
