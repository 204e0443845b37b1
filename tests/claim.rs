//! Tests for the claiming transaction: due-ness re-validation, the soft
//! lock's grace window, stop conditions, and claim contention.

mod common;

use chrono::{Duration as ChronoDuration, NaiveTime, Utc};
use scankeeper::coordinator::process_due_schedule;
use scankeeper::{
  poll_tick, ClaimOutcome, EngineMetrics, MemoryStore, Recurrence, ScheduleLock, ScheduleStore,
  SkipReason,
};

use crate::common::{
  due_daily_schedule, fetch_schedule, schedule_with, setup_tracing, single_execution, test_config,
  FakeTrigger, TriggerMode,
};

#[tokio::test]
async fn claim_creates_execution_and_advances_next_run() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);
  let config = test_config();
  let metrics = EngineMetrics::new();

  let now = Utc::now();
  let schedule = due_daily_schedule(now);
  let schedule_id = schedule.id;
  store.insert_schedule(schedule).await.unwrap();

  let summary = poll_tick(&store, &trigger, &config, &metrics).await.unwrap();
  assert_eq!(summary.due, 1);
  assert_eq!(summary.fired, 1);
  assert_eq!(summary.dispatched, 1);

  let execution = single_execution(&store, schedule_id);
  assert!(execution.run_id.is_some(), "dispatch should link a run id");
  assert_eq!(execution.scheduled_for, now - ChronoDuration::minutes(1));

  let after = fetch_schedule(&store, schedule_id).await;
  assert_eq!(after.run_count, 1);
  assert!(after.enabled);
  assert!(after.lock.is_none(), "lock must be cleared after dispatch");
  assert!(
    after.next_run_at.unwrap() > now,
    "next_run_at must advance past the claim"
  );
  assert_eq!(after.last_run_id, trigger.last_run_id());
  assert!(after.last_run_at.is_some());

  let snapshot = metrics.snapshot();
  assert_eq!(snapshot.claims_won, 1);
  assert_eq!(snapshot.runs_triggered, 1);
}

#[tokio::test]
async fn max_runs_disables_after_final_claim() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);
  let config = test_config();
  let metrics = EngineMetrics::new();

  let now = Utc::now();
  // One-minute interval with a far-past due time: each claim advances
  // next_run_at by only a minute, so the schedule stays due tick after tick.
  let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
  let mut schedule = schedule_with(
    Recurrence::hourly(nine, 1, "UTC"),
    now - ChronoDuration::minutes(30),
  );
  schedule.max_runs = Some(3);
  let schedule_id = schedule.id;
  store.insert_schedule(schedule).await.unwrap();

  for round in 1..=3 {
    let summary = poll_tick(&store, &trigger, &config, &metrics).await.unwrap();
    assert_eq!(summary.fired, 1, "round {round} should claim");
  }

  let after = fetch_schedule(&store, schedule_id).await;
  assert_eq!(after.run_count, 3);
  assert!(!after.enabled, "schedule must disable on its final claim");
  assert_eq!(store.executions_for(schedule_id).len(), 3);

  // A fourth tick finds nothing eligible.
  let summary = poll_tick(&store, &trigger, &config, &metrics).await.unwrap();
  assert_eq!(summary.due, 0);
  assert_eq!(trigger.call_count(), 3);
}

#[tokio::test]
async fn concurrent_claims_produce_exactly_one_execution() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);
  let config = test_config();
  let metrics = EngineMetrics::new();

  let now = Utc::now();
  let schedule = due_daily_schedule(now);
  let schedule_id = schedule.id;
  store.insert_schedule(schedule).await.unwrap();

  let task = |store: MemoryStore, trigger: FakeTrigger| {
    let config = config.clone();
    let metrics = metrics.clone();
    tokio::spawn(async move {
      process_due_schedule(&store, &trigger, &config, &metrics, schedule_id, Utc::now())
        .await
        .unwrap()
    })
  };
  let first = task(store.clone(), trigger.clone());
  let second = task(store.clone(), trigger.clone());
  let outcomes = vec![first.await.unwrap(), second.await.unwrap()];

  let fired = outcomes
    .iter()
    .filter(|o| matches!(o, ClaimOutcome::Fired { .. }))
    .count();
  assert_eq!(fired, 1, "exactly one invocation may win the claim");
  assert_eq!(store.executions_for(schedule_id).len(), 1);
  assert_eq!(trigger.call_count(), 1);
}

#[tokio::test]
async fn fresh_lock_blocks_claim() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);
  let config = test_config();
  let metrics = EngineMetrics::new();

  let now = Utc::now();
  let mut schedule = due_daily_schedule(now);
  schedule.lock = Some(ScheduleLock {
    locked_at: now - ChronoDuration::minutes(1),
    locked_by: "other-poller".to_string(),
  });
  let schedule_id = schedule.id;
  store.insert_schedule(schedule).await.unwrap();

  let outcome = process_due_schedule(&store, &trigger, &config, &metrics, schedule_id, now)
    .await
    .unwrap();
  assert_eq!(outcome, ClaimOutcome::Skipped(SkipReason::Locked));
  assert!(store.executions_for(schedule_id).is_empty());
  assert_eq!(trigger.call_count(), 0);
}

#[tokio::test]
async fn stale_lock_is_claimed_over() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);
  let config = test_config(); // 5-minute grace
  let metrics = EngineMetrics::new();

  let now = Utc::now();
  let mut schedule = due_daily_schedule(now);
  schedule.lock = Some(ScheduleLock {
    locked_at: now - ChronoDuration::minutes(10),
    locked_by: "crashed-poller".to_string(),
  });
  let schedule_id = schedule.id;
  store.insert_schedule(schedule).await.unwrap();

  let outcome = process_due_schedule(&store, &trigger, &config, &metrics, schedule_id, now)
    .await
    .unwrap();
  assert_eq!(outcome, ClaimOutcome::Fired { dispatched: true });
  assert_eq!(store.executions_for(schedule_id).len(), 1);

  let after = fetch_schedule(&store, schedule_id).await;
  assert!(after.lock.is_none(), "the superseding claim clears its own lock");
}

#[tokio::test]
async fn stop_at_disables_without_firing() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);
  let config = test_config();
  let metrics = EngineMetrics::new();

  let now = Utc::now();
  let mut schedule = due_daily_schedule(now);
  schedule.stop_at = Some(now - ChronoDuration::seconds(1));
  let schedule_id = schedule.id;
  store.insert_schedule(schedule).await.unwrap();

  let outcome = process_due_schedule(&store, &trigger, &config, &metrics, schedule_id, now)
    .await
    .unwrap();
  assert_eq!(outcome, ClaimOutcome::Skipped(SkipReason::StopConditionReached));
  assert!(store.executions_for(schedule_id).is_empty());
  assert_eq!(trigger.call_count(), 0);

  let after = fetch_schedule(&store, schedule_id).await;
  assert!(!after.enabled);
  assert!(after.lock.is_none());
  assert_eq!(metrics.snapshot().schedules_stopped, 1);
}

#[tokio::test]
async fn disabled_schedules_are_not_polled() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);
  let config = test_config();
  let metrics = EngineMetrics::new();

  let now = Utc::now();
  let mut schedule = due_daily_schedule(now);
  schedule.enabled = false;
  store.insert_schedule(schedule).await.unwrap();

  let summary = poll_tick(&store, &trigger, &config, &metrics).await.unwrap();
  assert_eq!(summary.due, 0);
  assert_eq!(trigger.call_count(), 0);
}

#[tokio::test]
async fn poll_batch_cap_leaves_work_for_next_tick() {
  setup_tracing();
  let store = MemoryStore::new();
  let trigger = FakeTrigger::new(store.clone(), TriggerMode::Succeed);
  let mut config = test_config();
  config.poll_batch_size = 2;
  let metrics = EngineMetrics::new();

  let now = Utc::now();
  for _ in 0..5 {
    store.insert_schedule(due_daily_schedule(now)).await.unwrap();
  }

  let first = poll_tick(&store, &trigger, &config, &metrics).await.unwrap();
  assert_eq!(first.due, 2);
  assert_eq!(first.fired, 2);

  let second = poll_tick(&store, &trigger, &config, &metrics).await.unwrap();
  assert_eq!(second.fired, 2);
  let third = poll_tick(&store, &trigger, &config, &metrics).await.unwrap();
  assert_eq!(third.fired, 1);
  assert_eq!(trigger.call_count(), 5);
}
