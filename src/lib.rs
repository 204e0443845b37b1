//! ScanKeeper: A Distributed Schedule Engine for Recurring Data-Integrity Scans
//!
//! ScanKeeper decides *when* a data-integrity scan runs, claims that right
//! exactly once among possibly-concurrent scheduler invocations, computes the
//! next fire time under multiple recurrence models and IANA timezones
//! (daylight-saving transitions absorbed), triggers the scan as a remote
//! long-running job, tracks that job to completion, and reclaims jobs that
//! silently hang.
//!
//! # Architecture
//!
//! Four independent, stateless control loops share nothing but the persistent
//! store:
//!
//! - **Poller** — every tick, queries for enabled schedules whose
//!   `next_run_at` has arrived (bounded batch) and hands each candidate to the
//!   coordinator. One candidate failing never aborts the others.
//! - **Coordinator** — re-validates due-ness, lock freshness, and stop
//!   conditions against a fresh read, then commits the claim (soft lock,
//!   advanced `next_run_at`, new execution record) in a single conditional
//!   store write. Only after the commit does it call the external run-trigger
//!   interface, so a slow remote never holds the transaction open.
//! - **Reconciler** — every tick, maps terminal Run statuses onto the
//!   execution records the coordinator created, in one batch write.
//! - **Janitor** — every tick, force-terminates Runs stuck in `running` past
//!   the timeout; the reconciler then surfaces the failure normally.
//!
//! Coordination is cooperative, not consensus: the per-schedule lock is a
//! time-window claim marker backed by the store's compare-and-swap writes.
//! Two invocations racing within the store boundary resolve cleanly (one
//! loses the conditional write); racing just outside it can, rarely,
//! double-trigger — an accepted trade-off over heavier locking. On dispatch
//! failure the already-advanced `next_run_at` stands: a failed firing is
//! skipped, never double-fired.
//!
//! # Usage
//!
//! ```no_run
//! use scankeeper::{
//!   MemoryStore, Recurrence, RunConfig, ScanKeeper, Schedule, ScheduleStore, HttpRunTrigger,
//! };
//! use chrono::{NaiveTime, Utc};
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let store = MemoryStore::new();
//!
//!   // Schedules normally come from the operator dashboard; create one by hand.
//!   let recurrence = Recurrence::daily(
//!     NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
//!     "America/Denver",
//!   );
//!   let next = recurrence.next_run_at(Utc::now(), None);
//!   store
//!     .insert_schedule(Schedule {
//!       id: Uuid::new_v4(),
//!       group_id: Uuid::new_v4(),
//!       recurrence,
//!       run_config: RunConfig::new("full"),
//!       enabled: true,
//!       next_run_at: Some(next),
//!       last_run_at: None,
//!       last_run_id: None,
//!       run_count: 0,
//!       max_runs: None,
//!       stop_at: None,
//!       lock: None,
//!     })
//!     .await?;
//!
//!   let engine = ScanKeeper::builder()
//!     .store(store)
//!     .trigger(HttpRunTrigger::new("https://scans.internal/api/runs", "token"))
//!     .build()?;
//!
//!   // ... engine polls, claims, dispatches, reconciles, sweeps ...
//!
//!   engine
//!     .shutdown_graceful(Some(std::time::Duration::from_secs(10)))
//!     .await?;
//!   Ok(())
//! }
//! ```
//!
//! # External-timer deployments
//!
//! The engine handle is a convenience. Deployments where each tick is its own
//! process invocation (cloud cron, serverless timers) call the tick functions
//! directly — [`poll_tick`], [`reconcile_tick`], [`janitor_tick`] are each a
//! pure function of (store state, now) and can run concurrently with any
//! number of other instances against the same store.

// Declare modules within the crate
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod janitor;
pub mod metrics;
pub mod poller;
pub mod reconciler;
pub mod schedule;
pub mod store;
pub mod trigger;

// --- Public Re-exports ---

// Engine handle and configuration
pub use engine::{EngineBuilder, EngineConfig, ScanKeeper, ShutdownMode};

// Error types
pub use error::{BuildError, ShutdownError, StoreError, TriggerError};

// Document model
pub use schedule::{
  ExecutionError, ExecutionId, ExecutionStatus, Frequency, GroupId, Recurrence, Run, RunConfig,
  RunId, RunStatus, Schedule, ScheduleExecution, ScheduleId, ScheduleLock,
};

// Store seam
pub use store::{ExecutionCompletion, MemoryStore, ScheduleStore, Versioned};

// Trigger seam
pub use trigger::RunTrigger;
#[cfg(feature = "http-trigger")]
pub use trigger::HttpRunTrigger;

// Tick entry points and summaries
pub use coordinator::{ClaimOutcome, SkipReason};
pub use janitor::{janitor_tick, JanitorSummary};
pub use poller::{poll_tick, PollSummary};
pub use reconciler::{reconcile_tick, ReconcileSummary};

// Metrics
pub use metrics::{EngineMetrics, MetricsSnapshot};
