pub mod recurrence;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use recurrence::{Frequency, Recurrence};

// --- Public Type Aliases ---

/// Unique identifier of a recurring schedule definition. UUID v4.
pub type ScheduleId = Uuid;

/// Unique identifier of a schedule group (organizational only).
pub type GroupId = Uuid;

/// Unique identifier of one claimed firing of a schedule. UUID v4,
/// generated by the coordinator before the claiming transaction.
pub type ExecutionId = Uuid;

/// Identifier of the external long-running scan job a firing triggered.
pub type RunId = Uuid;

// --- Schedule ---

/// A recurring scan definition, persisted in the schedule store.
///
/// `next_run_at` is the only field the poller queries on; everything else is
/// re-validated inside the claiming transaction. The document is mutated only
/// by the coordinator (claim, next-run advance, disable-on-limit) and by
/// manual enable/disable from the operator surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
  pub id: ScheduleId,
  pub group_id: GroupId,
  /// When and how often this schedule fires.
  pub recurrence: Recurrence,
  /// Opaque payload forwarded to the external run trigger.
  pub run_config: RunConfig,
  /// Disabled schedules are never polled. Cleared automatically once
  /// `run_count` reaches `max_runs` or `stop_at` passes.
  pub enabled: bool,
  /// Next planned firing instant. `None` means the schedule will not fire.
  pub next_run_at: Option<DateTime<Utc>>,
  /// Start of the most recent successfully dispatched firing.
  pub last_run_at: Option<DateTime<Utc>>,
  /// Run triggered by the most recent successfully dispatched firing.
  pub last_run_id: Option<RunId>,
  /// Monotonic count of claims (not of successful dispatches).
  pub run_count: u32,
  /// If set, the schedule is disabled after this many claims.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_runs: Option<u32>,
  /// If set, the schedule is disabled once `now` reaches this instant.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stop_at: Option<DateTime<Utc>>,
  /// Cooperative claim marker. See [`ScheduleLock`].
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lock: Option<ScheduleLock>,
}

impl Schedule {
  /// True when the stop conditions say this schedule must not fire again.
  pub fn stop_condition_reached(&self, now: DateTime<Utc>) -> bool {
    if self.max_runs.is_some_and(|max| self.run_count >= max) {
      return true;
    }
    self.stop_at.is_some_and(|stop| now >= stop)
  }
}

/// A self-expiring soft lock: a claim marker, not a strict mutex.
///
/// A lock older than the configured grace window is treated as stale and
/// ignored; holders never release a stale lock explicitly. Duplicate firings
/// are prevented by the store's compare-and-swap write, the lock only
/// de-duplicates invocations that overlap within the grace window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleLock {
  pub locked_at: DateTime<Utc>,
  /// Identity of the scheduler process that took the claim (for diagnosis).
  pub locked_by: String,
}

/// Payload forwarded verbatim to the external run-trigger interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
  /// Scan mode understood by the run service (e.g. "full", "duplicates").
  pub mode: String,
  /// Record types to scan; empty means all.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub entity_types: Vec<String>,
  /// Additional settings, passed through untouched.
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub extra: serde_json::Value,
}

impl RunConfig {
  pub fn new(mode: impl Into<String>) -> Self {
    Self {
      mode: mode.into(),
      entity_types: Vec::new(),
      extra: serde_json::Value::Null,
    }
  }
}

// --- ScheduleExecution ---

/// Lifecycle state of one claimed firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  /// Claimed; the run may or may not have been triggered yet.
  Started,
  /// The triggered run reached a success-like terminal status.
  Completed,
  /// The trigger call failed, or the run reached a failure-like terminal status.
  Error,
}

/// Error detail recorded on a failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub code: Option<String>,
}

/// One record per claimed firing of a schedule.
///
/// Created transactionally alongside the schedule claim; updated by the
/// reconciler (or immediately by the coordinator if the trigger call itself
/// fails); never mutated by the poller. A record with `status == Started` and
/// no `run_id` means the trigger call never completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleExecution {
  pub id: ExecutionId,
  pub schedule_id: ScheduleId,
  pub group_id: GroupId,
  /// The `next_run_at` value that made this firing due.
  pub scheduled_for: DateTime<Utc>,
  pub started_at: DateTime<Utc>,
  pub status: ExecutionStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub run_id: Option<RunId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ExecutionError>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
}

// --- Run (referenced, not owned) ---

/// Status of the external scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Running,
  Succeeded,
  Failed,
  Cancelled,
  /// Force-terminated by the janitor after exceeding the run timeout.
  Timeout,
}

impl RunStatus {
  /// True once the run can no longer change status on its own.
  pub fn is_terminal(&self) -> bool {
    !matches!(self, RunStatus::Running)
  }

  /// True for the success-like terminal status.
  pub fn is_success(&self) -> bool {
    matches!(self, RunStatus::Succeeded)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      RunStatus::Running => "running",
      RunStatus::Succeeded => "succeeded",
      RunStatus::Failed => "failed",
      RunStatus::Cancelled => "cancelled",
      RunStatus::Timeout => "timeout",
    }
  }
}

/// The actual long-running scan job, owned by the external run service.
///
/// The engine only reads it (reconciler) and, as a last resort, force-writes a
/// `Timeout` status (janitor). Everything else about a run belongs to the run
/// service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
  pub id: RunId,
  pub status: RunStatus,
  pub started_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ended_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

// --- Wall-clock time serde ("HH:MM") ---

/// Serde helpers serializing `NaiveTime` as the operator-facing `"HH:MM"`
/// wall-clock form (seconds accepted on input, never emitted).
pub(crate) mod hhmm {
  use chrono::NaiveTime;
  use serde::{self, Deserialize, Deserializer, Serializer};

  const FORMAT: &str = "%H:%M";

  pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.format(FORMAT).to_string())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(&raw, FORMAT)
      .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
      .map_err(serde::de::Error::custom)
  }

  /// Same, for `Vec<NaiveTime>` (`times_of_day`).
  pub mod vec {
    use super::FORMAT;
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
      times: &[NaiveTime],
      serializer: S,
    ) -> Result<S::Ok, S::Error> {
      serializer.collect_seq(times.iter().map(|t| t.format(FORMAT).to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
      deserializer: D,
    ) -> Result<Vec<NaiveTime>, D::Error> {
      let raw: Vec<String> = Vec::deserialize(deserializer)?;
      raw
        .into_iter()
        .map(|s| {
          NaiveTime::parse_from_str(&s, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
        })
        .collect()
    }
  }
}
