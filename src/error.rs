use uuid::Uuid;

use thiserror::Error;

/// Errors that can occur while building a `ScanKeeper` engine via `EngineBuilder`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("A schedule store must be provided via `EngineBuilder::store`")]
  MissingStore,
  #[error("A run trigger must be provided via `EngineBuilder::trigger`")]
  MissingTrigger,
  #[error("Batch sizes must be greater than zero")]
  ZeroBatchSize,
  #[error("Tick intervals must be greater than zero")]
  ZeroInterval,
}

// --- Store Errors ---

/// Errors surfaced by a [`ScheduleStore`](crate::store::ScheduleStore) implementation.
///
/// `Conflict` is the compare-and-swap failure signal: the document changed
/// between read and write, usually because another scheduler process claimed
/// the same schedule first. Callers treat it as transient contention, not a
/// fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
  #[error("revision conflict writing {kind} {id} (concurrently modified)")]
  Conflict { kind: &'static str, id: Uuid },
  #[error("{kind} {id} not found")]
  NotFound { kind: &'static str, id: Uuid },
  #[error("store backend error: {0}")]
  Backend(String),
}

impl StoreError {
  /// True when the error is the CAS contention signal rather than a backend fault.
  pub fn is_conflict(&self) -> bool {
    matches!(self, StoreError::Conflict { .. })
  }
}

// --- Trigger Errors ---

/// Failure reported by the external run-trigger interface.
///
/// `code` carries the remote classification when one exists (an HTTP status,
/// a service error code); it is copied verbatim onto the execution record so
/// operators can distinguish "service said no" from "never reached the service".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("run trigger failed: {message}")]
pub struct TriggerError {
  pub message: String,
  pub code: Option<String>,
}

impl TriggerError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      code: None,
    }
  }

  pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      code: Some(code.into()),
    }
  }
}

// --- Shutdown Errors ---

/// Errors related to the engine shutdown process (`shutdown_graceful`, `shutdown_force`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Failed to send shutdown signal (engine already shut down or watch channel error).")]
  SignalFailed,
  #[error("Timed out waiting for engine loops to complete shutdown.")]
  Timeout,
  #[error("A tick loop panicked during the shutdown process.")]
  TaskPanic,
}
