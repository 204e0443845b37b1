use crate::error::{BuildError, ShutdownError};
use crate::janitor::janitor_tick;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::poller::poll_tick;
use crate::reconciler::reconcile_tick;
use crate::store::ScheduleStore;
use crate::trigger::RunTrigger;

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use uuid::Uuid;

/// The requested shutdown mode. Sent via a `watch` channel; `None` means the
/// engine is running normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Let any in-flight tick finish, then stop.
  Graceful,
  /// Stop as soon as the loops reach their next await point.
  Force,
}

/// Tuning knobs for the engine's tick loops.
///
/// The defaults are the deployment cadence the engine was designed around:
/// poll every minute, reconcile every two, sweep for hung runs every ten,
/// 5-minute lock grace window, 30-minute run timeout.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub poll_interval: Duration,
  pub reconcile_interval: Duration,
  pub janitor_interval: Duration,
  /// Max due schedules handled per poll tick.
  pub poll_batch_size: usize,
  /// Max started executions examined per reconcile tick.
  pub reconcile_batch_size: usize,
  /// Max hung runs terminated per janitor tick.
  pub janitor_batch_size: usize,
  /// Age below which another invocation's lock blocks a claim.
  pub lock_grace: Duration,
  /// Age past which a still-running Run is force-terminated.
  pub run_timeout: Duration,
  /// Identity written into `lock.locked_by` by this process.
  pub claimant: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_secs(60),
      reconcile_interval: Duration::from_secs(120),
      janitor_interval: Duration::from_secs(600),
      poll_batch_size: 25,
      reconcile_batch_size: 50,
      janitor_batch_size: 20,
      lock_grace: Duration::from_secs(300),
      run_timeout: Duration::from_secs(1800),
      claimant: format!("scankeeper-{}", Uuid::new_v4()),
    }
  }
}

/// Builder for configuring and starting a [`ScanKeeper`] engine.
///
/// # Example
///
/// ```no_run
/// use scankeeper::{ScanKeeper, MemoryStore, HttpRunTrigger};
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = ScanKeeper::builder()
///     .store(MemoryStore::new())
///     .trigger(HttpRunTrigger::new("https://scans.internal/api/runs", "token"))
///     .poll_interval(Duration::from_secs(30))
///     .build()?;
/// // ... later:
/// engine.shutdown_graceful(Some(Duration::from_secs(10))).await?;
/// # Ok(())
/// # }
/// ```
pub struct EngineBuilder {
  store: Option<Arc<dyn ScheduleStore>>,
  trigger: Option<Arc<dyn RunTrigger>>,
  config: EngineConfig,
}

impl Default for EngineBuilder {
  fn default() -> Self {
    Self {
      store: None,
      trigger: None,
      config: EngineConfig::default(),
    }
  }
}

impl EngineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the schedule store (required).
  pub fn store<S: ScheduleStore + 'static>(mut self, store: S) -> Self {
    self.store = Some(Arc::new(store));
    self
  }

  /// Sets the run trigger (required).
  pub fn trigger<T: RunTrigger + 'static>(mut self, trigger: T) -> Self {
    self.trigger = Some(Arc::new(trigger));
    self
  }

  pub fn poll_interval(mut self, interval: Duration) -> Self {
    self.config.poll_interval = interval;
    self
  }

  pub fn reconcile_interval(mut self, interval: Duration) -> Self {
    self.config.reconcile_interval = interval;
    self
  }

  pub fn janitor_interval(mut self, interval: Duration) -> Self {
    self.config.janitor_interval = interval;
    self
  }

  pub fn poll_batch_size(mut self, size: usize) -> Self {
    self.config.poll_batch_size = size;
    self
  }

  pub fn reconcile_batch_size(mut self, size: usize) -> Self {
    self.config.reconcile_batch_size = size;
    self
  }

  pub fn janitor_batch_size(mut self, size: usize) -> Self {
    self.config.janitor_batch_size = size;
    self
  }

  /// Sets the soft-lock grace window. Locks younger than this block a claim;
  /// older ones are treated as stale.
  pub fn lock_grace(mut self, grace: Duration) -> Self {
    self.config.lock_grace = grace;
    self
  }

  /// Sets the run timeout the janitor enforces.
  pub fn run_timeout(mut self, timeout: Duration) -> Self {
    self.config.run_timeout = timeout;
    self
  }

  /// Sets the identity written into claimed locks. Defaults to a
  /// per-process random name.
  pub fn claimant(mut self, claimant: impl Into<String>) -> Self {
    self.config.claimant = claimant.into();
    self
  }

  /// Builds the engine and spawns its tick loops.
  ///
  /// # Errors
  ///
  /// Returns a [`BuildError`] when the store or trigger is missing, or when a
  /// batch size or interval is zero.
  pub fn build(self) -> Result<ScanKeeper, BuildError> {
    let store = self.store.ok_or(BuildError::MissingStore)?;
    let trigger = self.trigger.ok_or(BuildError::MissingTrigger)?;
    let config = self.config;
    if config.poll_batch_size == 0
      || config.reconcile_batch_size == 0
      || config.janitor_batch_size == 0
    {
      return Err(BuildError::ZeroBatchSize);
    }
    if config.poll_interval.is_zero()
      || config.reconcile_interval.is_zero()
      || config.janitor_interval.is_zero()
    {
      return Err(BuildError::ZeroInterval);
    }

    let metrics = EngineMetrics::new();
    let (shutdown_tx, shutdown_rx) = watch::channel::<Option<ShutdownMode>>(None);

    // --- Poll loop (poller + coordinator) ---
    let poll_handle = {
      let store = store.clone();
      let trigger = trigger.clone();
      let config = config.clone();
      let metrics = metrics.clone();
      let mut shutdown_rx = shutdown_rx.clone();
      tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = config.poll_interval.as_secs(), "Poll loop started.");
        loop {
          tokio::select! {
            biased;
            Ok(()) = shutdown_rx.changed() => {
              if shutdown_rx.borrow().is_some() {
                info!("Poll loop received shutdown signal.");
                break;
              }
            }
            _ = ticker.tick() => {
              match poll_tick(store.as_ref(), trigger.as_ref(), &config, &metrics).await {
                Ok(summary) => debug!(
                  due = summary.due,
                  fired = summary.fired,
                  dispatched = summary.dispatched,
                  skipped = summary.skipped,
                  "Poll tick complete."
                ),
                Err(e) => error!(error = %e, "Poll tick aborted; the next tick retries from scratch."),
              }
            }
          }
        }
      })
    };

    // --- Reconcile loop ---
    let reconcile_handle = {
      let store = store.clone();
      let config = config.clone();
      let metrics = metrics.clone();
      let mut shutdown_rx = shutdown_rx.clone();
      tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = config.reconcile_interval.as_secs(), "Reconcile loop started.");
        loop {
          tokio::select! {
            biased;
            Ok(()) = shutdown_rx.changed() => {
              if shutdown_rx.borrow().is_some() {
                info!("Reconcile loop received shutdown signal.");
                break;
              }
            }
            _ = ticker.tick() => {
              match reconcile_tick(store.as_ref(), &config, &metrics).await {
                Ok(summary) => debug!(
                  inflight = summary.inflight,
                  completed = summary.completed,
                  errored = summary.errored,
                  "Reconcile tick complete."
                ),
                Err(e) => error!(error = %e, "Reconcile tick aborted; the next tick retries from scratch."),
              }
            }
          }
        }
      })
    };

    // --- Janitor loop ---
    let janitor_handle = {
      let store = store.clone();
      let config = config.clone();
      let metrics = metrics.clone();
      let mut shutdown_rx = shutdown_rx;
      tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.janitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = config.janitor_interval.as_secs(), "Janitor loop started.");
        loop {
          tokio::select! {
            biased;
            Ok(()) = shutdown_rx.changed() => {
              if shutdown_rx.borrow().is_some() {
                info!("Janitor loop received shutdown signal.");
                break;
              }
            }
            _ = ticker.tick() => {
              match janitor_tick(store.as_ref(), &config, &metrics).await {
                Ok(summary) => debug!(
                  hung = summary.hung,
                  terminated = summary.terminated,
                  "Janitor tick complete."
                ),
                Err(e) => error!(error = %e, "Janitor tick aborted; the next tick retries from scratch."),
              }
            }
          }
        }
      })
    };

    Ok(ScanKeeper {
      metrics,
      shutdown_tx,
      loop_handles: Arc::new(Mutex::new(vec![poll_handle, reconcile_handle, janitor_handle])),
    })
  }
}

/// The running schedule engine.
///
/// Owns the poll, reconcile, and janitor loops. All scheduling state lives in
/// the store — dropping the handle without shutdown leaves no state behind
/// that a restarted engine (or a concurrent one) cannot pick up; locks taken
/// by dead invocations expire on their own after the grace window.
///
/// Deployments driven by an external timer (one invocation per tick, e.g. a
/// cloud cron) can skip this handle entirely and call
/// [`poll_tick`](crate::poller::poll_tick),
/// [`reconcile_tick`](crate::reconciler::reconcile_tick), and
/// [`janitor_tick`](crate::janitor::janitor_tick) directly.
#[derive(Debug)]
pub struct ScanKeeper {
  metrics: EngineMetrics,
  shutdown_tx: watch::Sender<Option<ShutdownMode>>,
  loop_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ScanKeeper {
  /// Returns a builder to configure and start an engine.
  pub fn builder() -> EngineBuilder {
    EngineBuilder::new()
  }

  /// A point-in-time snapshot of the engine's metrics.
  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.metrics.snapshot()
  }

  /// Initiates a graceful shutdown: in-flight ticks finish, then the loops
  /// exit. Waits for all loops or until the optional timeout elapses.
  pub async fn shutdown_graceful(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating graceful shutdown...");
    self
      .shutdown_tx
      .send(Some(ShutdownMode::Graceful))
      .map_err(|_| ShutdownError::SignalFailed)?;
    self.await_shutdown(timeout).await
  }

  /// Initiates a forced shutdown. The loops stop at their next await point;
  /// a tick blocked inside a store call still has to return first.
  pub async fn shutdown_force(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating forced shutdown...");
    self
      .shutdown_tx
      .send(Some(ShutdownMode::Force))
      .map_err(|_| ShutdownError::SignalFailed)?;
    self.await_shutdown(timeout).await
  }

  /// Helper to wait for loop handles during shutdown.
  async fn await_shutdown(&self, timeout_duration: Option<Duration>) -> Result<(), ShutdownError> {
    let handles = {
      let mut guard = self.loop_handles.lock().await;
      std::mem::take(&mut *guard)
    };
    if handles.is_empty() {
      return Ok(());
    }

    let join_all_fut = try_join_all(handles);
    let result = if let Some(timeout) = timeout_duration {
      match tokio::time::timeout(timeout, join_all_fut).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(join_err)) => {
          error!("A tick loop panicked during shutdown: {:?}", join_err);
          Err(ShutdownError::TaskPanic)
        }
        Err(_) => {
          error!("Shutdown timed out after {:?}", timeout);
          Err(ShutdownError::Timeout)
        }
      }
    } else {
      match join_all_fut.await {
        Ok(_) => Ok(()),
        Err(join_err) => {
          error!("A tick loop panicked during shutdown: {:?}", join_err);
          Err(ShutdownError::TaskPanic)
        }
      }
    };

    if result.is_ok() {
      info!("All tick loops joined successfully.");
    }
    result
  }
}
