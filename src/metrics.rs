use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without detailed percentile information.
/// Uses `Relaxed` ordering for potentially higher performance where strict
/// inter-metric consistency isn't critical.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize, // Store sum of durations in microseconds
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    // Use saturating conversion to prevent overflow panic, though unlikely
    // with usize micros.
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  /// Gets the total number of observations recorded.
  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Gets the total sum of durations recorded (in microseconds).
  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Internal state for tracking engine metrics using atomic counters.
///
/// This struct is cloned and shared between the tick loops. Cloning only
/// clones the `Arc`s, allowing shared access to the underlying atomic values.
#[derive(Debug, Clone)]
pub struct EngineMetrics {
  // --- Counters (Monotonically increasing) ---
  /// Due schedules returned by poll-tick queries.
  pub schedules_polled: Arc<AtomicUsize>,
  /// Claims committed (one execution record each).
  pub claims_won: Arc<AtomicUsize>,
  /// Claim attempts abandoned because another process got there first
  /// (revision conflict, already-advanced next_run_at, or fresh lock).
  pub claims_contended: Arc<AtomicUsize>,
  /// Schedules disabled because max_runs or stop_at was reached.
  pub schedules_stopped: Arc<AtomicUsize>,
  /// Successful run-trigger calls.
  pub runs_triggered: Arc<AtomicUsize>,
  /// Failed run-trigger calls (the firing is skipped, not retried).
  pub trigger_failures: Arc<AtomicUsize>,
  /// Executions the reconciler marked completed.
  pub executions_completed: Arc<AtomicUsize>,
  /// Executions marked error (by the reconciler or on dispatch failure).
  pub executions_errored: Arc<AtomicUsize>,
  /// Runs force-terminated by the janitor.
  pub runs_timed_out: Arc<AtomicUsize>,
  /// Ticks aborted by a store/query failure (the next tick retries).
  pub tick_errors: Arc<AtomicUsize>,

  // --- Gauges (Current state values) ---
  /// Started executions seen by the most recent reconcile tick.
  pub executions_inflight_current: Arc<AtomicUsize>,

  // --- Histograms/Summaries ---
  /// Histogram tracking the latency of run-trigger calls (in microseconds).
  pub trigger_call_duration: Arc<SimpleHistogram>,
}

impl Default for EngineMetrics {
  fn default() -> Self {
    Self::new()
  }
}

impl EngineMetrics {
  /// Creates a new `EngineMetrics` instance with all counters initialized to zero.
  pub fn new() -> Self {
    Self {
      schedules_polled: Default::default(),
      claims_won: Default::default(),
      claims_contended: Default::default(),
      schedules_stopped: Default::default(),
      runs_triggered: Default::default(),
      trigger_failures: Default::default(),
      executions_completed: Default::default(),
      executions_errored: Default::default(),
      runs_timed_out: Default::default(),
      tick_errors: Default::default(),
      executions_inflight_current: Default::default(),
      trigger_call_duration: Arc::new(SimpleHistogram::default()),
    }
  }

  /// Creates a snapshot of the current metric values.
  pub fn snapshot(&self) -> MetricsSnapshot {
    // Relaxed is fine for snapshots: precise correlation between counters at
    // the exact instant of the snapshot isn't required.
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      schedules_polled: self.schedules_polled.load(order),
      claims_won: self.claims_won.load(order),
      claims_contended: self.claims_contended.load(order),
      schedules_stopped: self.schedules_stopped.load(order),
      runs_triggered: self.runs_triggered.load(order),
      trigger_failures: self.trigger_failures.load(order),
      executions_completed: self.executions_completed.load(order),
      executions_errored: self.executions_errored.load(order),
      runs_timed_out: self.runs_timed_out.load(order),
      tick_errors: self.tick_errors.load(order),
      executions_inflight_current: self.executions_inflight_current.load(order),
      trigger_call_duration_count: self.trigger_call_duration.get_count(),
      trigger_call_duration_sum_micros: self.trigger_call_duration.get_sum_micros(),
    }
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the engine's metrics at a specific point in time.
///
/// Contains plain data types and can be easily cloned, serialized, or used
/// for monitoring and analysis.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
  // Counters
  pub schedules_polled: usize,
  pub claims_won: usize,
  pub claims_contended: usize,
  pub schedules_stopped: usize,
  pub runs_triggered: usize,
  pub trigger_failures: usize,
  pub executions_completed: usize,
  pub executions_errored: usize,
  pub runs_timed_out: usize,
  pub tick_errors: usize,
  // Gauges
  pub executions_inflight_current: usize,
  // Histogram Data
  pub trigger_call_duration_count: usize,
  pub trigger_call_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean run-trigger call latency in microseconds, if any calls completed.
  pub fn mean_trigger_duration_micros(&self) -> Option<f64> {
    if self.trigger_call_duration_count == 0 {
      None
    } else {
      Some(self.trigger_call_duration_sum_micros as f64 / self.trigger_call_duration_count as f64)
    }
  }

  /// Mean run-trigger call latency, if any calls completed.
  pub fn mean_trigger_duration(&self) -> Option<Duration> {
    self
      .mean_trigger_duration_micros()
      .map(|micros| Duration::from_micros(micros as u64))
  }
}
