use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The recurrence families a schedule can use.
///
/// Exactly one of the frequency-specific fields on [`Recurrence`] is
/// authoritative per variant: `days_of_week` for `Weekly`, `interval_minutes`
/// for `Hourly`, `times_of_day` for `CustomTimes`. `time_of_day` is the anchor
/// for everything except `CustomTimes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
  Daily,
  Weekly,
  Hourly,
  CustomTimes,
}

/// When a schedule fires, expressed in wall-clock terms.
///
/// All wall-clock arithmetic happens in the configured IANA timezone and is
/// converted to an absolute instant at the end, so daylight-saving transitions
/// are absorbed: a "14:00 America/Denver" schedule fires at 14:00 local
/// year-round even though its UTC offset changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recurrence {
  pub frequency: Frequency,
  /// Wall-clock anchor time (HH:MM).
  #[serde(with = "crate::schedule::hhmm")]
  pub time_of_day: NaiveTime,
  /// Days the schedule fires on, 0 = Sunday … 6 = Saturday. Weekly only.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub days_of_week: Vec<u8>,
  /// Minutes between firings. Hourly only; must be positive.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub interval_minutes: Option<u32>,
  /// Explicit firing times within a day (HH:MM). CustomTimes only.
  #[serde(default, skip_serializing_if = "Vec::is_empty", with = "crate::schedule::hhmm::vec")]
  pub times_of_day: Vec<NaiveTime>,
  /// IANA zone name (e.g. "America/Denver"). Unknown names fall back to UTC
  /// with a warning rather than failing the tick.
  pub timezone: String,
}

impl Recurrence {
  pub fn daily(time_of_day: NaiveTime, timezone: &str) -> Self {
    Self {
      frequency: Frequency::Daily,
      time_of_day,
      days_of_week: Vec::new(),
      interval_minutes: None,
      times_of_day: Vec::new(),
      timezone: timezone.to_string(),
    }
  }

  pub fn weekly(time_of_day: NaiveTime, days_of_week: Vec<u8>, timezone: &str) -> Self {
    Self {
      frequency: Frequency::Weekly,
      days_of_week,
      ..Self::daily(time_of_day, timezone)
    }
  }

  pub fn hourly(time_of_day: NaiveTime, interval_minutes: u32, timezone: &str) -> Self {
    Self {
      frequency: Frequency::Hourly,
      interval_minutes: Some(interval_minutes),
      ..Self::daily(time_of_day, timezone)
    }
  }

  pub fn custom_times(times_of_day: Vec<NaiveTime>, timezone: &str) -> Self {
    let anchor = times_of_day.first().copied().unwrap_or_default();
    Self {
      frequency: Frequency::CustomTimes,
      times_of_day,
      ..Self::daily(anchor, timezone)
    }
  }

  /// Computes the next firing instant.
  ///
  /// `previous` is the `next_run_at` value that triggered the firing being
  /// processed, when one exists. The hourly family adds its interval directly
  /// to `previous` so repeated claims never accumulate drift; the wall-clock
  /// families (daily, weekly, custom_times) return the first occurrence
  /// strictly after the later of `now` and `previous`.
  ///
  /// Never fails: degenerate parameters (hourly without a positive interval,
  /// weekly without days, custom_times without times, unknown timezone)
  /// degrade to the daily `time_of_day` behavior with a warning.
  pub fn next_run_at(&self, now: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let tz = self.zone();
    let after = reference(now, previous);
    match self.frequency {
      Frequency::Daily => next_daily(tz, self.time_of_day, after),
      Frequency::Weekly => self.next_weekly(tz, after),
      Frequency::Hourly => self.next_hourly(tz, now, previous, after),
      Frequency::CustomTimes => self.next_custom(tz, after),
    }
  }

  fn zone(&self) -> Tz {
    match self.timezone.parse::<Tz>() {
      Ok(tz) => tz,
      Err(_) => {
        warn!(timezone = %self.timezone, "Unknown timezone on schedule, falling back to UTC.");
        Tz::UTC
      }
    }
  }

  fn next_weekly(&self, tz: Tz, after: DateTime<Utc>) -> DateTime<Utc> {
    let days: Vec<u8> = self.days_of_week.iter().copied().filter(|d| *d <= 6).collect();
    if days.is_empty() {
      warn!(
        frequency = "weekly",
        "Weekly recurrence without valid days_of_week, treating as daily."
      );
      return next_daily(tz, self.time_of_day, after);
    }

    let start = after.with_timezone(&tz).date_naive();
    // Scan today plus a full week so "today, but the time already passed"
    // wraps to the same weekday next week.
    for offset in 0..=7 {
      let date = start + Duration::days(offset);
      let weekday = date.weekday().num_days_from_sunday() as u8;
      if !days.contains(&weekday) {
        continue;
      }
      let candidate = resolve_local(tz, date, self.time_of_day);
      if candidate > after {
        return candidate;
      }
    }

    // Unreachable with a non-empty day set; keep the degenerate fallback anyway.
    next_daily(tz, self.time_of_day, after)
  }

  fn next_hourly(
    &self,
    tz: Tz,
    now: DateTime<Utc>,
    previous: Option<DateTime<Utc>>,
    after: DateTime<Utc>,
  ) -> DateTime<Utc> {
    let Some(interval) = self.interval_minutes.filter(|m| *m > 0) else {
      warn!(
        frequency = "hourly",
        "Hourly recurrence without a positive interval_minutes, treating as daily."
      );
      return next_daily(tz, self.time_of_day, after);
    };
    let step = Duration::minutes(i64::from(interval));

    // Anchored recurrence: once a previous firing exists the next one is a
    // plain addition, so the series never drifts off its anchor grid.
    if let Some(prev) = previous {
      return prev + step;
    }

    // First computation: anchor at time_of_day today (local wall clock) and
    // advance by whole interval multiples until strictly in the future.
    let today = now.with_timezone(&tz).date_naive();
    let anchor = resolve_local(tz, today, self.time_of_day);
    if anchor > now {
      return anchor;
    }
    let elapsed_minutes = (now - anchor).num_minutes();
    let steps = elapsed_minutes / i64::from(interval) + 1;
    anchor + Duration::minutes(steps * i64::from(interval))
  }

  fn next_custom(&self, tz: Tz, after: DateTime<Utc>) -> DateTime<Utc> {
    let mut times = self.times_of_day.clone();
    if times.is_empty() {
      warn!(
        frequency = "custom_times",
        "CustomTimes recurrence without times_of_day, treating as daily."
      );
      return next_daily(tz, self.time_of_day, after);
    }
    times.sort();

    let today = after.with_timezone(&tz).date_naive();
    for time in &times {
      let candidate = resolve_local(tz, today, *time);
      if candidate > after {
        return candidate;
      }
    }
    // Nothing left today; earliest time tomorrow.
    resolve_local(tz, today + Duration::days(1), times[0])
  }
}

/// Strictly-after reference for the wall-clock families: the later of "now"
/// and the previous firing time, so reapplying the calculator to its own
/// output always moves forward.
fn reference(now: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
  previous.map_or(now, |prev| prev.max(now))
}

/// Next occurrence of `time` strictly after `after`, in `tz`.
fn next_daily(tz: Tz, time: NaiveTime, after: DateTime<Utc>) -> DateTime<Utc> {
  let mut date = after.with_timezone(&tz).date_naive();
  for _ in 0..3 {
    let candidate = resolve_local(tz, date, time);
    if candidate > after {
      return candidate;
    }
    date += Duration::days(1);
  }
  // Only reachable through pathological zone data; still strictly in the future.
  after + Duration::days(1)
}

/// Resolves a local wall-clock time to an absolute instant.
///
/// Ambiguous times (the fall-back DST hour) take their first occurrence.
/// Nonexistent times (the spring-forward gap) walk forward in 15-minute steps
/// until the wall clock exists again; every real-world gap is two hours or
/// less.
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
  let mut naive = date.and_time(time);
  for _ in 0..8 {
    match tz.from_local_datetime(&naive) {
      LocalResult::Single(dt) => return dt.with_timezone(&Utc),
      LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
      LocalResult::None => naive += Duration::minutes(15),
    }
  }
  Utc.from_utc_datetime(&naive)
}
