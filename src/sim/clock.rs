use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Source of "now" for the engine.
///
/// Injected so heartbeat and forecast logic can be driven deterministically.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same instant, so a test can keep one handle while the
/// engine owns another.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use home_energy_sim::sim::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::starting_at(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH);
/// let mut seen = Vec::new();
///
/// clock.run(3, Duration::from_secs(1), |now| seen.push(now.timestamp()));
/// assert_eq!(seen, vec![1, 2, 3]);
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock forward by `step` and returns the new instant.
    pub fn advance(&self, step: Duration) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += TimeDelta::from_std(step).unwrap_or(TimeDelta::zero());
        *now
    }

    /// Advances `steps` times by `step`, calling `f` after each advance.
    pub fn run(&self, steps: usize, step: Duration, mut f: impl FnMut(DateTime<Utc>)) {
        for _ in 0..steps {
            let now = self.advance(step);
            f(now);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wall-clock origin advanced by tokio's monotonic clock.
///
/// Follows paused/auto-advanced tokio time, which makes heartbeat tests
/// deterministic without real delays.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl MonotonicClock {
    /// Anchors the clock at `origin` as of the current tokio instant.
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.started.elapsed();
        self.origin + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::zero())
    }
}

/// Seconds from `from` to `to` as a float (negative when `to` is earlier).
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Offsets `instant` by a float number of seconds, at microsecond resolution.
pub fn offset_by_seconds(instant: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    instant + TimeDelta::microseconds((seconds * 1_000_000.0).round() as i64)
}
