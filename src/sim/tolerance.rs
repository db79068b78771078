//! Tolerance-window deduplication of persisted samples.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::store::{SampleKind, Store, StoreResult};

/// Values closer than this are treated as unchanged.
pub const VALUE_EPSILON: f64 = 1e-9;

/// Time band around "one heartbeat ago" within which a stored sample already
/// represents the current state.
///
/// The band is `interval ± (fraction * interval) / 2`, centered on
/// `now - interval`.
#[derive(Debug, Clone, Copy)]
pub struct ToleranceWindow {
    interval: TimeDelta,
    half_width: TimeDelta,
}

impl ToleranceWindow {
    /// Creates a window for the given heartbeat interval and width fraction.
    pub fn new(interval: Duration, fraction: f64) -> Self {
        let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
        let width_us = interval.num_microseconds().unwrap_or(i64::MAX) as f64 * fraction.max(0.0);
        Self {
            interval,
            half_width: TimeDelta::microseconds((width_us / 2.0) as i64),
        }
    }

    /// Inclusive `(start, end)` of the window for a tick at `now`.
    ///
    /// Saturates at the earliest representable instant.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let center = now
            .checked_sub_signed(self.interval)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let start = center
            .checked_sub_signed(self.half_width)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = center.checked_add_signed(self.half_width).unwrap_or(now);
        (start, end.min(now))
    }

    /// Decides whether `value` must be written for `kind` at `now`.
    ///
    /// A write is skipped when the latest stored sample carries the same value
    /// and is no older than the window start, i.e. it sits inside the window
    /// or between the window and `now`. A changed value is always written.
    pub fn should_persist<S: Store + ?Sized>(
        &self,
        store: &S,
        kind: SampleKind,
        now: DateTime<Utc>,
        value: f64,
    ) -> StoreResult<bool> {
        let Some(latest) = store.query_latest(kind, now)? else {
            return Ok(true);
        };
        if (latest.value() - value).abs() > VALUE_EPSILON {
            return Ok(true);
        }
        let (start, _) = self.bounds(now);
        Ok(latest.timestamp() < start)
    }
}
