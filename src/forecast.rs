//! Depletion forecasting over the current snapshot and pending event queue.
//!
//! Everything here is a pure function of a [`ForecastInput`]: nothing is
//! written back, so a caller may drop a stale forecast at any time.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::devices::battery::projected_charge;
use crate::devices::{AccessoryId, ChargingState};
use crate::sim::clock::{offset_by_seconds, seconds_between};
use crate::sim::event::{ScheduledPowerEvent, sort_events};

/// Time-to-empty at or below which health is critical.
pub const CRITICAL_WITHIN_SECS: f64 = 3_600.0;
/// Time-to-empty at or below which health is a warning.
pub const WARNING_WITHIN_SECS: f64 = 12.0 * 3_600.0;

/// Load contributed by one accessory to the projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccessoryLoad {
    pub id: AccessoryId,
    pub is_on: bool,
    pub power_when_on_w: f64,
}

/// Stable snapshot the forecast is computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastInput {
    /// Instant the projection starts at.
    pub now: DateTime<Utc>,
    /// Accessory loads keyed by id.
    pub accessories: BTreeMap<AccessoryId, AccessoryLoad>,
    /// Generator output held constant over the projection.
    pub generator_output_w: f64,
    /// Stored energy at `now`.
    pub charge_wh: f64,
    /// Battery capacity.
    pub capacity_wh: f64,
    /// Pending events in processing order.
    pub pending_events: Vec<ScheduledPowerEvent>,
}

impl ForecastInput {
    /// Builds an input, sorting `pending_events` into processing order.
    pub fn new(
        now: DateTime<Utc>,
        accessories: impl IntoIterator<Item = AccessoryLoad>,
        generator_output_w: f64,
        charge_wh: f64,
        capacity_wh: f64,
        mut pending_events: Vec<ScheduledPowerEvent>,
    ) -> Self {
        sort_events(&mut pending_events);
        Self {
            now,
            accessories: accessories.into_iter().map(|a| (a.id, a)).collect(),
            generator_output_w,
            charge_wh,
            capacity_wh,
            pending_events,
        }
    }

    /// Aggregate consumption implied by the accessory states.
    pub fn consumption_w(&self) -> f64 {
        self.accessories
            .values()
            .filter(|a| a.is_on)
            .map(|a| a.power_when_on_w)
            .sum()
    }
}

/// Projected time until the battery runs out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "seconds", rename_all = "snake_case")]
pub enum TimeToEmpty {
    /// Net draw never turns positive over the known schedule.
    Never,
    /// Seconds from the projection start until empty.
    After(f64),
}

impl TimeToEmpty {
    pub fn seconds(&self) -> Option<f64> {
        match self {
            Self::Never => None,
            Self::After(secs) => Some(*secs),
        }
    }
}

impl fmt::Display for TimeToEmpty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("never"),
            Self::After(secs) => {
                let total = secs.round() as u64;
                write!(
                    f,
                    "{}h{:02}m{:02}s",
                    total / 3600,
                    (total % 3600) / 60,
                    total % 60
                )
            }
        }
    }
}

/// Coarse battery health derived from time-to-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

impl HealthLevel {
    /// `<= 1h` critical, `<= 12h` warning, otherwise healthy.
    pub fn from_time_to_empty(time_to_empty: TimeToEmpty) -> Self {
        match time_to_empty {
            TimeToEmpty::After(secs) if secs <= CRITICAL_WITHIN_SECS => Self::Critical,
            TimeToEmpty::After(secs) if secs <= WARNING_WITHIN_SECS => Self::Warning,
            _ => Self::Healthy,
        }
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        })
    }
}

/// Sampling parameters for [`forecast_trajectory`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastSettings {
    /// Spacing of intermediate samples between event boundaries.
    pub step: Duration,
    /// Minimum projection length past `now`.
    pub horizon: Duration,
    /// Minimum charge-level change (fraction of capacity) to emit a point.
    pub level_threshold: f64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(3),
            horizon: Duration::from_secs(15 * 60),
            level_threshold: 0.005,
        }
    }
}

/// One projected sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub consumption_w: f64,
    pub charge_level: f64,
    pub charging_state: ChargingState,
    pub time_to_empty: TimeToEmpty,
}

/// Analytic time until empty, walking the pending events.
///
/// Events that would not change their accessory's effective state are
/// skipped, as are events for accessories the input does not know.
pub fn time_to_empty(input: &ForecastInput) -> TimeToEmpty {
    Projection::start(input).time_to_empty(&input.pending_events)
}

/// Sampled what-if trajectory of consumption and charge.
///
/// The first point is always `now`; later points are emitted only when the
/// charge level moved by more than `settings.level_threshold`. Sampling runs
/// through every pending event and at least `settings.horizon` past `now`.
pub fn forecast_trajectory(input: &ForecastInput, settings: &ForecastSettings) -> Vec<ForecastPoint> {
    let events = &input.pending_events;
    let step_secs = settings.step.as_secs_f64();
    let horizon_end = offset_by_seconds(input.now, settings.horizon.as_secs_f64());

    let mut projection = Projection::start(input);
    let mut points = vec![projection.point(events)];
    let mut next = 0;

    loop {
        while next < events.len() && !projection.is_effective(&events[next]) {
            next += 1;
        }
        let boundary = events.get(next).map(|e| e.timestamp.max(projection.at));
        let segment_end = match boundary {
            Some(ts) => ts,
            None if projection.at < horizon_end => horizon_end,
            None => break,
        };

        if step_secs > 0.0 {
            let span = seconds_between(projection.at, segment_end);
            let mut k = 1_u64;
            while let Some(jump) = points.last().and_then(|last| {
                projection.first_step_past(k, last.charge_level, settings.level_threshold, step_secs)
            }) {
                let offset = jump as f64 * step_secs;
                if offset >= span {
                    break;
                }
                let level = projection.charge_after(offset) / input.capacity_wh;
                if moved_enough(&points, level, settings.level_threshold) {
                    let mut sample = projection.clone();
                    sample.advance_to(offset_by_seconds(projection.at, offset));
                    push_point(&mut points, sample.point(&events[next..]));
                }
                k = jump + 1;
            }
        }

        projection.advance_to(segment_end);
        if boundary.is_some() {
            projection.apply(&events[next]);
            next += 1;
        }
        let level = projection.level();
        if moved_enough(&points, level, settings.level_threshold) {
            push_point(&mut points, projection.point(&events[next..]));
        }
        if boundary.is_none() {
            break;
        }
    }

    points
}

fn moved_enough(points: &[ForecastPoint], level: f64, threshold: f64) -> bool {
    points
        .last()
        .is_none_or(|last| (level - last.charge_level).abs() > threshold)
}

fn push_point(points: &mut Vec<ForecastPoint>, point: ForecastPoint) {
    if points.last().is_none_or(|last| point.timestamp > last.timestamp) {
        points.push(point);
    }
}

/// Mutable replay state over a borrowed input.
#[derive(Debug, Clone)]
struct Projection<'a> {
    input: &'a ForecastInput,
    at: DateTime<Utc>,
    remaining_wh: f64,
    consumption_w: f64,
    states: BTreeMap<AccessoryId, bool>,
}

impl<'a> Projection<'a> {
    fn start(input: &'a ForecastInput) -> Self {
        Self {
            input,
            at: input.now,
            remaining_wh: input.charge_wh.clamp(0.0, input.capacity_wh),
            consumption_w: input.consumption_w(),
            states: input
                .accessories
                .values()
                .map(|a| (a.id, a.is_on))
                .collect(),
        }
    }

    fn draw_w(&self) -> f64 {
        self.consumption_w - self.input.generator_output_w
    }

    fn level(&self) -> f64 {
        self.remaining_wh / self.input.capacity_wh
    }

    fn charge_after(&self, secs: f64) -> f64 {
        projected_charge(self.remaining_wh, self.input.capacity_wh, self.draw_w(), secs)
    }

    /// Earliest step index `>= min_step` at which the level may have moved
    /// more than `threshold` away from `from_level`, or `None` if the
    /// constant draw can never get it there.
    ///
    /// May undershoot by a step; callers re-check the level at the index.
    fn first_step_past(
        &self,
        min_step: u64,
        from_level: f64,
        threshold: f64,
        step_secs: f64,
    ) -> Option<u64> {
        let at_min = self.charge_after(min_step as f64 * step_secs) / self.input.capacity_wh;
        if (at_min - from_level).abs() > threshold {
            return Some(min_step);
        }
        let rate = -self.draw_w() / 3600.0 / self.input.capacity_wh;
        let target = if rate < 0.0 {
            from_level - threshold
        } else if rate > 0.0 {
            from_level + threshold
        } else {
            return None;
        };
        // The level is clamped to [0, 1].
        if (rate < 0.0 && target <= 0.0) || (rate > 0.0 && target >= 1.0) {
            return None;
        }
        let steps = ((target - self.level()) / rate / step_secs).floor();
        // Saturating float-to-int cast; huge jumps land past the segment end.
        let steps = (steps as u64).saturating_sub(1);
        Some(steps.max(min_step))
    }

    fn advance_to(&mut self, instant: DateTime<Utc>) {
        if instant <= self.at {
            return;
        }
        self.remaining_wh = self.charge_after(seconds_between(self.at, instant));
        self.at = instant;
    }

    fn is_effective(&self, event: &ScheduledPowerEvent) -> bool {
        self.states
            .get(&event.accessory)
            .is_some_and(|is_on| *is_on != event.target_on)
    }

    fn apply(&mut self, event: &ScheduledPowerEvent) {
        if !self.is_effective(event) {
            return;
        }
        let Some(load) = self.input.accessories.get(&event.accessory) else {
            return;
        };
        self.states.insert(event.accessory, event.target_on);
        if event.target_on {
            self.consumption_w += load.power_when_on_w;
        } else {
            self.consumption_w -= load.power_when_on_w;
        }
    }

    fn time_to_empty(&self, events: &[ScheduledPowerEvent]) -> TimeToEmpty {
        let mut walk = self.clone();
        if walk.draw_w() > 0.0 && walk.remaining_wh <= 0.0 {
            return TimeToEmpty::After(0.0);
        }

        let mut elapsed = 0.0;
        for event in events {
            if !walk.is_effective(event) {
                continue;
            }
            let at = event.timestamp.max(walk.at);
            let segment = seconds_between(walk.at, at);
            let draw = walk.draw_w();
            if draw > 0.0 && draw * segment / 3600.0 >= walk.remaining_wh {
                return TimeToEmpty::After(elapsed + walk.remaining_wh / draw * 3600.0);
            }
            walk.advance_to(at);
            elapsed += segment;
            walk.apply(event);
        }

        let draw = walk.draw_w();
        if draw <= 0.0 {
            TimeToEmpty::Never
        } else {
            TimeToEmpty::After(elapsed + walk.remaining_wh / draw * 3600.0)
        }
    }

    fn point(&self, upcoming: &[ScheduledPowerEvent]) -> ForecastPoint {
        let level = self.level();
        ForecastPoint {
            timestamp: self.at,
            consumption_w: self.consumption_w,
            charge_level: level,
            charging_state: ChargingState::classify(-self.draw_w(), level),
            time_to_empty: self.time_to_empty(upcoming),
        }
    }
}
