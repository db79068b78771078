//! Core engine types: configuration, published snapshots, and tick reports.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::devices::{AccessoryId, Battery, ChargingState};
use crate::error::{EngineError, Result};
use crate::forecast::{ForecastSettings, HealthLevel, TimeToEmpty};

use super::event::{EventId, ScheduledPowerEvent};

/// Longest accepted heartbeat interval.
pub const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(24 * 3_600);
/// Longest accepted forecast step or horizon.
pub const MAX_FORECAST_SPAN: Duration = Duration::from_secs(366 * 24 * 3_600);

/// Engine configuration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use home_energy_sim::sim::types::SimConfig;
///
/// let cfg = SimConfig::new(Duration::from_secs(1), 5_000.0, 3_000.0);
/// assert!(cfg.validate().is_ok());
/// assert_eq!(cfg.initial_charge_wh, 5_000.0);
/// ```
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Period of the heartbeat and nominal spacing of persisted samples.
    pub heartbeat_interval: Duration,
    /// Width of the dedup window as a fraction of the interval.
    pub tolerance_fraction: f64,
    /// Battery capacity.
    pub battery_capacity_wh: f64,
    /// Charge used when the store holds no battery sample.
    pub initial_charge_wh: f64,
    /// Generator rating.
    pub generator_max_output_w: f64,
    /// Output used when the store holds no generator sample.
    pub initial_generator_output_w: f64,
    /// Trajectory sampling.
    pub forecast: ForecastSettings,
}

impl SimConfig {
    /// Creates a configuration with a full battery and an idle generator.
    pub fn new(
        heartbeat_interval: Duration,
        battery_capacity_wh: f64,
        generator_max_output_w: f64,
    ) -> Self {
        Self {
            heartbeat_interval,
            tolerance_fraction: 0.1,
            battery_capacity_wh,
            initial_charge_wh: battery_capacity_wh,
            generator_max_output_w,
            initial_generator_output_w: 0.0,
            forecast: ForecastSettings::default(),
        }
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(EngineError::Configuration(msg.to_string()));
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval > MAX_HEARTBEAT_INTERVAL {
            return fail("heartbeat_interval must be in (0, 24h]");
        }
        if !(self.tolerance_fraction.is_finite() && (0.0..1.0).contains(&self.tolerance_fraction))
        {
            return fail("tolerance_fraction must be in [0, 1)");
        }
        if !(self.battery_capacity_wh.is_finite() && self.battery_capacity_wh > 0.0) {
            return fail("battery_capacity_wh must be > 0");
        }
        if !(self.initial_charge_wh.is_finite()
            && (0.0..=self.battery_capacity_wh).contains(&self.initial_charge_wh))
        {
            return fail("initial_charge_wh must be in [0, battery_capacity_wh]");
        }
        if !(self.generator_max_output_w.is_finite() && self.generator_max_output_w >= 0.0) {
            return fail("generator_max_output_w must be >= 0");
        }
        if !(self.initial_generator_output_w.is_finite()
            && (0.0..=self.generator_max_output_w).contains(&self.initial_generator_output_w))
        {
            return fail("initial_generator_output_w must be in [0, generator_max_output_w]");
        }
        if self.forecast.step.is_zero() || self.forecast.step > MAX_FORECAST_SPAN {
            return fail("forecast step must be in (0, 366d]");
        }
        if self.forecast.horizon > MAX_FORECAST_SPAN {
            return fail("forecast horizon must be <= 366d");
        }
        if !(self.forecast.level_threshold.is_finite() && self.forecast.level_threshold >= 0.0) {
            return fail("forecast level_threshold must be >= 0");
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 5_000.0, 3_000.0)
    }
}

/// Per-accessory view in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessoryDraw {
    pub id: AccessoryId,
    pub name: String,
    pub is_on: bool,
    pub draw_w: f64,
}

/// Battery view in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatteryStatus {
    pub charge_wh: f64,
    pub capacity_wh: f64,
    pub charge_level: f64,
    /// Positive when charging, zero when pinned at a bound.
    pub charging_power_w: f64,
    pub state: ChargingState,
}

impl From<&Battery> for BatteryStatus {
    fn from(battery: &Battery) -> Self {
        Self {
            charge_wh: battery.charge_wh(),
            capacity_wh: battery.capacity_wh,
            charge_level: battery.charge_level(),
            charging_power_w: battery.charging_power_w(),
            state: battery.charging_state(),
        }
    }
}

/// Everything subscribers observe after a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Published aggregate consumption.
    pub consumption_w: f64,
    pub accessories: Vec<AccessoryDraw>,
    pub generator_output_w: f64,
    pub battery: BatteryStatus,
    pub pending_events: usize,
    pub time_to_empty: TimeToEmpty,
    pub health: HealthLevel,
}

impl fmt::Display for EngineSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | load={:>8.1}W gen={:>8.1}W | batt={:>6.1}% ({:.1}Wh, {}, {:+.1}W) | pending={} | empty in {} [{}]",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S"),
            self.consumption_w,
            self.generator_output_w,
            self.battery.charge_level * 100.0,
            self.battery.charge_wh,
            self.battery.state,
            self.battery.charging_power_w,
            self.pending_events,
            self.time_to_empty,
            self.health,
        )
    }
}

/// One applied accessory transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AppliedTransition {
    pub event: EventId,
    pub accessory: AccessoryId,
    pub target_on: bool,
    /// `false` when the accessory was already in the target state.
    pub changed: bool,
}

/// Outcome of one heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    pub applied: Vec<AppliedTransition>,
    /// Events consumed without effect because their accessory is unknown.
    pub orphaned: Vec<ScheduledPowerEvent>,
    pub consumption_w: f64,
    pub charge_wh: f64,
    pub consumption_persisted: bool,
    pub battery_persisted: bool,
}
