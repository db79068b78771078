//! TOML-based scenario configuration and preset definitions.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::devices::NewAccessory;
use crate::forecast::ForecastSettings;
use crate::sim::types::{MAX_FORECAST_SPAN, MAX_HEARTBEAT_INTERVAL, SimConfig};

/// Latest accepted offset for a scheduled change, and longest duration.
pub const MAX_SCHEDULE_SECS: f64 = 10.0 * 365.0 * 24.0 * 3_600.0;

/// Top-level scenario configuration parsed from TOML.
///
/// All sections have defaults matching the baseline scenario. Load from
/// TOML with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Heartbeat timing and run length.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Home battery parameters.
    #[serde(default)]
    pub battery: BatteryConfig,
    /// Generator rating and starting output.
    #[serde(default)]
    pub generator: GeneratorConfig,
    /// Trajectory sampling.
    #[serde(default)]
    pub forecast: ForecastConfig,
    /// Accessories seeded into an empty store.
    #[serde(default)]
    pub accessories: Vec<AccessoryConfig>,
    /// Power changes scheduled at startup.
    #[serde(default)]
    pub schedule: Vec<ScheduleConfig>,
}

/// Heartbeat timing and run length.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Heartbeat period in milliseconds (must be > 0).
    pub heartbeat_ms: u64,
    /// Dedup window width as a fraction of the heartbeat (0.0-1.0).
    pub tolerance_fraction: f64,
    /// Number of heartbeats to run.
    pub ticks: usize,
    /// RFC 3339 start instant for stepped runs.
    pub start: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 1_000,
            tolerance_fraction: 0.1,
            ticks: 600,
            start: "2024-01-01T00:00:00Z".to_string(),
        }
    }
}

/// Home battery parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    /// Usable capacity (Wh).
    pub capacity_wh: f64,
    /// Charge at startup when the store has none (Wh).
    pub initial_charge_wh: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_wh: 10_000.0,
            initial_charge_wh: 8_000.0,
        }
    }
}

/// Generator rating and starting output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Rated maximum output (W).
    pub max_output_w: f64,
    /// Output at startup (W).
    pub initial_output_w: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_output_w: 5_000.0,
            initial_output_w: 0.0,
        }
    }
}

/// Trajectory sampling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForecastConfig {
    /// Spacing between intermediate samples (s).
    pub step_secs: f64,
    /// Minimum projection length (s).
    pub horizon_secs: f64,
    /// Minimum charge-level change to emit a point (fraction of capacity).
    pub level_threshold: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            step_secs: 3.0,
            horizon_secs: 900.0,
            level_threshold: 0.005,
        }
    }
}

/// One accessory definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessoryConfig {
    /// Unique name, referenced from `[[schedule]]`.
    pub name: String,
    #[serde(default)]
    pub icon: String,
    /// Draw while on (W).
    pub power_w: f64,
    /// Initial state.
    #[serde(default)]
    pub on: bool,
}

/// One scheduled power change, relative to the run start.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Name of the accessory to switch.
    pub accessory: String,
    /// Target state.
    pub on: bool,
    /// Offset from the run start (s).
    pub at_secs: f64,
    /// When set, switch back after this many seconds.
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.heartbeat_ms"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn accessory(name: &str, icon: &str, power_w: f64, on: bool) -> AccessoryConfig {
    AccessoryConfig {
        name: name.to_string(),
        icon: icon.to_string(),
        power_w,
        on,
    }
}

fn change(accessory: &str, on: bool, at_secs: f64, duration_secs: Option<f64>) -> ScheduleConfig {
    ScheduleConfig {
        accessory: accessory.to_string(),
        on,
        at_secs,
        duration_secs,
    }
}

impl ScenarioConfig {
    /// Returns the baseline scenario: a modest household on battery alone.
    pub fn baseline() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            battery: BatteryConfig::default(),
            generator: GeneratorConfig::default(),
            forecast: ForecastConfig::default(),
            accessories: vec![
                accessory("Fridge", "snowflake", 150.0, true),
                accessory("Lights", "lightbulb", 200.0, false),
                accessory("Kettle", "cup", 2_000.0, false),
            ],
            schedule: vec![
                change("Lights", true, 5.0, Some(240.0)),
                change("Kettle", true, 30.0, Some(180.0)),
            ],
        }
    }

    /// Returns the evening-peak preset: heavy loads on a half-empty battery.
    pub fn evening_peak() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            battery: BatteryConfig {
                capacity_wh: 5_000.0,
                initial_charge_wh: 1_500.0,
            },
            generator: GeneratorConfig::default(),
            forecast: ForecastConfig::default(),
            accessories: vec![
                accessory("Heat pump", "thermometer", 3_000.0, true),
                accessory("Oven", "oven", 2_400.0, false),
                accessory("Lights", "lightbulb", 300.0, true),
                accessory("TV", "tv", 150.0, false),
            ],
            schedule: vec![
                change("Oven", true, 10.0, Some(1_800.0)),
                change("TV", true, 60.0, None),
                change("Heat pump", false, 3_600.0, None),
            ],
        }
    }

    /// Returns the solar-surplus preset: generation exceeds household draw.
    pub fn solar_surplus() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            battery: BatteryConfig {
                capacity_wh: 10_000.0,
                initial_charge_wh: 5_000.0,
            },
            generator: GeneratorConfig {
                max_output_w: 6_000.0,
                initial_output_w: 4_000.0,
            },
            forecast: ForecastConfig::default(),
            accessories: vec![
                accessory("Fridge", "snowflake", 150.0, true),
                accessory("Washer", "washer", 900.0, false),
            ],
            schedule: vec![change("Washer", true, 20.0, Some(3_600.0))],
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "evening_peak", "solar_surplus"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "evening_peak" => Ok(Self::evening_peak()),
            "solar_surplus" => Ok(Self::solar_surplus()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Heartbeat period.
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.simulation.heartbeat_ms)
    }

    /// Parsed `simulation.start`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the value is not RFC 3339.
    pub fn start_time(&self) -> Result<DateTime<Utc>, ConfigError> {
        DateTime::parse_from_rfc3339(&self.simulation.start)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| ConfigError::new("simulation.start", format!("not RFC 3339: {e}")))
    }

    /// Engine configuration derived from this scenario.
    ///
    /// Out-of-range spans map to [`Duration::MAX`] so that
    /// [`SimConfig::validate`] rejects them.
    pub fn sim_config(&self) -> SimConfig {
        SimConfig {
            heartbeat_interval: self.heartbeat(),
            tolerance_fraction: self.simulation.tolerance_fraction,
            battery_capacity_wh: self.battery.capacity_wh,
            initial_charge_wh: self.battery.initial_charge_wh,
            generator_max_output_w: self.generator.max_output_w,
            initial_generator_output_w: self.generator.initial_output_w,
            forecast: ForecastSettings {
                step: seconds_or_max(self.forecast.step_secs),
                horizon: seconds_or_max(self.forecast.horizon_secs),
                level_threshold: self.forecast.level_threshold,
            },
        }
    }

    /// Accessory definitions in declaration order.
    pub fn new_accessories(&self) -> Vec<NewAccessory> {
        self.accessories
            .iter()
            .map(|a| NewAccessory::new(&a.name, &a.icon, a.power_w).switched_on(a.on))
            .collect()
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = &self.simulation;

        if s.heartbeat_ms == 0 || self.heartbeat() > MAX_HEARTBEAT_INTERVAL {
            errors.push(ConfigError::new(
                "simulation.heartbeat_ms",
                format!("must be in [1, {}]", MAX_HEARTBEAT_INTERVAL.as_millis()),
            ));
        }
        if !(0.0..1.0).contains(&s.tolerance_fraction) {
            errors.push(ConfigError::new(
                "simulation.tolerance_fraction",
                "must be in [0.0, 1.0)",
            ));
        }
        if let Err(e) = self.start_time() {
            errors.push(e);
        }

        let bat = &self.battery;
        if !(bat.capacity_wh.is_finite() && bat.capacity_wh > 0.0) {
            errors.push(ConfigError::new("battery.capacity_wh", "must be > 0"));
        }
        if !(0.0..=bat.capacity_wh).contains(&bat.initial_charge_wh) {
            errors.push(ConfigError::new(
                "battery.initial_charge_wh",
                "must be in [0, battery.capacity_wh]",
            ));
        }

        let generator = &self.generator;
        if !(generator.max_output_w.is_finite() && generator.max_output_w >= 0.0) {
            errors.push(ConfigError::new("generator.max_output_w", "must be >= 0"));
        }
        if !(0.0..=generator.max_output_w).contains(&generator.initial_output_w) {
            errors.push(ConfigError::new(
                "generator.initial_output_w",
                "must be in [0, generator.max_output_w]",
            ));
        }

        let fc = &self.forecast;
        let max_span = MAX_FORECAST_SPAN.as_secs_f64();
        if !(fc.step_secs > 0.0 && fc.step_secs <= max_span) {
            errors.push(ConfigError::new(
                "forecast.step_secs",
                format!("must be in (0, {max_span}]"),
            ));
        }
        if !(0.0..=max_span).contains(&fc.horizon_secs) {
            errors.push(ConfigError::new(
                "forecast.horizon_secs",
                format!("must be in [0, {max_span}]"),
            ));
        }
        if !(fc.level_threshold.is_finite() && fc.level_threshold >= 0.0) {
            errors.push(ConfigError::new("forecast.level_threshold", "must be >= 0"));
        }

        let mut names = HashSet::new();
        for (i, a) in self.accessories.iter().enumerate() {
            if !names.insert(a.name.as_str()) {
                errors.push(ConfigError::new(
                    format!("accessories[{i}].name"),
                    format!("duplicate accessory \"{}\"", a.name),
                ));
            }
            if !(a.power_w.is_finite() && a.power_w >= 0.0) {
                errors.push(ConfigError::new(format!("accessories[{i}].power_w"), "must be >= 0"));
            }
        }

        for (i, change) in self.schedule.iter().enumerate() {
            if !names.contains(change.accessory.as_str()) {
                errors.push(ConfigError::new(
                    format!("schedule[{i}].accessory"),
                    format!("no accessory named \"{}\"", change.accessory),
                ));
            }
            if !(0.0..=MAX_SCHEDULE_SECS).contains(&change.at_secs) {
                errors.push(ConfigError::new(
                    format!("schedule[{i}].at_secs"),
                    format!("must be in [0, {MAX_SCHEDULE_SECS}]"),
                ));
            }
            if change
                .duration_secs
                .is_some_and(|d| !(d > 0.0 && d <= MAX_SCHEDULE_SECS))
            {
                errors.push(ConfigError::new(
                    format!("schedule[{i}].duration_secs"),
                    format!("must be in (0, {MAX_SCHEDULE_SECS}]"),
                ));
            }
        }

        errors
    }
}

/// Float seconds as a `Duration`, or [`Duration::MAX`] when unrepresentable.
pub fn seconds_or_max(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
