//! Energy engine owning accessory, generator, and battery state.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::devices::types::{Device, net_draw_w};
use crate::devices::{Accessory, AccessoryId, Battery, Generator, NewAccessory};
use crate::devices::battery::projected_charge;
use crate::error::{EngineError, Result};
use crate::forecast::{
    AccessoryLoad, ForecastInput, ForecastPoint, HealthLevel, TimeToEmpty, forecast_trajectory,
    time_to_empty,
};
use crate::store::{Sample, SampleKind, Store};

use super::aggregator::{ConsumptionAggregator, ConsumptionBreakdown};
use super::clock::{Clock, seconds_between};
use super::event::{EventId, NewPowerEvent};
use super::processor::process_due;
use super::tolerance::ToleranceWindow;
use super::types::{AccessoryDraw, BatteryStatus, EngineSnapshot, SimConfig, TickReport};

/// Simulation engine for one household.
///
/// Generic over the store and the clock for static dispatch. All mutation
/// goes through `&mut self`; wrap it in an
/// [`EngineHandle`](super::heartbeat::EngineHandle) to share it with a
/// heartbeat task.
pub struct Engine<S: Store, C: Clock> {
    config: SimConfig,
    store: S,
    clock: C,
    accessories: BTreeMap<AccessoryId, Accessory>,
    generator: Generator,
    battery: Battery,
    /// Instant the battery was last integrated to.
    last_accumulation: Option<DateTime<Utc>>,
    aggregator: ConsumptionAggregator,
    window: ToleranceWindow,
}

impl<S: Store, C: Clock> Engine<S, C> {
    /// Creates an engine, restoring state from `store`.
    ///
    /// Accessories come from the store. Battery charge and generator output
    /// come from their latest persisted samples, falling back to the
    /// configured initial values; a restored battery sample also seeds the
    /// integration start.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] for an invalid `config` and
    /// [`EngineError::Persistence`] if the store cannot be read.
    pub fn new(config: SimConfig, store: S, clock: C) -> Result<Self> {
        config.validate()?;
        let now = clock.now();

        let accessories: BTreeMap<AccessoryId, Accessory> = store
            .accessories()?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let mut battery = Battery::new(config.battery_capacity_wh, config.initial_charge_wh);
        let mut last_accumulation = None;
        if let Some(sample) = store.query_latest(SampleKind::BatteryCharge, now)? {
            battery.restore(sample.value());
            last_accumulation = Some(sample.timestamp());
        }

        let generator_output = store
            .query_latest(SampleKind::GeneratorOutput, now)?
            .map_or(config.initial_generator_output_w, |s| s.value());
        let generator = Generator::new(config.generator_max_output_w, generator_output);

        let window = ToleranceWindow::new(config.heartbeat_interval, config.tolerance_fraction);
        let mut aggregator = ConsumptionAggregator::new(window);
        aggregator.recompute(accessories.values());

        info!(
            accessories = accessories.len(),
            charge_wh = battery.charge_wh(),
            generator_w = generator.output_w(),
            restored = last_accumulation.is_some(),
            "engine initialized"
        );

        Ok(Self {
            config,
            store,
            clock,
            accessories,
            generator,
            battery,
            last_accumulation,
            aggregator,
            window,
        })
    }

    /// Runs one heartbeat: due events, consumption, then battery.
    ///
    /// State is only adopted after the store accepted it, so a failed tick
    /// can simply be retried. A retry integrates the battery over the whole
    /// time since the last successful step.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] when any store call fails.
    pub fn tick(&mut self) -> Result<TickReport> {
        let now = self.clock.now();

        let processed = process_due(&mut self.store, &self.accessories, now)?;
        for orphan in &processed.orphaned {
            warn!(
                event = %orphan.id,
                accessory = %orphan.accessory,
                "consumed event for missing accessory"
            );
        }
        self.accessories = processed.accessories;

        self.aggregator.recompute(self.accessories.values());
        let consumption_persisted = self.aggregator.persist(&mut self.store, now)?;

        let net_w = self.net_draw_w();
        let elapsed = self
            .last_accumulation
            .map_or(0.0, |last| seconds_between(last, now));
        let mut battery = self.battery.clone();
        battery.integrate(net_w, elapsed);

        let battery_persisted = self.window.should_persist(
            &self.store,
            SampleKind::BatteryCharge,
            now,
            battery.charge_wh(),
        )?;
        if battery_persisted {
            self.store.append(Sample::battery(now, battery.charge_wh()))?;
        }
        self.battery = battery;
        self.last_accumulation = Some(self.last_accumulation.map_or(now, |last| last.max(now)));

        debug!(
            applied = processed.applied.len(),
            consumption_w = self.aggregator.published().total_w,
            net_w,
            charge_wh = self.battery.charge_wh(),
            "tick"
        );

        Ok(TickReport {
            timestamp: now,
            applied: processed.applied,
            orphaned: processed.orphaned,
            consumption_w: self.aggregator.published().total_w,
            charge_wh: self.battery.charge_wh(),
            consumption_persisted,
            battery_persisted,
        })
    }

    /// Sets the generator output after persisting it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for values outside
    /// `[0, max_output_w]` and [`EngineError::Persistence`] if the sample
    /// cannot be written. The output is unchanged in both cases.
    pub fn set_generator_output(&mut self, value_w: f64) -> Result<()> {
        self.generator.validate_output(value_w)?;
        let now = self.clock.now();
        self.store.append(Sample::generator(now, value_w))?;
        self.generator.set_output(value_w);
        info!(generator_w = value_w, "generator output set");
        Ok(())
    }

    /// Schedules `accessory` to switch to `target_on` after `delay`.
    ///
    /// With a `duration`, a second event switching back is scheduled at
    /// `delay + duration`. Returns the ids in that order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for an unknown accessory or an
    /// unrepresentable offset.
    pub fn schedule_power_change(
        &mut self,
        accessory: AccessoryId,
        target_on: bool,
        delay: Duration,
        duration: Option<Duration>,
    ) -> Result<Vec<EventId>> {
        if !self.accessories.contains_key(&accessory) {
            return Err(EngineError::validation(
                "accessory",
                format!("{accessory} does not exist"),
            ));
        }
        let now = self.clock.now();
        let start = offset("delay", now, delay)?;
        let mut events = vec![NewPowerEvent {
            accessory,
            target_on,
            timestamp: start,
        }];
        if let Some(duration) = duration {
            events.push(NewPowerEvent {
                accessory,
                target_on: !target_on,
                timestamp: offset("duration", start, duration)?,
            });
        }

        let ids = self.store.insert_events(events)?;
        info!(%accessory, target_on, at = %start, events = ids.len(), "power change scheduled");
        Ok(ids)
    }

    /// Flips an accessory and returns its new state.
    ///
    /// The published consumption follows at the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for an unknown accessory and
    /// [`EngineError::Persistence`] if the store rejects the update.
    pub fn toggle_accessory(&mut self, id: AccessoryId) -> Result<bool> {
        let Some(current) = self.accessories.get(&id).map(|a| a.is_on) else {
            return Err(EngineError::validation("accessory", format!("{id} does not exist")));
        };
        self.store.update_accessory(id, !current)?;
        if let Some(accessory) = self.accessories.get_mut(&id) {
            accessory.is_on = !current;
        }
        info!(accessory = %id, is_on = !current, "accessory toggled");
        Ok(!current)
    }

    /// Adds accessories in one batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if any definition is invalid, in
    /// which case none are added.
    pub fn add_accessories(&mut self, accessories: Vec<NewAccessory>) -> Result<Vec<AccessoryId>> {
        for accessory in &accessories {
            accessory.validate()?;
        }
        let ids = self.store.insert_accessories(accessories.clone())?;
        for (id, accessory) in ids.iter().zip(accessories) {
            self.accessories.insert(*id, accessory.into_accessory(*id));
        }
        info!(count = ids.len(), "accessories added");
        Ok(ids)
    }

    /// Published consumption as of the last tick.
    pub fn consumption(&self) -> &ConsumptionBreakdown {
        self.aggregator.published()
    }

    /// Published aggregate consumption in watts.
    pub fn consumption_w(&self) -> f64 {
        self.aggregator.published().total_w
    }

    /// Battery state as of the last successful tick.
    pub fn battery(&self) -> &Battery {
        &self.battery
    }

    /// Current generator output in watts.
    pub fn generator_output_w(&self) -> f64 {
        self.generator.output_w()
    }

    /// Accessory by id, if registered.
    pub fn accessory(&self, id: AccessoryId) -> Option<&Accessory> {
        self.accessories.get(&id)
    }

    /// Accessories in id order.
    pub fn accessories(&self) -> impl Iterator<Item = &Accessory> {
        self.accessories.values()
    }

    /// Validated engine configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Injected clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Captures the state a forecast needs at the current instant.
    ///
    /// Consumption is recomputed from accessory states, and the charge is
    /// projected forward from the last integration step to now.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] if pending events cannot be read.
    pub fn forecast_input(&self) -> Result<ForecastInput> {
        let now = self.clock.now();
        let since = self
            .last_accumulation
            .map_or(0.0, |last| seconds_between(last, now).max(0.0));
        let charge_wh = projected_charge(
            self.battery.charge_wh(),
            self.battery.capacity_wh,
            self.net_draw_w(),
            since,
        );
        let loads = self.accessories.values().map(|a| AccessoryLoad {
            id: a.id,
            is_on: a.is_on,
            power_when_on_w: a.power_when_on_w,
        });
        Ok(ForecastInput::new(
            now,
            loads,
            self.generator.output_w(),
            charge_wh,
            self.battery.capacity_wh,
            self.store.pending_events()?,
        ))
    }

    /// Time until the battery runs out under the known schedule.
    ///
    /// # Errors
    ///
    /// See [`Engine::forecast_input`].
    pub fn time_to_empty(&self) -> Result<TimeToEmpty> {
        Ok(time_to_empty(&self.forecast_input()?))
    }

    /// Health derived from [`Engine::time_to_empty`].
    ///
    /// # Errors
    ///
    /// See [`Engine::forecast_input`].
    pub fn health(&self) -> Result<HealthLevel> {
        Ok(HealthLevel::from_time_to_empty(self.time_to_empty()?))
    }

    /// Projected trajectory using the configured sampling.
    ///
    /// # Errors
    ///
    /// See [`Engine::forecast_input`].
    pub fn forecast(&self) -> Result<Vec<ForecastPoint>> {
        Ok(forecast_trajectory(&self.forecast_input()?, &self.config.forecast))
    }

    /// Current observable state.
    ///
    /// # Errors
    ///
    /// See [`Engine::forecast_input`].
    pub fn snapshot(&self) -> Result<EngineSnapshot> {
        let input = self.forecast_input()?;
        let tte = time_to_empty(&input);
        Ok(EngineSnapshot {
            timestamp: input.now,
            consumption_w: self.consumption_w(),
            accessories: self
                .accessories
                .values()
                .map(|a| AccessoryDraw {
                    id: a.id,
                    name: a.name.clone(),
                    is_on: a.is_on,
                    draw_w: a.current_draw_w(),
                })
                .collect(),
            generator_output_w: self.generator.output_w(),
            battery: BatteryStatus::from(&self.battery),
            pending_events: input.pending_events.len(),
            time_to_empty: tte,
            health: HealthLevel::from_time_to_empty(tte),
        })
    }

    fn net_draw_w(&self) -> f64 {
        let devices = self
            .accessories
            .values()
            .map(|a| a as &dyn Device)
            .chain(std::iter::once(&self.generator as &dyn Device));
        net_draw_w(devices)
    }
}

fn offset(field: &'static str, from: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .ok_or_else(|| EngineError::validation(field, format!("{duration:?} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::ChargingState;
    use crate::sim::clock::ManualClock;
    use crate::store::MemoryStore;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    fn config() -> SimConfig {
        let mut cfg = SimConfig::new(Duration::from_secs(1), 1_000.0, 500.0);
        cfg.initial_charge_wh = 500.0;
        cfg
    }

    fn engine() -> (Engine<MemoryStore, ManualClock>, ManualClock) {
        let clock = ManualClock::starting_at(epoch());
        let engine = Engine::new(config(), MemoryStore::new(), clock.clone())
            .expect("engine should build");
        (engine, clock)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config();
        cfg.battery_capacity_wh = -1.0;
        let result = Engine::new(cfg, MemoryStore::new(), ManualClock::starting_at(epoch()));
        assert!(matches!(result, Err(EngineError::Configuration(_))));

        let mut cfg = config();
        cfg.heartbeat_interval = Duration::from_secs(u64::MAX);
        let result = Engine::new(cfg, MemoryStore::new(), ManualClock::starting_at(epoch()));
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_first_tick_persists_initial_charge() {
        let (mut engine, _) = engine();
        let report = engine.tick().expect("tick should succeed");
        assert!(report.battery_persisted);
        assert_eq!(report.charge_wh, 500.0);
        assert_eq!(engine.store().samples(SampleKind::BatteryCharge).len(), 1);
    }

    #[test]
    fn test_load_drains_battery() {
        let (mut engine, clock) = engine();
        let ids = engine
            .add_accessories(vec![NewAccessory::new("Heater", "flame", 100.0).switched_on(true)])
            .expect("add should succeed");
        engine.tick().expect("tick should succeed");
        clock.advance(Duration::from_secs(3600));
        engine.tick().expect("tick should succeed");

        assert!((engine.battery().charge_wh() - 400.0).abs() < 1e-9);
        assert_eq!(engine.battery().charging_power_w(), -100.0);
        assert_eq!(engine.battery().charging_state(), ChargingState::Discharging);
        assert_eq!(engine.consumption().per_accessory, vec![(ids[0], 100.0)]);
    }

    #[test]
    fn test_generator_surplus_charges() {
        let (mut engine, clock) = engine();
        engine.set_generator_output(200.0).expect("set should succeed");
        engine.tick().expect("tick should succeed");
        clock.advance(Duration::from_secs(1800));
        engine.tick().expect("tick should succeed");
        assert!((engine.battery().charge_wh() - 600.0).abs() < 1e-9);
        assert_eq!(engine.battery().charging_state(), ChargingState::Charging);
    }

    #[test]
    fn test_invalid_generator_output_is_not_persisted() {
        let (mut engine, _) = engine();
        let err = engine.set_generator_output(501.0);
        assert!(matches!(
            err,
            Err(EngineError::Validation { field: "generator_output_w", .. })
        ));
        assert_eq!(engine.generator_output_w(), 0.0);
        assert!(engine.store().samples(SampleKind::GeneratorOutput).is_empty());
    }

    #[test]
    fn test_schedule_with_duration_creates_pair() {
        let (mut engine, _) = engine();
        let ids = engine
            .add_accessories(vec![NewAccessory::new("Kettle", "cup", 2000.0)])
            .expect("add should succeed");
        let events = engine
            .schedule_power_change(ids[0], true, Duration::from_secs(5), Some(Duration::from_secs(60)))
            .expect("schedule should succeed");
        assert_eq!(events.len(), 2);

        let pending = engine.store().pending_events().expect("read should succeed");
        assert!(pending[0].target_on);
        assert_eq!(pending[0].timestamp, epoch() + TimeDelta::seconds(5));
        assert!(!pending[1].target_on);
        assert_eq!(pending[1].timestamp, epoch() + TimeDelta::seconds(65));
    }

    #[test]
    fn test_unrepresentable_schedule_offsets_rejected() {
        let (mut engine, _) = engine();
        let ids = engine
            .add_accessories(vec![NewAccessory::new("Kettle", "cup", 2000.0)])
            .expect("add should succeed");

        let err = engine.schedule_power_change(ids[0], true, Duration::MAX, None);
        assert!(matches!(err, Err(EngineError::Validation { field: "delay", .. })));

        // Representable as a delta, but past the last representable instant.
        let ages = Duration::from_secs(300_000 * 365 * 24 * 3_600);
        let err = engine.schedule_power_change(ids[0], true, Duration::from_secs(5), Some(ages));
        assert!(matches!(err, Err(EngineError::Validation { field: "duration", .. })));
        assert!(engine.store().pending_events().expect("read should succeed").is_empty());
    }

    #[test]
    fn test_schedule_for_unknown_accessory_rejected() {
        let (mut engine, _) = engine();
        let err = engine.schedule_power_change(AccessoryId(42), true, Duration::ZERO, None);
        assert!(matches!(err, Err(EngineError::Validation { field: "accessory", .. })));
    }

    #[test]
    fn test_toggle_publishes_on_next_tick() {
        let (mut engine, _) = engine();
        let ids = engine
            .add_accessories(vec![NewAccessory::new("Lamp", "bulb", 60.0)])
            .expect("add should succeed");
        assert!(engine.toggle_accessory(ids[0]).expect("toggle should succeed"));
        assert_eq!(engine.consumption_w(), 0.0);
        engine.tick().expect("tick should succeed");
        assert_eq!(engine.consumption_w(), 60.0);
    }

    #[test]
    fn test_invalid_accessory_batch_adds_nothing() {
        let (mut engine, _) = engine();
        let err = engine.add_accessories(vec![
            NewAccessory::new("Ok", "x", 10.0),
            NewAccessory::new("Bad", "x", -10.0),
        ]);
        assert!(err.is_err());
        assert_eq!(engine.accessories().count(), 0);
    }

    #[test]
    fn test_restore_from_store() {
        let clock = ManualClock::starting_at(epoch());
        let mut store = MemoryStore::new();
        store
            .insert_accessories(vec![NewAccessory::new("Fridge", "snow", 150.0).switched_on(true)])
            .expect("insert should succeed");
        store
            .append_all(vec![Sample::battery(epoch(), 250.0), Sample::generator(epoch(), 50.0)])
            .expect("append should succeed");

        clock.advance(Duration::from_secs(36));
        let mut engine = Engine::new(config(), store, clock.clone()).expect("engine should build");
        assert_eq!(engine.battery().charge_wh(), 250.0);
        assert_eq!(engine.generator_output_w(), 50.0);
        assert_eq!(engine.consumption_w(), 150.0);

        // 100 W net over the 36 s since the restored sample.
        engine.tick().expect("tick should succeed");
        assert!((engine.battery().charge_wh() - 249.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_reports_time_to_empty() {
        let (mut engine, _) = engine();
        engine
            .add_accessories(vec![NewAccessory::new("Heater", "flame", 1000.0).switched_on(true)])
            .expect("add should succeed");
        engine.tick().expect("tick should succeed");
        let snapshot = engine.snapshot().expect("snapshot should succeed");
        assert_eq!(snapshot.time_to_empty, TimeToEmpty::After(1800.0));
        assert_eq!(snapshot.health, HealthLevel::Critical);
        assert_eq!(snapshot.accessories.len(), 1);
    }
}
