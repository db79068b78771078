//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use home_energy_sim::devices::{Accessory, AccessoryId, NewAccessory};
use home_energy_sim::sim::clock::ManualClock;
use home_energy_sim::sim::engine::Engine;
use home_energy_sim::sim::event::{EventId, NewPowerEvent, ScheduledPowerEvent, sort_events};
use home_energy_sim::sim::types::SimConfig;
use home_energy_sim::store::{MemoryStore, Sample, SampleKind, Store, StoreError, StoreResult};

/// Fixed run start (2024-01-01T00:00:00Z).
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}

/// One-second heartbeat with the given battery.
pub fn config(capacity_wh: f64, charge_wh: f64) -> SimConfig {
    let mut cfg = SimConfig::new(Duration::from_secs(1), capacity_wh, 10_000.0);
    cfg.initial_charge_wh = charge_wh;
    cfg
}

/// Engine over an empty [`MemoryStore`] with a manual clock at [`start`].
pub fn manual_engine(cfg: SimConfig) -> (Engine<MemoryStore, ManualClock>, ManualClock) {
    let clock = ManualClock::starting_at(start());
    let engine = Engine::new(cfg, MemoryStore::new(), clock.clone()).expect("engine should build");
    (engine, clock)
}

/// Adds one accessory and returns its id.
pub fn add<S: Store>(
    engine: &mut Engine<S, ManualClock>,
    name: &str,
    power_w: f64,
    on: bool,
) -> AccessoryId {
    engine
        .add_accessories(vec![NewAccessory::new(name, "", power_w).switched_on(on)])
        .expect("add should succeed")[0]
}

/// Advances the clock by one second and ticks, `n` times.
pub fn tick_seconds<S: Store>(engine: &mut Engine<S, ManualClock>, clock: &ManualClock, n: usize) {
    for _ in 0..n {
        clock.advance(Duration::from_secs(1));
        engine.tick().expect("tick should succeed");
    }
}

/// A [`MemoryStore`] that can be switched into a failing state and can hold
/// events the wrapped store would reject.
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: Arc<AtomicBool>,
    injected: Vec<ScheduledPowerEvent>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared switch: `true` makes every call fail.
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failing)
    }

    /// Adds an event without checking that its accessory exists.
    pub fn inject_event(&mut self, event: ScheduledPowerEvent) {
        self.injected.push(event);
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Store for FlakyStore {
    fn accessories(&self) -> StoreResult<Vec<Accessory>> {
        self.check()?;
        self.inner.accessories()
    }

    fn insert_accessories(&mut self, accessories: Vec<NewAccessory>) -> StoreResult<Vec<AccessoryId>> {
        self.check()?;
        self.inner.insert_accessories(accessories)
    }

    fn update_accessory(&mut self, id: AccessoryId, is_on: bool) -> StoreResult<()> {
        self.check()?;
        self.inner.update_accessory(id, is_on)
    }

    fn append(&mut self, sample: Sample) -> StoreResult<()> {
        self.check()?;
        self.inner.append(sample)
    }

    fn append_all(&mut self, samples: Vec<Sample>) -> StoreResult<()> {
        self.check()?;
        self.inner.append_all(samples)
    }

    fn query_latest(&self, kind: SampleKind, at_or_before: DateTime<Utc>) -> StoreResult<Option<Sample>> {
        self.check()?;
        self.inner.query_latest(kind, at_or_before)
    }

    fn query_range(
        &self,
        kind: SampleKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Sample>> {
        self.check()?;
        self.inner.query_range(kind, from, to)
    }

    fn insert_events(&mut self, events: Vec<NewPowerEvent>) -> StoreResult<Vec<EventId>> {
        self.check()?;
        self.inner.insert_events(events)
    }

    fn pending_events(&self) -> StoreResult<Vec<ScheduledPowerEvent>> {
        self.check()?;
        let mut events = self.inner.pending_events()?;
        events.extend(self.injected.iter().cloned());
        sort_events(&mut events);
        Ok(events)
    }

    fn delete_event(&mut self, id: EventId) -> StoreResult<()> {
        self.check()?;
        if let Some(pos) = self.injected.iter().position(|e| e.id == id) {
            self.injected.remove(pos);
            return Ok(());
        }
        self.inner.delete_event(id)
    }

    fn commit_transitions(
        &mut self,
        updates: &[(AccessoryId, bool)],
        consumed: &[EventId],
    ) -> StoreResult<()> {
        self.check()?;
        let (injected, stored): (Vec<EventId>, Vec<EventId>) = consumed
            .iter()
            .copied()
            .partition(|id| self.injected.iter().any(|e| e.id == *id));
        self.inner.commit_transitions(updates, &stored)?;
        self.injected.retain(|e| !injected.contains(&e.id));
        Ok(())
    }
}
