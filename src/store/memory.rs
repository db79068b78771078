use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{Sample, SampleKind, Store, StoreError, StoreResult};
use crate::devices::{Accessory, AccessoryId, NewAccessory};
use crate::sim::event::{EventId, NewPowerEvent, ScheduledPowerEvent, sort_events};

/// In-memory [`Store`] keeping every series sorted by timestamp.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    accessories: BTreeMap<AccessoryId, Accessory>,
    series: BTreeMap<SampleKind, Vec<Sample>>,
    events: BTreeMap<EventId, ScheduledPowerEvent>,
    next_accessory_id: u64,
    next_event_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored sample of `kind`, oldest first.
    pub fn samples(&self, kind: SampleKind) -> &[Sample] {
        self.series.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Kinds that currently hold at least one sample.
    pub fn kinds(&self) -> impl Iterator<Item = SampleKind> + '_ {
        self.series.keys().copied()
    }

    fn insert_sorted(&mut self, sample: Sample) {
        let series = self.series.entry(sample.kind()).or_default();
        let ts = sample.timestamp();
        let at = series.partition_point(|s| s.timestamp() <= ts);
        series.insert(at, sample);
    }
}

impl Store for MemoryStore {
    fn accessories(&self) -> StoreResult<Vec<Accessory>> {
        Ok(self.accessories.values().cloned().collect())
    }

    fn insert_accessories(
        &mut self,
        accessories: Vec<NewAccessory>,
    ) -> StoreResult<Vec<AccessoryId>> {
        let mut ids = Vec::with_capacity(accessories.len());
        for accessory in accessories {
            self.next_accessory_id += 1;
            let id = AccessoryId(self.next_accessory_id);
            self.accessories.insert(id, accessory.into_accessory(id));
            ids.push(id);
        }
        Ok(ids)
    }

    fn update_accessory(&mut self, id: AccessoryId, is_on: bool) -> StoreResult<()> {
        let accessory = self
            .accessories
            .get_mut(&id)
            .ok_or(StoreError::UnknownAccessory(id))?;
        accessory.is_on = is_on;
        Ok(())
    }

    fn append(&mut self, sample: Sample) -> StoreResult<()> {
        self.insert_sorted(sample);
        Ok(())
    }

    fn append_all(&mut self, samples: Vec<Sample>) -> StoreResult<()> {
        for sample in samples {
            self.insert_sorted(sample);
        }
        Ok(())
    }

    fn query_latest(
        &self,
        kind: SampleKind,
        at_or_before: DateTime<Utc>,
    ) -> StoreResult<Option<Sample>> {
        let series = self.samples(kind);
        let end = series.partition_point(|s| s.timestamp() <= at_or_before);
        Ok(end.checked_sub(1).map(|i| series[i]))
    }

    fn query_range(
        &self,
        kind: SampleKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Sample>> {
        if from > to {
            return Ok(Vec::new());
        }
        let series = self.samples(kind);
        let start = series.partition_point(|s| s.timestamp() < from);
        let end = series.partition_point(|s| s.timestamp() <= to);
        Ok(series[start..end].to_vec())
    }

    fn insert_events(&mut self, events: Vec<NewPowerEvent>) -> StoreResult<Vec<EventId>> {
        if let Some(missing) = events
            .iter()
            .find(|e| !self.accessories.contains_key(&e.accessory))
        {
            return Err(StoreError::UnknownAccessory(missing.accessory));
        }
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            self.next_event_id += 1;
            let id = EventId(self.next_event_id);
            self.events.insert(id, event.into_event(id));
            ids.push(id);
        }
        Ok(ids)
    }

    fn pending_events(&self) -> StoreResult<Vec<ScheduledPowerEvent>> {
        let mut events: Vec<ScheduledPowerEvent> = self.events.values().cloned().collect();
        sort_events(&mut events);
        Ok(events)
    }

    fn delete_event(&mut self, id: EventId) -> StoreResult<()> {
        self.events
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::UnknownEvent(id))
    }

    fn commit_transitions(
        &mut self,
        updates: &[(AccessoryId, bool)],
        consumed: &[EventId],
    ) -> StoreResult<()> {
        // Validate everything before mutating so a failure leaves no trace.
        if let Some((id, _)) = updates
            .iter()
            .find(|(id, _)| !self.accessories.contains_key(id))
        {
            return Err(StoreError::UnknownAccessory(*id));
        }
        if let Some(id) = consumed.iter().find(|id| !self.events.contains_key(id)) {
            return Err(StoreError::UnknownEvent(*id));
        }

        for (id, is_on) in updates {
            if let Some(accessory) = self.accessories.get_mut(id) {
                accessory.is_on = *is_on;
            }
        }
        for id in consumed {
            self.events.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    fn store_with_lamp() -> (MemoryStore, AccessoryId) {
        let mut store = MemoryStore::new();
        let ids = store
            .insert_accessories(vec![NewAccessory::new("Lamp", "lightbulb", 60.0)])
            .expect("insert should succeed");
        (store, ids[0])
    }

    #[test]
    fn ids_are_assigned_in_insertion_order() {
        let mut store = MemoryStore::new();
        let ids = store
            .insert_accessories(vec![
                NewAccessory::new("A", "a", 1.0),
                NewAccessory::new("B", "b", 2.0),
            ])
            .expect("insert should succeed");
        assert_eq!(ids, vec![AccessoryId(1), AccessoryId(2)]);
    }

    #[test]
    fn latest_is_at_or_before() {
        let mut store = MemoryStore::new();
        for secs in [0, 10, 20] {
            store
                .append(Sample::battery(at(secs), secs as f64))
                .expect("append should succeed");
        }
        let latest = store
            .query_latest(SampleKind::BatteryCharge, at(15))
            .expect("query should succeed");
        assert_eq!(latest.map(|s| s.value()), Some(10.0));
        let exact = store
            .query_latest(SampleKind::BatteryCharge, at(20))
            .expect("query should succeed");
        assert_eq!(exact.map(|s| s.value()), Some(20.0));
        let none = store
            .query_latest(SampleKind::BatteryCharge, at(-1))
            .expect("query should succeed");
        assert!(none.is_none());
    }

    #[test]
    fn range_is_inclusive_and_sorted() {
        let mut store = MemoryStore::new();
        for secs in [30, 10, 20, 0] {
            store
                .append(Sample::generator(at(secs), secs as f64))
                .expect("append should succeed");
        }
        let values: Vec<f64> = store
            .query_range(SampleKind::GeneratorOutput, at(10), at(30))
            .expect("query should succeed")
            .iter()
            .map(Sample::value)
            .collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn series_are_kept_apart() {
        let (mut store, lamp) = store_with_lamp();
        store
            .append_all(vec![
                Sample::aggregate_consumption(at(0), 60.0),
                Sample::accessory_consumption(at(0), lamp, 60.0),
            ])
            .expect("append should succeed");
        assert_eq!(store.samples(SampleKind::AggregateConsumption).len(), 1);
        assert_eq!(store.samples(SampleKind::AccessoryConsumption(lamp)).len(), 1);
        assert!(store.samples(SampleKind::BatteryCharge).is_empty());
    }

    #[test]
    fn due_events_stop_at_now() {
        let (mut store, lamp) = store_with_lamp();
        store
            .insert_events(vec![
                NewPowerEvent { accessory: lamp, target_on: false, timestamp: at(9) },
                NewPowerEvent { accessory: lamp, target_on: true, timestamp: at(3) },
            ])
            .expect("insert should succeed");
        let due = store.query_due(at(5)).expect("query should succeed");
        assert_eq!(due.len(), 1);
        assert!(due[0].target_on);
    }

    #[test]
    fn events_for_unknown_accessories_are_rejected() {
        let mut store = MemoryStore::new();
        let err = store.insert_events(vec![NewPowerEvent {
            accessory: AccessoryId(99),
            target_on: true,
            timestamp: at(0),
        }]);
        assert!(matches!(err, Err(StoreError::UnknownAccessory(AccessoryId(99)))));
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let (mut store, lamp) = store_with_lamp();
        let ids = store
            .insert_events(vec![NewPowerEvent {
                accessory: lamp,
                target_on: true,
                timestamp: at(0),
            }])
            .expect("insert should succeed");

        let err = store.commit_transitions(&[(lamp, true)], &[ids[0], EventId(404)]);
        assert!(err.is_err());
        let accessories = store.accessories().expect("read should succeed");
        assert!(!accessories[0].is_on);
        assert_eq!(store.pending_events().map(|e| e.len()).ok(), Some(1));

        store
            .commit_transitions(&[(lamp, true)], &ids)
            .expect("commit should succeed");
        let accessories = store.accessories().expect("read should succeed");
        assert!(accessories[0].is_on);
        assert_eq!(store.pending_events().map(|e| e.len()).ok(), Some(0));
    }
}
