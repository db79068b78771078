//! Applies due scheduled events to accessory state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::devices::{Accessory, AccessoryId};
use crate::store::{Store, StoreResult};

use super::event::{EventId, ScheduledPowerEvent, sort_events};
use super::types::AppliedTransition;

/// Result of one processing pass.
#[derive(Debug, Clone, Default)]
pub struct ProcessedEvents {
    /// Transitions in the order they were applied.
    pub applied: Vec<AppliedTransition>,
    /// Due events whose accessory is not known; consumed without effect.
    pub orphaned: Vec<ScheduledPowerEvent>,
    /// Accessory states after the pass.
    pub accessories: BTreeMap<AccessoryId, Accessory>,
}

impl ProcessedEvents {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.orphaned.is_empty()
    }
}

/// Applies every event due at `now`, oldest first, and commits atomically.
///
/// The resulting accessory states and the consumed events go to the store in
/// one [`Store::commit_transitions`] call; `accessories` is left untouched and
/// the caller adopts [`ProcessedEvents::accessories`] only on success. Later
/// events for the same accessory win, so two events sharing a timestamp
/// resolve in id order.
///
/// # Errors
///
/// Propagates the store error if the due query or the commit fails.
pub fn process_due<S: Store + ?Sized>(
    store: &mut S,
    accessories: &BTreeMap<AccessoryId, Accessory>,
    now: DateTime<Utc>,
) -> StoreResult<ProcessedEvents> {
    let mut due = store.query_due(now)?;
    if due.is_empty() {
        return Ok(ProcessedEvents {
            accessories: accessories.clone(),
            ..ProcessedEvents::default()
        });
    }
    sort_events(&mut due);

    let mut next = accessories.clone();
    let mut applied = Vec::new();
    let mut orphaned = Vec::new();
    let mut updates: BTreeMap<AccessoryId, bool> = BTreeMap::new();
    let mut consumed: Vec<EventId> = Vec::with_capacity(due.len());

    for event in due {
        consumed.push(event.id);
        let Some(accessory) = next.get_mut(&event.accessory) else {
            orphaned.push(event);
            continue;
        };
        let changed = accessory.is_on != event.target_on;
        accessory.is_on = event.target_on;
        updates.insert(event.accessory, event.target_on);
        applied.push(AppliedTransition {
            event: event.id,
            accessory: event.accessory,
            target_on: event.target_on,
            changed,
        });
    }

    let updates: Vec<(AccessoryId, bool)> = updates.into_iter().collect();
    store.commit_transitions(&updates, &consumed)?;

    Ok(ProcessedEvents {
        applied,
        orphaned,
        accessories: next,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::NewAccessory;
    use crate::sim::event::NewPowerEvent;
    use crate::store::MemoryStore;
    use chrono::TimeDelta;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    fn setup() -> (MemoryStore, BTreeMap<AccessoryId, Accessory>, AccessoryId) {
        let mut store = MemoryStore::new();
        let ids = store
            .insert_accessories(vec![NewAccessory::new("Heater", "flame", 100.0)])
            .expect("insert should succeed");
        let cache = store
            .accessories()
            .expect("read should succeed")
            .into_iter()
            .map(|a| (a.id, a))
            .collect();
        (store, cache, ids[0])
    }

    fn schedule(store: &mut MemoryStore, id: AccessoryId, target_on: bool, secs: i64) {
        store
            .insert_events(vec![NewPowerEvent {
                accessory: id,
                target_on,
                timestamp: at(secs),
            }])
            .expect("insert should succeed");
    }

    #[test]
    fn nothing_due_is_a_no_op() {
        let (mut store, cache, heater) = setup();
        schedule(&mut store, heater, true, 10);
        let out = process_due(&mut store, &cache, at(5)).expect("process should succeed");
        assert!(out.is_empty());
        assert_eq!(store.pending_events().map(|e| e.len()).ok(), Some(1));
    }

    #[test]
    fn due_event_is_applied_and_consumed() {
        let (mut store, cache, heater) = setup();
        schedule(&mut store, heater, true, 10);
        let out = process_due(&mut store, &cache, at(10)).expect("process should succeed");
        assert_eq!(out.applied.len(), 1);
        assert!(out.applied[0].changed);
        assert!(out.accessories[&heater].is_on);
        assert!(!cache[&heater].is_on);
        assert!(store.accessories().expect("read should succeed")[0].is_on);
        assert_eq!(store.pending_events().map(|e| e.len()).ok(), Some(0));
    }

    #[test]
    fn same_timestamp_resolves_in_insertion_order() {
        let (mut store, cache, heater) = setup();
        schedule(&mut store, heater, true, 10);
        schedule(&mut store, heater, false, 10);
        let out = process_due(&mut store, &cache, at(10)).expect("process should succeed");
        assert_eq!(out.applied.len(), 2);
        assert!(!out.accessories[&heater].is_on);
        assert!(!store.accessories().expect("read should succeed")[0].is_on);
    }

    #[test]
    fn redundant_event_is_consumed_unchanged() {
        let (mut store, cache, heater) = setup();
        schedule(&mut store, heater, false, 1);
        let out = process_due(&mut store, &cache, at(1)).expect("process should succeed");
        assert_eq!(out.applied.len(), 1);
        assert!(!out.applied[0].changed);
        assert_eq!(store.pending_events().map(|e| e.len()).ok(), Some(0));
    }

    #[test]
    fn unknown_accessory_is_orphaned() {
        let (mut store, _, heater) = setup();
        schedule(&mut store, heater, true, 1);
        let empty_cache = BTreeMap::new();
        let out = process_due(&mut store, &empty_cache, at(1)).expect("process should succeed");
        assert!(out.applied.is_empty());
        assert_eq!(out.orphaned.len(), 1);
        assert_eq!(store.pending_events().map(|e| e.len()).ok(), Some(0));
        assert!(!store.accessories().expect("read should succeed")[0].is_on);
    }
}
