use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::devices::AccessoryId;

/// Identity of a scheduled event, assigned by the store in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event#{}", self.0)
    }
}

/// One-shot transition switching an accessory on or off at a point in time.
///
/// Events are ordered by `(timestamp, id)`; equal timestamps therefore
/// resolve in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPowerEvent {
    /// Store-assigned identity.
    pub id: EventId,
    /// Accessory to switch.
    pub accessory: AccessoryId,
    /// State the accessory should have after the event.
    pub target_on: bool,
    /// When the event becomes due.
    pub timestamp: DateTime<Utc>,
}

impl ScheduledPowerEvent {
    /// Processing order key.
    pub fn order_key(&self) -> (DateTime<Utc>, EventId) {
        (self.timestamp, self.id)
    }

    /// Returns `true` once `now` has reached the event's timestamp.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.timestamp <= now
    }
}

/// An event that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPowerEvent {
    /// Accessory to switch.
    pub accessory: AccessoryId,
    /// Target state.
    pub target_on: bool,
    /// When the event becomes due.
    pub timestamp: DateTime<Utc>,
}

impl NewPowerEvent {
    /// Materializes the event under the given id.
    pub fn into_event(self, id: EventId) -> ScheduledPowerEvent {
        ScheduledPowerEvent {
            id,
            accessory: self.accessory,
            target_on: self.target_on,
            timestamp: self.timestamp,
        }
    }
}

/// Sorts events into processing order.
pub fn sort_events(events: &mut [ScheduledPowerEvent]) {
    events.sort_by_key(ScheduledPowerEvent::order_key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn event(id: u64, offset_secs: i64) -> ScheduledPowerEvent {
        let base = DateTime::<Utc>::UNIX_EPOCH;
        ScheduledPowerEvent {
            id: EventId(id),
            accessory: AccessoryId(1),
            target_on: true,
            timestamp: base + TimeDelta::seconds(offset_secs),
        }
    }

    #[test]
    fn due_at_and_after_timestamp() {
        let e = event(1, 5);
        let base = DateTime::<Utc>::UNIX_EPOCH;
        assert!(!e.is_due(base + TimeDelta::seconds(4)));
        assert!(e.is_due(base + TimeDelta::seconds(5)));
        assert!(e.is_due(base + TimeDelta::seconds(6)));
    }

    #[test]
    fn ties_sort_by_insertion_id() {
        let mut events = vec![event(3, 10), event(2, 10), event(1, 20), event(4, 0)];
        sort_events(&mut events);
        let ids: Vec<u64> = events.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
    }
}
