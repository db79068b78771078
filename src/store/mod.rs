//! Time-series and event store contract consumed by the engine.
//!
//! The durable storage engine is an external collaborator; the engine only
//! depends on the [`Store`] trait. [`MemoryStore`] is the in-process
//! reference implementation used by the CLI and the tests.

mod memory;
pub mod sample;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::devices::{Accessory, AccessoryId, NewAccessory};
use crate::sim::event::{EventId, NewPowerEvent, ScheduledPowerEvent};

pub use memory::MemoryStore;
pub use sample::{BatterySample, ConsumptionSample, GeneratorSample, Sample, SampleKind};

/// Failures reported by a store implementation.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backend could not complete the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown {0}")]
    UnknownAccessory(AccessoryId),

    #[error("unknown {0}")]
    UnknownEvent(EventId),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Append/query contract over accessories, samples, and scheduled events.
///
/// All sequence-returning queries are ordered by ascending timestamp;
/// events ascend by `(timestamp, id)`. Time bounds are inclusive.
pub trait Store {
    /// All accessories, ordered by id.
    fn accessories(&self) -> StoreResult<Vec<Accessory>>;

    /// Inserts accessories in one batch and returns their assigned ids.
    fn insert_accessories(&mut self, accessories: Vec<NewAccessory>)
    -> StoreResult<Vec<AccessoryId>>;

    /// Persists a new on/off state for one accessory.
    fn update_accessory(&mut self, id: AccessoryId, is_on: bool) -> StoreResult<()>;

    /// Appends one sample.
    fn append(&mut self, sample: Sample) -> StoreResult<()>;

    /// Appends several samples as one unit; either all or none are stored.
    fn append_all(&mut self, samples: Vec<Sample>) -> StoreResult<()>;

    /// Most recent sample of `kind` with `timestamp <= at_or_before`.
    fn query_latest(
        &self,
        kind: SampleKind,
        at_or_before: DateTime<Utc>,
    ) -> StoreResult<Option<Sample>>;

    /// Samples of `kind` with `from <= timestamp <= to`.
    fn query_range(
        &self,
        kind: SampleKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Sample>>;

    /// Stores events in one batch and returns their ids in input order.
    fn insert_events(&mut self, events: Vec<NewPowerEvent>) -> StoreResult<Vec<EventId>>;

    /// Every event not yet consumed.
    fn pending_events(&self) -> StoreResult<Vec<ScheduledPowerEvent>>;

    /// Events with `timestamp <= now`.
    fn query_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduledPowerEvent>> {
        Ok(self
            .pending_events()?
            .into_iter()
            .take_while(|event| event.is_due(now))
            .collect())
    }

    /// Removes one event.
    fn delete_event(&mut self, id: EventId) -> StoreResult<()>;

    /// Atomically applies accessory state updates and removes consumed events.
    ///
    /// Implementations must leave the store unchanged when any part fails.
    fn commit_transitions(
        &mut self,
        updates: &[(AccessoryId, bool)],
        consumed: &[EventId],
    ) -> StoreResult<()>;
}
