//! Aggregate consumption tracking and deduplicated persistence.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::devices::{Accessory, AccessoryId};
use crate::store::{Sample, SampleKind, Store, StoreResult};

use super::tolerance::{ToleranceWindow, VALUE_EPSILON};

/// Total draw and its per-accessory breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsumptionBreakdown {
    pub total_w: f64,
    /// Draw of each accessory, in id order.
    pub per_accessory: Vec<(AccessoryId, f64)>,
}

impl ConsumptionBreakdown {
    /// Sums the current draw of `accessories`.
    pub fn from_accessories<'a>(accessories: impl IntoIterator<Item = &'a Accessory>) -> Self {
        let per_accessory: Vec<(AccessoryId, f64)> = accessories
            .into_iter()
            .map(|a| (a.id, a.current_draw_w()))
            .collect();
        Self {
            total_w: per_accessory.iter().map(|(_, w)| w).sum(),
            per_accessory,
        }
    }

    /// Aggregate sample followed by one sample per accessory, all at `at`.
    pub fn samples(&self, at: DateTime<Utc>) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(self.per_accessory.len() + 1);
        samples.push(Sample::aggregate_consumption(at, self.total_w));
        samples.extend(
            self.per_accessory
                .iter()
                .map(|(id, w)| Sample::accessory_consumption(at, *id, *w)),
        );
        samples
    }
}

/// Holds the published consumption and decides when to persist it.
#[derive(Debug, Clone)]
pub struct ConsumptionAggregator {
    published: ConsumptionBreakdown,
    window: ToleranceWindow,
}

impl ConsumptionAggregator {
    pub fn new(window: ToleranceWindow) -> Self {
        Self {
            published: ConsumptionBreakdown::default(),
            window,
        }
    }

    /// Last published breakdown.
    pub fn published(&self) -> &ConsumptionBreakdown {
        &self.published
    }

    /// Recomputes from accessory states and publishes the result.
    ///
    /// Returns `true` when the total moved.
    pub fn recompute<'a>(&mut self, accessories: impl IntoIterator<Item = &'a Accessory>) -> bool {
        let next = ConsumptionBreakdown::from_accessories(accessories);
        let moved = (next.total_w - self.published.total_w).abs() > VALUE_EPSILON;
        self.published = next;
        moved
    }

    /// Writes the published breakdown at `now` unless the window says the
    /// store already represents it.
    ///
    /// The aggregate series drives the decision; the per-accessory samples
    /// are written in the same batch.
    ///
    /// # Errors
    ///
    /// Propagates store failures; nothing is written in that case.
    pub fn persist<S: Store + ?Sized>(&self, store: &mut S, now: DateTime<Utc>) -> StoreResult<bool> {
        if !self.window.should_persist(
            store,
            SampleKind::AggregateConsumption,
            now,
            self.published.total_w,
        )? {
            return Ok(false);
        }
        store.append_all(self.published.samples(now))?;
        Ok(true)
    }
}
