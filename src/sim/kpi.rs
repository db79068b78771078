//! Post-hoc energy report computed from stored series.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::{Sample, SampleKind, Store, StoreResult};

use super::clock::seconds_between;

/// Energy summary over a stored time range.
///
/// Series are step functions: each stored value holds until the next
/// sample, and the value in force at `from` is taken from the latest
/// sample at or before it. Deduplicated samples therefore integrate to the
/// same energy as the full series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Energy drawn by accessories (Wh).
    pub consumed_wh: f64,
    /// Energy produced by the generator (Wh).
    pub generated_wh: f64,
    /// Highest aggregate consumption seen (W).
    pub peak_consumption_w: f64,
    /// Lowest stored battery charge (Wh), if any was stored.
    pub min_charge_wh: Option<f64>,
    /// Highest stored battery charge (Wh), if any was stored.
    pub max_charge_wh: Option<f64>,
    /// Battery charge in force at `to`.
    pub final_charge_wh: Option<f64>,
    pub consumption_samples: usize,
    pub generator_samples: usize,
    pub battery_samples: usize,
}

impl EnergyReport {
    /// Builds the report for `from..=to`.
    ///
    /// # Errors
    ///
    /// Propagates store read failures.
    pub fn from_store<S: Store + ?Sized>(
        store: &S,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Self> {
        let consumption = HeldSeries::load(store, SampleKind::AggregateConsumption, from, to)?;
        let generation = HeldSeries::load(store, SampleKind::GeneratorOutput, from, to)?;
        let battery = HeldSeries::load(store, SampleKind::BatteryCharge, from, to)?;

        let charges = || battery.values();
        Ok(Self {
            from,
            to,
            consumed_wh: consumption.energy_wh(to),
            generated_wh: generation.energy_wh(to),
            peak_consumption_w: consumption.values().fold(0.0, f64::max),
            min_charge_wh: charges().reduce(f64::min),
            max_charge_wh: charges().reduce(f64::max),
            final_charge_wh: charges().last(),
            consumption_samples: consumption.samples.len(),
            generator_samples: generation.samples.len(),
            battery_samples: battery.samples.len(),
        })
    }
}

/// Samples in range plus the value in force at the range start.
struct HeldSeries {
    from: DateTime<Utc>,
    initial: Option<f64>,
    samples: Vec<Sample>,
}

impl HeldSeries {
    fn load<S: Store + ?Sized>(
        store: &S,
        kind: SampleKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Self> {
        let initial = store
            .query_latest(kind, from)?
            .filter(|s| s.timestamp() < from)
            .map(|s| s.value());
        Ok(Self {
            from,
            initial,
            samples: store.query_range(kind, from, to)?,
        })
    }

    fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.initial
            .into_iter()
            .chain(self.samples.iter().map(Sample::value))
    }

    /// Sample-and-hold integral up to `to`, in Wh.
    fn energy_wh(&self, to: DateTime<Utc>) -> f64 {
        let mut held = self.initial.map(|v| (self.from, v));
        let mut joules = 0.0;
        for sample in &self.samples {
            if let Some((since, value)) = held {
                joules += value * seconds_between(since, sample.timestamp());
            }
            held = Some((sample.timestamp(), sample.value()));
        }
        if let Some((since, value)) = held {
            joules += value * seconds_between(since, to).max(0.0);
        }
        joules / 3600.0
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1} Wh"))
}

impl fmt::Display for EnergyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Energy Report ---")?;
        writeln!(
            f,
            "Window:                {} .. {}",
            self.from.format("%Y-%m-%dT%H:%M:%S"),
            self.to.format("%Y-%m-%dT%H:%M:%S")
        )?;
        writeln!(f, "Energy consumed:       {:.2} Wh", self.consumed_wh)?;
        writeln!(f, "Energy generated:      {:.2} Wh", self.generated_wh)?;
        writeln!(f, "Peak consumption:      {:.1} W", self.peak_consumption_w)?;
        writeln!(
            f,
            "Battery charge:        min {} / max {} / final {}",
            fmt_opt(self.min_charge_wh),
            fmt_opt(self.max_charge_wh),
            fmt_opt(self.final_charge_wh)
        )?;
        write!(
            f,
            "Samples stored:        {} consumption, {} generator, {} battery",
            self.consumption_samples, self.generator_samples, self.battery_samples
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeDelta;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    #[test]
    fn empty_store() {
        let store = MemoryStore::new();
        let report = EnergyReport::from_store(&store, at(0), at(60)).expect("report");
        assert_eq!(report.consumed_wh, 0.0);
        assert_eq!(report.min_charge_wh, None);
        assert_eq!(report.consumption_samples, 0);
    }

    #[test]
    fn held_values_integrate_to_the_end() {
        // 3600 W for 10 s, then 0 W: 10 Wh.
        let mut store = MemoryStore::new();
        store
            .append_all(vec![
                Sample::aggregate_consumption(at(0), 3600.0),
                Sample::aggregate_consumption(at(10), 0.0),
            ])
            .expect("append");
        let report = EnergyReport::from_store(&store, at(0), at(100)).expect("report");
        assert!((report.consumed_wh - 10.0).abs() < 1e-9);
        assert_eq!(report.peak_consumption_w, 3600.0);
    }

    #[test]
    fn value_before_window_is_carried_in() {
        // Generator set to 360 W long before the window: 10 s inside = 1 Wh.
        let mut store = MemoryStore::new();
        store.append(Sample::generator(at(-500), 360.0)).expect("append");
        let report = EnergyReport::from_store(&store, at(0), at(10)).expect("report");
        assert!((report.generated_wh - 1.0).abs() < 1e-9);
        assert_eq!(report.generator_samples, 0);
    }

    #[test]
    fn charge_extremes() {
        let mut store = MemoryStore::new();
        for (secs, wh) in [(0, 50.0), (1, 40.0), (2, 70.0), (3, 60.0)] {
            store.append(Sample::battery(at(secs), wh)).expect("append");
        }
        let report = EnergyReport::from_store(&store, at(0), at(3)).expect("report");
        assert_eq!(report.min_charge_wh, Some(40.0));
        assert_eq!(report.max_charge_wh, Some(70.0));
        assert_eq!(report.final_charge_wh, Some(60.0));
        assert_eq!(report.battery_samples, 4);
    }

    #[test]
    fn display_has_header() {
        let store = MemoryStore::new();
        let report = EnergyReport::from_store(&store, at(0), at(1)).expect("report");
        assert!(report.to_string().starts_with("--- Energy Report ---"));
    }
}
