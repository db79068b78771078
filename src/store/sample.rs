//! Time-series sample records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::devices::AccessoryId;

/// Typed series selector used by store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// Whole-home consumption.
    AggregateConsumption,
    /// Consumption of one accessory.
    AccessoryConsumption(AccessoryId),
    /// Generator output.
    GeneratorOutput,
    /// Battery charge.
    BatteryCharge,
}

impl SampleKind {
    /// Short series label used in exports and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AggregateConsumption => "consumption",
            Self::AccessoryConsumption(_) => "accessory_consumption",
            Self::GeneratorOutput => "generator_output",
            Self::BatteryCharge => "battery_charge",
        }
    }
}

/// Consumption at a point in time; `accessory == None` is the aggregate total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionSample {
    pub timestamp: DateTime<Utc>,
    pub power_w: f64,
    pub accessory: Option<AccessoryId>,
}

/// Generator output after a change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSample {
    pub timestamp: DateTime<Utc>,
    pub power_w: f64,
}

/// Battery charge after an accumulation step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatterySample {
    pub timestamp: DateTime<Utc>,
    pub charge_wh: f64,
}

/// Any persisted sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "series", rename_all = "snake_case")]
pub enum Sample {
    Consumption(ConsumptionSample),
    Generator(GeneratorSample),
    Battery(BatterySample),
}

impl Sample {
    /// Series this sample belongs to.
    pub fn kind(&self) -> SampleKind {
        match self {
            Self::Consumption(s) => match s.accessory {
                Some(id) => SampleKind::AccessoryConsumption(id),
                None => SampleKind::AggregateConsumption,
            },
            Self::Generator(_) => SampleKind::GeneratorOutput,
            Self::Battery(_) => SampleKind::BatteryCharge,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Consumption(s) => s.timestamp,
            Self::Generator(s) => s.timestamp,
            Self::Battery(s) => s.timestamp,
        }
    }

    /// Watts for power series, watt-hours for the battery series.
    pub fn value(&self) -> f64 {
        match self {
            Self::Consumption(s) => s.power_w,
            Self::Generator(s) => s.power_w,
            Self::Battery(s) => s.charge_wh,
        }
    }

    pub fn aggregate_consumption(timestamp: DateTime<Utc>, power_w: f64) -> Self {
        Self::Consumption(ConsumptionSample {
            timestamp,
            power_w,
            accessory: None,
        })
    }

    pub fn accessory_consumption(
        timestamp: DateTime<Utc>,
        accessory: AccessoryId,
        power_w: f64,
    ) -> Self {
        Self::Consumption(ConsumptionSample {
            timestamp,
            power_w,
            accessory: Some(accessory),
        })
    }

    pub fn generator(timestamp: DateTime<Utc>, power_w: f64) -> Self {
        Self::Generator(GeneratorSample { timestamp, power_w })
    }

    pub fn battery(timestamp: DateTime<Utc>, charge_wh: f64) -> Self {
        Self::Battery(BatterySample {
            timestamp,
            charge_wh,
        })
    }
}
