use std::fmt;

use serde::{Deserialize, Serialize};

/// A home battery modeled as a linear watt-hour integrator.
///
/// `Battery` holds its charge within `[0, capacity_wh]` and the instantaneous
/// charging power resulting from the last accumulation step.
///
/// # Power Flow Convention
/// - `net_draw_w` arguments follow the bus convention: positive drains.
/// - `charging_power_w` follows the battery convention: positive charges,
///   negative discharges, zero once the charge is pinned at the bound the
///   flow pushes against.
#[derive(Debug, Clone)]
pub struct Battery {
    /// Usable capacity in watt-hours.
    pub capacity_wh: f64,

    /// Stored energy in watt-hours.
    charge_wh: f64,

    /// Signed flow into the battery after the last step, in watts.
    charging_power_w: f64,

    /// Flow that was requested during the last step, before bound zeroing.
    requested_flow_w: f64,
}

impl Battery {
    /// Creates a battery with the given capacity and initial charge.
    ///
    /// The initial charge is clamped into `[0, capacity_wh]`.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero, negative, or not finite.
    pub fn new(capacity_wh: f64, charge_wh: f64) -> Self {
        assert!(capacity_wh.is_finite() && capacity_wh > 0.0);
        Self {
            capacity_wh,
            charge_wh: clamp_charge(charge_wh, capacity_wh),
            charging_power_w: 0.0,
            requested_flow_w: 0.0,
        }
    }

    /// Stored energy in watt-hours.
    pub fn charge_wh(&self) -> f64 {
        self.charge_wh
    }

    /// Charge normalized to `[0, 1]`.
    pub fn charge_level(&self) -> f64 {
        self.charge_wh / self.capacity_wh
    }

    /// Signed flow into the battery in watts (positive = charging).
    pub fn charging_power_w(&self) -> f64 {
        self.charging_power_w
    }

    /// Classification of the last step's requested flow at the current level.
    pub fn charging_state(&self) -> ChargingState {
        ChargingState::classify(self.requested_flow_w, self.charge_level())
    }

    /// Replaces the stored charge, e.g. when restoring from a persisted sample.
    pub fn restore(&mut self, charge_wh: f64) {
        self.charge_wh = clamp_charge(charge_wh, self.capacity_wh);
    }

    /// Integrates `net_draw_w` over `elapsed_secs` and returns the new charge.
    ///
    /// `charge' = clamp(charge - net_draw * dt / 3600, 0, capacity)`
    pub fn integrate(&mut self, net_draw_w: f64, elapsed_secs: f64) -> f64 {
        let elapsed_secs = elapsed_secs.max(0.0);
        self.charge_wh = projected_charge(
            self.charge_wh,
            self.capacity_wh,
            net_draw_w,
            elapsed_secs,
        );

        let flow_w = -net_draw_w;
        self.requested_flow_w = flow_w;
        let pinned_empty = flow_w < 0.0 && self.charge_wh <= 0.0;
        let pinned_full = flow_w > 0.0 && self.charge_wh >= self.capacity_wh;
        self.charging_power_w = if pinned_empty || pinned_full {
            0.0
        } else {
            flow_w
        };
        self.charge_wh
    }
}

/// Charge after draining `net_draw_w` for `elapsed_secs`, clamped to capacity.
pub fn projected_charge(charge_wh: f64, capacity_wh: f64, net_draw_w: f64, elapsed_secs: f64) -> f64 {
    clamp_charge(charge_wh - net_draw_w * elapsed_secs / 3600.0, capacity_wh)
}

fn clamp_charge(charge_wh: f64, capacity_wh: f64) -> f64 {
    if charge_wh.is_nan() {
        return 0.0;
    }
    charge_wh.clamp(0.0, capacity_wh)
}

/// Battery charging state derived from flow direction and charge level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingState {
    /// Full and not discharging.
    FullyCharged,
    /// Idle below full.
    NotCharging,
    /// Delivering energy.
    Discharging,
    /// Asked to deliver energy with nothing left.
    Empty,
    /// Absorbing energy below full.
    Charging,
}

impl ChargingState {
    /// Classifies `(flow_w, level)` where `flow_w` is positive when charging.
    ///
    /// | flow | level | state |
    /// |---|---|---|
    /// | = 0 | = 1 | fully charged |
    /// | = 0 | < 1 | not charging |
    /// | < 0 | > 0 | discharging |
    /// | < 0 | = 0 | empty |
    /// | > 0 | < 1 | charging |
    /// | > 0 | = 1 | fully charged |
    pub fn classify(flow_w: f64, level: f64) -> Self {
        let full = level >= 1.0;
        if flow_w > 0.0 {
            if full { Self::FullyCharged } else { Self::Charging }
        } else if flow_w < 0.0 {
            if level <= 0.0 { Self::Empty } else { Self::Discharging }
        } else if full {
            Self::FullyCharged
        } else {
            Self::NotCharging
        }
    }
}

impl fmt::Display for ChargingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::FullyCharged => "fully charged",
            Self::NotCharging => "not charging",
            Self::Discharging => "discharging",
            Self::Empty => "empty",
            Self::Charging => "charging",
        };
        f.write_str(label)
    }
}
