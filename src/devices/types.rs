//! Common types and traits for household device models.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of an accessory, assigned by the store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccessoryId(pub u64);

impl fmt::Display for AccessoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accessory#{}", self.0)
    }
}

/// Trait defining a device that draws from or feeds the home battery bus.
///
/// # Power Flow Convention (Bus)
/// - Positive power: draw (consumes stored energy)
/// - Negative power: generation (replenishes stored energy)
pub trait Device {
    /// Returns the device's instantaneous power in watts.
    fn power_w(&self) -> f64;

    /// Returns a human-readable type name for the device.
    fn device_type(&self) -> &'static str;
}

/// Net draw on the battery bus from a set of devices, in bus convention.
///
/// Performs pure summation with **no sign flipping**: accessories contribute
/// positive draw and generators negative draw.
pub fn net_draw_w<'a>(devices: impl IntoIterator<Item = &'a dyn Device>) -> f64 {
    devices.into_iter().map(Device::power_w).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl Device for Fixed {
        fn power_w(&self) -> f64 {
            self.0
        }

        fn device_type(&self) -> &'static str {
            "Fixed"
        }
    }

    #[test]
    fn loads_and_generation_sum_without_sign_flip() {
        let load = Fixed(120.0);
        let heater = Fixed(800.0);
        let panel = Fixed(-500.0);
        let devices: [&dyn Device; 3] = [&load, &heater, &panel];
        assert_eq!(net_draw_w(devices), 420.0);
    }

    #[test]
    fn empty_bus_draws_nothing() {
        assert_eq!(net_draw_w(std::iter::empty()), 0.0);
    }

    #[test]
    fn accessory_id_display() {
        assert_eq!(AccessoryId(7).to_string(), "accessory#7");
    }
}
