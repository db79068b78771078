use serde::{Deserialize, Serialize};

use crate::devices::types::{AccessoryId, Device};
use crate::error::{EngineError, Result};

/// A switchable household accessory with a fixed draw while on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accessory {
    /// Store-assigned identity.
    pub id: AccessoryId,
    /// Display name.
    pub name: String,
    /// Icon reference for presentation layers.
    pub icon: String,
    /// Cached on/off state.
    pub is_on: bool,
    /// Draw in watts while switched on (>= 0).
    pub power_when_on_w: f64,
}

impl Accessory {
    /// Power currently drawn by this accessory in watts.
    pub fn current_draw_w(&self) -> f64 {
        if self.is_on { self.power_when_on_w } else { 0.0 }
    }
}

impl Device for Accessory {
    fn power_w(&self) -> f64 {
        self.current_draw_w()
    }

    fn device_type(&self) -> &'static str {
        "Accessory"
    }
}

/// An accessory definition that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccessory {
    /// Display name.
    pub name: String,
    /// Icon reference.
    pub icon: String,
    /// Initial on/off state.
    pub is_on: bool,
    /// Draw in watts while switched on.
    pub power_when_on_w: f64,
}

impl NewAccessory {
    /// Creates an accessory definition that starts switched off.
    pub fn new(name: impl Into<String>, icon: impl Into<String>, power_when_on_w: f64) -> Self {
        Self {
            name: name.into(),
            icon: icon.into(),
            is_on: false,
            power_when_on_w,
        }
    }

    /// Returns the definition with the given initial state.
    pub fn switched_on(mut self, is_on: bool) -> Self {
        self.is_on = is_on;
        self
    }

    /// Rejects negative or non-finite power ratings.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] naming the offending accessory.
    pub fn validate(&self) -> Result<()> {
        if !self.power_when_on_w.is_finite() || self.power_when_on_w < 0.0 {
            return Err(EngineError::validation(
                "power_when_on_w",
                format!(
                    "of \"{}\" must be a finite value >= 0, got {}",
                    self.name, self.power_when_on_w
                ),
            ));
        }
        Ok(())
    }

    /// Materializes the accessory under the given id.
    pub fn into_accessory(self, id: AccessoryId) -> Accessory {
        Accessory {
            id,
            name: self.name,
            icon: self.icon,
            is_on: self.is_on,
            power_when_on_w: self.power_when_on_w,
        }
    }
}
