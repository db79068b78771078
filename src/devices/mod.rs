//! Device models for the household energy bus.

/// Switchable household accessories.
pub mod accessory;
/// Home battery storage model.
pub mod battery;
/// Settable household generator.
pub mod generator;
pub mod types;

// Re-export the main types for convenience
pub use accessory::{Accessory, NewAccessory};
pub use battery::{Battery, ChargingState};
pub use generator::Generator;
pub use types::{AccessoryId, Device};
