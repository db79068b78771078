//! Engine error taxonomy.

use thiserror::Error;

use crate::devices::AccessoryId;
use crate::sim::event::EventId;
use crate::store::StoreError;

/// Errors surfaced by engine construction, commands, and ticks.
///
/// Cloneable so tick failures can be fanned out on the heartbeat's
/// broadcast error channel.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The engine or scenario configuration is unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A command argument was rejected before any state was touched.
    #[error("validation error: {field} {message}")]
    Validation {
        /// Name of the rejected argument.
        field: &'static str,
        /// Constraint that was violated.
        message: String,
    },

    /// The backing store failed to read or write.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// A scheduled event points at an accessory that does not exist.
    #[error("inconsistent state: event {event} references missing accessory {accessory}")]
    InconsistentState {
        /// The offending event.
        event: EventId,
        /// The accessory it referenced.
        accessory: AccessoryId,
    },
}

impl EngineError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Convenience alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
