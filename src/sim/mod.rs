/// Aggregation of accessory draw into published consumption.
pub mod aggregator;
/// Clock sources for deterministic and wall-time runs.
pub mod clock;
pub mod engine;
/// Scheduled one-shot power events.
pub mod event;
pub mod heartbeat;
pub mod kpi;
pub mod processor;
pub mod tolerance;
pub mod types;
