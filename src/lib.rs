//! Household energy simulation and battery depletion forecasting.
//!
//! An [`Engine`](sim::engine::Engine) tracks switchable accessories, a
//! generator and a home battery. Each heartbeat applies due scheduled
//! events, publishes consumption, integrates the battery and persists
//! deduplicated samples through a [`Store`](store::Store). The
//! [`forecast`] module projects time-to-empty and a charge trajectory from
//! the same state.

pub mod cli;
pub mod config;
pub mod devices;
pub mod error;
pub mod forecast;
pub mod io;
/// Engine, heartbeat, event processing and reporting.
pub mod sim;
pub mod store;
