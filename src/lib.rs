//! CFMeter library: pulse-output energy meter driver for the HLW8012,
//! CSE7759 and BL0937.
//!
//! Exposes the pure-logic modules for integration testing and host
//! simulation.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fsm;
pub mod metering;
pub mod pins;
pub mod sensors;

pub use app::service::MeterService;
pub use config::MeterConfig;
pub use error::{Error, Result};
pub use metering::MeasurementSnapshot;
