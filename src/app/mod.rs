//! Application core: per-tick metering orchestration, zero direct I/O.
//!
//! [`service::MeterService`] wires pulse capture, the mode controller,
//! calibration and energy integration together.  Everything outside the
//! chip's pulse lines is reached through the **port traits** in [`ports`]
//! (clock, event sink, storage) or through `embedded-hal` for the SEL pin,
//! so the whole core runs on the host with mock adapters.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
