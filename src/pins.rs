//! Default GPIO assignments for the meter.
//!
//! These match the Sonoff POW (R1) board, the most common HLW8012 host.
//! Every pin is overridable through [`MeterConfig`](crate::config::MeterConfig);
//! this module only supplies the defaults.

// ---------------------------------------------------------------------------
// HLW8012 family
// ---------------------------------------------------------------------------

/// Digital output: selects what CF1 measures (current or voltage).
pub const SEL_GPIO: i32 = 5;
/// Digital input, rising-edge interrupt: active power pulse train.
pub const CF_GPIO: i32 = 14;
/// Digital input, rising-edge interrupt: multiplexed current/voltage pulses.
pub const CF1_GPIO: i32 = 13;

/// Highest GPIO number accepted by configuration validation (ESP32-S3).
pub const MAX_GPIO: i32 = 48;
