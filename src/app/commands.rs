//! Inbound commands to the meter service.
//!
//! These represent actions requested by the outside world (a number
//! entity in the home-automation frontend, a serial console, MQTT) that
//! the [`MeterService`](super::service::MeterService) interprets.

/// Commands that external adapters can send into the meter core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeterCommand {
    /// Zero the accumulated energy.
    ResetEnergy,

    /// Replace the shunt resistance (ohms) and voltage-divider ratio.
    /// Rejected if either is not finite and > 0.
    Recalibrate {
        current_resistor: f32,
        voltage_divider: f32,
    },
}
