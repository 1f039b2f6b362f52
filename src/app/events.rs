//! Outbound meter events.
//!
//! The [`MeterService`](super::service::MeterService) emits these through
//! the [`EventSink`](super::ports::EventSink) port.

use crate::fsm::MeasureMode;
use crate::metering::MeasurementSnapshot;

/// Structured events emitted by the meter core.
#[derive(Debug, Clone, PartialEq)]
pub enum MeterEvent {
    /// The service started; SEL has been driven for `mode`.
    Started { mode: MeasureMode },

    /// SEL was toggled.
    ModeChanged { from: MeasureMode, to: MeasureMode },

    /// One poll tick's published values.  Only configured sensors are
    /// present.
    Measurement(MeasurementSnapshot),

    /// The energy total was zeroed on request.
    EnergyReset,

    /// New calibration constants are in effect.
    Recalibrated {
        current_resistor: f32,
        voltage_divider: f32,
    },
}
