//! Measurement math: calibration and energy integration.
//!
//! Nothing in here touches hardware or time sources; callers pass periods
//! and timestamps in.

pub mod calibration;
pub mod energy;

use heapless::Vec;
use serde::Serialize;

use crate::config::{SensorKind, SensorsConfig};

/// The per-tick output bundle handed to the sink.
///
/// A field is `Some` only when its sensor is configured and a value is
/// known.  Values are unrounded; sinks apply each sensor's precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MeasurementSnapshot {
    /// RMS voltage (V).
    pub voltage: Option<f64>,
    /// RMS current (A).
    pub current: Option<f64>,
    /// Active power (W).
    pub power: Option<f64>,
    /// Cumulative energy (kWh).
    pub energy: Option<f64>,
}

impl MeasurementSnapshot {
    pub fn get(&self, kind: SensorKind) -> Option<f64> {
        match kind {
            SensorKind::Voltage => self.voltage,
            SensorKind::Current => self.current,
            SensorKind::Power => self.power,
            SensorKind::Energy => self.energy,
        }
    }

    /// Drop every field whose sensor is not configured.
    pub fn masked(mut self, sensors: &SensorsConfig) -> Self {
        if !sensors.is_enabled(SensorKind::Voltage) {
            self.voltage = None;
        }
        if !sensors.is_enabled(SensorKind::Current) {
            self.current = None;
        }
        if !sensors.is_enabled(SensorKind::Power) {
            self.power = None;
        }
        if !sensors.is_enabled(SensorKind::Energy) {
            self.energy = None;
        }
        self
    }

    /// The present fields in publication order.
    pub fn readings(&self) -> Vec<(SensorKind, f64), 4> {
        let mut out = Vec::new();
        for kind in SensorKind::ALL {
            if let Some(v) = self.get(kind) {
                // Capacity equals SensorKind::ALL.len().
                let _ = out.push((kind, v));
            }
        }
        out
    }
}
