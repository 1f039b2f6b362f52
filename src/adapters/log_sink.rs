//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing meter events to the `log` facade
//! (UART / USB-CDC in production).  Each value is rounded to its sensor's
//! declared precision before printing.

use log::info;

use crate::app::events::MeterEvent;
use crate::app::ports::EventSink;
use crate::config::SensorsConfig;

/// Adapter that logs every [`MeterEvent`] to the serial console.
pub struct LogEventSink {
    sensors: SensorsConfig,
}

impl LogEventSink {
    pub fn new(sensors: SensorsConfig) -> Self {
        Self { sensors }
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &MeterEvent) {
        match event {
            MeterEvent::Measurement(snapshot) => {
                for (kind, value) in snapshot.readings() {
                    if let Some(spec) = self.sensors.spec(kind) {
                        info!(
                            "METER | {} = {:.*} {}",
                            spec.name,
                            spec.accuracy_decimals as usize,
                            value,
                            spec.unit.symbol()
                        );
                    }
                }
            }
            MeterEvent::ModeChanged { from, to } => {
                info!("MODE  | {} -> {}", from.name(), to.name());
            }
            MeterEvent::Started { mode } => {
                info!("START | mode={}", mode.name());
            }
            MeterEvent::EnergyReset => {
                info!("RESET | energy total zeroed");
            }
            MeterEvent::Recalibrated {
                current_resistor,
                voltage_divider,
            } => {
                info!(
                    "CALIB | current_resistor={} voltage_divider={}",
                    current_resistor, voltage_divider
                );
            }
        }
    }
}
