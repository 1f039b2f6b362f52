//! JSON state-payload sink.
//!
//! Renders one payload per published value, in the shape an MQTT
//! state topic or a home-automation bridge expects:
//!
//! ```json
//! {"sensor":"Power","state":123.4,"unit":"W","device_class":"power","state_class":"measurement"}
//! ```
//!
//! The transport is a callback, so the same sink serves MQTT, a serial
//! bridge or a test vector.

use log::warn;
use serde::Serialize;

use crate::app::events::MeterEvent;
use crate::app::ports::EventSink;
use crate::config::{SensorKind, SensorsConfig, StateClass, Unit};

/// Wire shape of one state payload.
#[derive(Debug, Serialize)]
pub struct StatePayload<'a> {
    pub sensor: &'a str,
    pub state: f64,
    pub unit: Unit,
    pub device_class: SensorKind,
    pub state_class: StateClass,
}

/// Sink that serialises each measurement into [`StatePayload`]s and hands
/// them to `publish(sensor_key, json)`.  Non-measurement events are ignored.
pub struct JsonSink<F> {
    sensors: SensorsConfig,
    publish: F,
}

impl<F: FnMut(&str, &str)> JsonSink<F> {
    pub fn new(sensors: SensorsConfig, publish: F) -> Self {
        Self { sensors, publish }
    }
}

impl<F: FnMut(&str, &str)> EventSink for JsonSink<F> {
    fn emit(&mut self, event: &MeterEvent) {
        let MeterEvent::Measurement(snapshot) = event else {
            return;
        };
        for (kind, value) in snapshot.readings() {
            let Some(spec) = self.sensors.spec(kind) else {
                continue;
            };
            let payload = StatePayload {
                sensor: spec.name.as_str(),
                state: spec.round(value),
                unit: spec.unit,
                device_class: spec.device_class,
                state_class: spec.state_class,
            };
            match serde_json::to_string(&payload) {
                Ok(json) => (self.publish)(kind.key(), &json),
                Err(e) => warn!("{} payload not serialised: {}", kind.key(), e),
            }
        }
    }
}
