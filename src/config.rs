//! Meter configuration
//!
//! Everything the host configuration layer hands the driver: pin
//! assignments, chip model, calibration constants, mode-switch cadence and
//! the optional sensor declarations.  Values can be built in code
//! ([`MeterConfig::default`]) or loaded from JSON ([`MeterConfig::from_json`]).
//!
//! Invalid configurations never reach the driver: [`MeterConfig::validate`]
//! runs inside [`MeterService::new`](crate::app::service::MeterService::new).

use heapless::String;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fsm::MeasureMode;
use crate::metering::calibration::{ChipModel, FormulaSet};
use crate::pins;

/// Upper bound for `signal_timeout_ms` and `update_interval_ms`.  Edge
/// times are rebuilt from 32-bit µs timestamps, which stay unambiguous for
/// about 35 minutes.
pub const MAX_SIGNAL_TIMEOUT_MS: u32 = 30 * 60 * 1_000;

/// Maximum length of a published sensor name.
pub const SENSOR_NAME_CAP: usize = 32;

// ---------------------------------------------------------------------------
// Sensor metadata
// ---------------------------------------------------------------------------

/// The four quantities the meter can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Voltage,
    Current,
    Power,
    Energy,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [Self::Voltage, Self::Current, Self::Power, Self::Energy];

    /// Config / payload key.
    pub fn key(self) -> &'static str {
        match self {
            Self::Voltage => "voltage",
            Self::Current => "current",
            Self::Power => "power",
            Self::Energy => "energy",
        }
    }

    pub fn unit(self) -> Unit {
        match self {
            Self::Voltage => Unit::Volt,
            Self::Current => Unit::Ampere,
            Self::Power => Unit::Watt,
            Self::Energy => Unit::KilowattHour,
        }
    }

    pub fn default_accuracy_decimals(self) -> u8 {
        match self {
            Self::Voltage | Self::Power => 1,
            Self::Current => 2,
            Self::Energy => 3,
        }
    }

    pub fn state_class(self) -> StateClass {
        match self {
            Self::Energy => StateClass::TotalIncreasing,
            _ => StateClass::Measurement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "V")]
    Volt,
    #[serde(rename = "A")]
    Ampere,
    #[serde(rename = "W")]
    Watt,
    #[serde(rename = "kWh")]
    KilowattHour,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Volt => "V",
            Self::Ampere => "A",
            Self::Watt => "W",
            Self::KilowattHour => "kWh",
        }
    }
}

/// How the publishing sink should treat a value over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    /// Instantaneous reading.
    Measurement,
    /// Cumulative counter that only grows (until an explicit reset).
    TotalIncreasing,
}

/// A sensor as declared in configuration.  Only the name and the precision
/// are user-tunable; unit and classification follow from the quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDecl {
    pub name: String<SENSOR_NAME_CAP>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_decimals: Option<u8>,
}

impl SensorDecl {
    /// Declare a sensor with the default precision for its quantity.
    /// Names longer than [`SENSOR_NAME_CAP`] are truncated.
    pub fn named(name: &str) -> Self {
        let mut s = String::new();
        for c in name.chars() {
            if s.push(c).is_err() {
                break;
            }
        }
        Self {
            name: s,
            accuracy_decimals: None,
        }
    }
}

/// Fully resolved sensor metadata handed to sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    pub kind: SensorKind,
    pub name: String<SENSOR_NAME_CAP>,
    pub unit: Unit,
    pub accuracy_decimals: u8,
    pub device_class: SensorKind,
    pub state_class: StateClass,
}

impl SensorSpec {
    pub fn resolve(kind: SensorKind, decl: &SensorDecl) -> Self {
        Self {
            kind,
            name: decl.name.clone(),
            unit: kind.unit(),
            accuracy_decimals: decl
                .accuracy_decimals
                .unwrap_or_else(|| kind.default_accuracy_decimals()),
            device_class: kind,
            state_class: kind.state_class(),
        }
    }

    /// Round `value` to the declared precision.
    pub fn round(&self, value: f64) -> f64 {
        let scale = 10f64.powi(self.accuracy_decimals as i32);
        (value * scale).round() / scale
    }
}

/// Optional sensor declarations.  An absent entry means the quantity is
/// neither computed nor published.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    pub voltage: Option<SensorDecl>,
    pub current: Option<SensorDecl>,
    pub power: Option<SensorDecl>,
    pub energy: Option<SensorDecl>,
}

impl SensorsConfig {
    /// All four sensors enabled with their default names.
    pub fn all() -> Self {
        Self {
            voltage: Some(SensorDecl::named("Voltage")),
            current: Some(SensorDecl::named("Current")),
            power: Some(SensorDecl::named("Power")),
            energy: Some(SensorDecl::named("Energy")),
        }
    }

    pub fn decl(&self, kind: SensorKind) -> Option<&SensorDecl> {
        match kind {
            SensorKind::Voltage => self.voltage.as_ref(),
            SensorKind::Current => self.current.as_ref(),
            SensorKind::Power => self.power.as_ref(),
            SensorKind::Energy => self.energy.as_ref(),
        }
    }

    pub fn is_enabled(&self, kind: SensorKind) -> bool {
        self.decl(kind).is_some()
    }

    pub fn spec(&self, kind: SensorKind) -> Option<SensorSpec> {
        self.decl(kind).map(|d| SensorSpec::resolve(kind, d))
    }
}

// ---------------------------------------------------------------------------
// MeterConfig
// ---------------------------------------------------------------------------

/// Complete driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    // --- Pins ---
    /// SEL output GPIO.
    pub sel_pin: i32,
    /// CF (power) input GPIO.
    pub cf_pin: i32,
    /// CF1 (current/voltage) input GPIO.
    pub cf1_pin: i32,
    /// Drive SEL with the opposite polarity (some BL0937 boards).
    pub sel_inverted: bool,

    // --- Chip & calibration ---
    pub model: ChipModel,
    /// Current-sense shunt (ohms).
    pub current_resistor: f32,
    /// Voltage-divider ratio of the sampling network.
    pub voltage_divider: f32,
    /// Override the datasheet formula constants for `model`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<FormulaSet>,

    // --- Mode multiplexing ---
    /// Poll ticks between SEL toggles (0 = never toggle).
    pub change_mode_every: u32,
    pub initial_mode: MeasureMode,
    /// CF1 readings are discarded for this long after every SEL toggle.
    pub settle_time_ms: u32,

    // --- Timing ---
    /// A line with no edge for this long reports "no signal".
    pub signal_timeout_ms: u32,
    /// Poll period driven by the external scheduler.
    pub update_interval_ms: u32,

    // --- Outputs ---
    pub sensors: SensorsConfig,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            sel_pin: pins::SEL_GPIO,
            cf_pin: pins::CF_GPIO,
            cf1_pin: pins::CF1_GPIO,
            sel_inverted: false,

            model: ChipModel::Hlw8012,
            current_resistor: 0.001,
            voltage_divider: 2351.0,
            formula: None,

            change_mode_every: 8,
            initial_mode: MeasureMode::Voltage,
            settle_time_ms: 1_000,

            signal_timeout_ms: 10_000,
            update_interval_ms: 60_000, // 1/min

            sensors: SensorsConfig::default(),
        }
    }
}

impl MeterConfig {
    /// Parse and validate a JSON configuration document.  Missing fields
    /// take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|_| ConfigError::Malformed)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Formula constants in effect: the override if present, otherwise the
    /// datasheet set for `model`.
    pub fn formula_set(&self) -> FormulaSet {
        self.formula.unwrap_or_else(|| self.model.formula())
    }

    /// Range-check every field.  Invalid values are rejected, not clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for pin in [self.sel_pin, self.cf_pin, self.cf1_pin] {
            if !(0..=pins::MAX_GPIO).contains(&pin) {
                return Err(ConfigError::ValidationFailed(
                    "pin numbers must be valid GPIOs",
                ));
            }
        }
        if self.sel_pin == self.cf_pin || self.sel_pin == self.cf1_pin || self.cf_pin == self.cf1_pin {
            return Err(ConfigError::ValidationFailed(
                "sel_pin, cf_pin and cf1_pin must be distinct",
            ));
        }
        validate_calibration(self.current_resistor, self.voltage_divider)?;
        if let Some(f) = &self.formula {
            f.validate()?;
        }
        if self.update_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "update_interval_ms must be > 0",
            ));
        }
        if self.signal_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "signal_timeout_ms must be > 0",
            ));
        }
        if self.signal_timeout_ms > MAX_SIGNAL_TIMEOUT_MS || self.update_interval_ms > MAX_SIGNAL_TIMEOUT_MS {
            return Err(ConfigError::ValidationFailed(
                "signal_timeout_ms and update_interval_ms must be <= 30 min",
            ));
        }
        if self.change_mode_every > 0
            && u64::from(self.settle_time_ms)
                >= u64::from(self.change_mode_every) * u64::from(self.update_interval_ms)
        {
            return Err(ConfigError::ValidationFailed(
                "settle_time_ms must be shorter than one mode segment",
            ));
        }
        for kind in SensorKind::ALL {
            if let Some(decl) = self.sensors.decl(kind) {
                if decl.name.is_empty() {
                    return Err(ConfigError::ValidationFailed("sensor name must not be empty"));
                }
                if decl.accuracy_decimals.is_some_and(|d| d > 6) {
                    return Err(ConfigError::ValidationFailed(
                        "accuracy_decimals must be 0–6",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Log the effective configuration (pins, model, constants, sensors).
    pub fn log_config(&self) {
        info!("HLW8012 family meter:");
        info!(
            "  SEL pin: GPIO{}{}",
            self.sel_pin,
            if self.sel_inverted { " (inverted)" } else { "" }
        );
        info!("  CF pin:  GPIO{}", self.cf_pin);
        info!("  CF1 pin: GPIO{}", self.cf1_pin);
        let f = self.formula_set();
        info!(
            "  Model: {}{} (Vref {} V, divisors P={} I={} U={})",
            self.model.name(),
            if self.formula.is_some() { ", custom formula" } else { "" },
            f.reference_voltage,
            f.power_divisor,
            f.current_divisor,
            f.voltage_divisor
        );
        info!(
            "  Current resistor: {} ohm, voltage divider: {}",
            self.current_resistor, self.voltage_divider
        );
        info!(
            "  Change mode every {} ticks, initial mode {:?}, settle {} ms",
            self.change_mode_every, self.initial_mode, self.settle_time_ms
        );
        info!("  Update interval: {} ms", self.update_interval_ms);
        for kind in SensorKind::ALL {
            if let Some(spec) = self.sensors.spec(kind) {
                info!(
                    "  {:?} '{}' [{}] ({} decimals)",
                    kind,
                    spec.name,
                    spec.unit.symbol(),
                    spec.accuracy_decimals
                );
            }
        }
    }
}

/// Both calibration constants must be finite and strictly positive.
pub fn validate_calibration(current_resistor: f32, voltage_divider: f32) -> Result<(), ConfigError> {
    if !(current_resistor.is_finite() && current_resistor > 0.0) {
        return Err(ConfigError::ValidationFailed("current_resistor must be > 0"));
    }
    if !(voltage_divider.is_finite() && voltage_divider > 0.0) {
        return Err(ConfigError::ValidationFailed("voltage_divider must be > 0"));
    }
    Ok(())
}
