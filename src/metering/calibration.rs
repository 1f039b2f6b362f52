//! Pulse frequency → physical unit conversion.
//!
//! All three supported chips output a pulse train whose frequency is
//! proportional to the measured quantity:
//!
//! ```text
//!   P [W] = P_mult · f_CF          P_mult = Vref² · divider / (R · power_divisor)
//!   I [A] = I_mult · f_CF1         I_mult = Vref / (R · current_divisor)
//!   U [V] = V_mult · f_CF1         V_mult = Vref · divider / voltage_divisor
//! ```
//!
//! `R` is the current-sense shunt and `divider` the voltage-sampling ratio.
//! The chip-specific part is captured by [`FormulaSet`]; the multipliers
//! are computed once when a [`Calibrator`] is built.

use serde::{Deserialize, Serialize};

use crate::config::validate_calibration;
use crate::error::ConfigError;
use crate::fsm::MeasureMode;
use crate::metering::MeasurementSnapshot;

/// HLW8012 / CSE7759 internal oscillator (Hz).
const HLW8012_CLOCK_HZ: f64 = 3_579_000.0;
/// HLW8012 / CSE7759 internal voltage reference (V).
const HLW8012_VREF: f64 = 2.43;
/// BL0937 internal voltage reference (V).
const BL0937_VREF: f64 = 1.218;

/// Supported chip variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChipModel {
    #[serde(rename = "HLW8012")]
    Hlw8012,
    #[serde(rename = "CSE7759")]
    Cse7759,
    #[serde(rename = "BL0937")]
    Bl0937,
}

impl ChipModel {
    pub fn name(self) -> &'static str {
        match self {
            Self::Hlw8012 => "HLW8012",
            Self::Cse7759 => "CSE7759",
            Self::Bl0937 => "BL0937",
        }
    }

    /// Datasheet formula constants for this chip.
    pub fn formula(self) -> FormulaSet {
        match self {
            // CSE7759 is a pin- and formula-compatible HLW8012 clone.
            Self::Hlw8012 | Self::Cse7759 => FormulaSet {
                reference_voltage: HLW8012_VREF,
                power_divisor: 24.0 * HLW8012_CLOCK_HZ / 64.0,
                current_divisor: 24.0 * HLW8012_CLOCK_HZ / 512.0,
                voltage_divisor: HLW8012_CLOCK_HZ / 256.0,
            },
            Self::Bl0937 => FormulaSet {
                reference_voltage: BL0937_VREF,
                power_divisor: 1_750_000.0,
                current_divisor: 95_000.0,
                voltage_divisor: 15_500.0,
            },
        }
    }
}

/// The chip-specific constants of the frequency formulas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormulaSet {
    /// Internal reference voltage (V).
    pub reference_voltage: f64,
    pub power_divisor: f64,
    pub current_divisor: f64,
    pub voltage_divisor: f64,
}

impl FormulaSet {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let all_positive = [
            self.reference_voltage,
            self.power_divisor,
            self.current_divisor,
            self.voltage_divisor,
        ]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0);
        if all_positive {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed(
                "formula constants must be finite and > 0",
            ))
        }
    }
}

/// Immutable calibration inputs.  Build with [`new`](Self::new) or
/// [`with_formula`](Self::with_formula); replace rather than mutate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationConstants {
    model: ChipModel,
    /// Current-sense shunt (ohms), > 0.
    current_resistor: f32,
    /// Voltage-divider ratio, > 0.
    voltage_divider: f32,
    formula: FormulaSet,
}

impl CalibrationConstants {
    /// Constants using the datasheet formula for `model`.
    pub fn new(model: ChipModel, current_resistor: f32, voltage_divider: f32) -> Self {
        Self::with_formula(model, current_resistor, voltage_divider, None)
    }

    /// Constants with an optional formula override; `None` selects the
    /// datasheet formula for `model`.
    pub fn with_formula(
        model: ChipModel,
        current_resistor: f32,
        voltage_divider: f32,
        formula: Option<FormulaSet>,
    ) -> Self {
        Self {
            model,
            current_resistor,
            voltage_divider,
            formula: formula.unwrap_or_else(|| model.formula()),
        }
    }

    /// Same model and formula, new circuit constants.  Validates them
    /// because this is the entry point for live recalibration.
    pub fn with_circuit(self, current_resistor: f32, voltage_divider: f32) -> Result<Self, ConfigError> {
        validate_calibration(current_resistor, voltage_divider)?;
        Ok(Self {
            current_resistor,
            voltage_divider,
            ..self
        })
    }

    pub fn model(&self) -> ChipModel {
        self.model
    }

    pub fn current_resistor(&self) -> f32 {
        self.current_resistor
    }

    pub fn voltage_divider(&self) -> f32 {
        self.voltage_divider
    }

    pub fn formula(&self) -> &FormulaSet {
        &self.formula
    }
}

/// Units per hertz, computed once per set of constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Multipliers {
    pub power: f64,
    pub current: f64,
    pub voltage: f64,
}

impl Multipliers {
    fn from_constants(c: &CalibrationConstants) -> Self {
        let f = &c.formula;
        let r = c.current_resistor as f64;
        let div = c.voltage_divider as f64;
        let vref = f.reference_voltage;
        Self {
            power: vref * vref * div / (r * f.power_divisor),
            current: vref / (r * f.current_divisor),
            voltage: vref * div / f.voltage_divisor,
        }
    }
}

/// Pure conversion from pulse periods to physical values.
///
/// Never validates its inputs; constants are assumed positive (see
/// [`MeterConfig::validate`](crate::config::MeterConfig::validate)).
#[derive(Debug, Clone)]
pub struct Calibrator {
    constants: CalibrationConstants,
    multipliers: Multipliers,
}

impl Calibrator {
    pub fn new(constants: CalibrationConstants) -> Self {
        Self {
            multipliers: Multipliers::from_constants(&constants),
            constants,
        }
    }

    pub fn constants(&self) -> &CalibrationConstants {
        &self.constants
    }

    pub fn multipliers(&self) -> &Multipliers {
        &self.multipliers
    }

    /// Active power (W) from the CF period.
    pub fn power(&self, cf_period_us: Option<u32>) -> f64 {
        self.multipliers.power * frequency_hz(cf_period_us)
    }

    /// RMS current (A) from a CF1 period measured in current mode.
    pub fn current(&self, cf1_period_us: Option<u32>) -> f64 {
        self.multipliers.current * frequency_hz(cf1_period_us)
    }

    /// RMS voltage (V) from a CF1 period measured in voltage mode.
    pub fn voltage(&self, cf1_period_us: Option<u32>) -> f64 {
        self.multipliers.voltage * frequency_hz(cf1_period_us)
    }

    /// Interpret a CF1 period according to the mode it was measured in.
    pub fn mux(&self, mode: MeasureMode, cf1_period_us: Option<u32>) -> f64 {
        match mode {
            MeasureMode::Current => self.current(cf1_period_us),
            MeasureMode::Voltage => self.voltage(cf1_period_us),
        }
    }

    /// One-shot conversion of both lines.  Only the quantity `mode` selects
    /// is filled in; energy is left to the accumulator.
    pub fn compute(
        &self,
        cf_period_us: Option<u32>,
        cf1_period_us: Option<u32>,
        mode: MeasureMode,
    ) -> MeasurementSnapshot {
        let mux = self.mux(mode, cf1_period_us);
        MeasurementSnapshot {
            power: Some(self.power(cf_period_us)),
            voltage: (mode == MeasureMode::Voltage).then_some(mux),
            current: (mode == MeasureMode::Current).then_some(mux),
            energy: None,
        }
    }
}

/// Pulse frequency in Hz; zero for an absent (or zero-length) period.
pub fn frequency_hz(period_us: Option<u32>) -> f64 {
    match period_us {
        Some(p) if p > 0 => 1_000_000.0 / p as f64,
        _ => 0.0,
    }
}
