//! Meter service: the hexagonal core.
//!
//! [`MeterService`] owns the pulse capture, the mode controller, the
//! calibrator, the energy accumulator and the SEL pin.  The scheduler calls
//! [`MeterService::tick`] once per update interval; edge interrupts feed
//! the pulse lines through [`EdgeHandle`]s.
//!
//! ```text
//!  EdgeHandle ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!       Clock ──▶ │        MeterService          │
//!                 │ capture · mode · cal · energy│ ──▶ SEL (OutputPin)
//!                 └──────────────────────────────┘
//! ```

use embedded_hal::digital::OutputPin;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{MeterConfig, SensorKind};
use crate::error::{GpioError, Result, StorageError};
use crate::fsm::{MeasureMode, ModeController};
use crate::metering::MeasurementSnapshot;
use crate::metering::calibration::{CalibrationConstants, Calibrator};
use crate::metering::energy::EnergyAccumulator;
use crate::sensors::{EdgeHandle, LineId, LineSample, PulseCapture};

use super::commands::MeterCommand;
use super::events::MeterEvent;
use super::ports::{Clock, EventSink, StoragePort};

const CHECKPOINT_NAMESPACE: &str = "cfmeter";
const CHECKPOINT_KEY: &str = "energy";
const CHECKPOINT_VERSION: u8 = 1;

/// Persisted energy total.  Written only when the consumer asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyCheckpoint {
    pub version: u8,
    pub energy_kwh: f64,
}

/// Runtime counters for a status page or a support dump.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeterDiagnostics {
    pub running: bool,
    pub tick_count: u64,
    pub mode: MeasureMode,
    pub mode_switches: u32,
    pub cf_edges: u32,
    pub cf1_edges: u32,
    pub energy_kwh: f64,
}

// ───────────────────────────────────────────────────────────────
// MeterService
// ───────────────────────────────────────────────────────────────

/// One metering chip: pulse lines in, calibrated values out.
pub struct MeterService<SEL> {
    config: MeterConfig,
    sel: SEL,
    capture: PulseCapture,
    mode: ModeController,
    calibrator: Calibrator,
    energy: EnergyAccumulator,
    /// Last valid multiplexed readings, carried forward while CF1 measures
    /// the other quantity.
    last_voltage: Option<f64>,
    last_current: Option<f64>,
    tick_count: u64,
    running: bool,
}

impl<SEL: OutputPin> MeterService<SEL> {
    /// Validate `config` and build the service around the SEL pin.
    ///
    /// Does **not** touch the pin. Call [`start`](Self::start) next.
    pub fn new(config: MeterConfig, sel: SEL) -> Result<Self> {
        config.validate()?;
        let constants = CalibrationConstants::with_formula(
            config.model,
            config.current_resistor,
            config.voltage_divider,
            config.formula,
        );
        let capture = PulseCapture::new(config.signal_timeout_ms as u64 * 1_000);
        let mode = ModeController::new(
            config.initial_mode,
            config.change_mode_every,
            config.settle_time_ms as u64 * 1_000,
        );

        Ok(Self {
            calibrator: Calibrator::new(constants),
            energy: EnergyAccumulator::new(),
            last_voltage: None,
            last_current: None,
            tick_count: 0,
            running: false,
            capture,
            mode,
            sel,
            config,
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Drive SEL for the initial mode and start measuring.
    ///
    /// Also used to resume after [`stop`](Self::stop): the energy total is
    /// kept, but the stopped interval is not integrated and readings from
    /// before the stop are not carried forward.
    pub fn start(&mut self, clock: &impl Clock, sink: &mut impl EventSink) -> Result<()> {
        let now = clock.now_us();
        let mode = self.mode.mode();
        self.write_sel(mode)?;
        self.capture.start(now);
        self.mode.start(now);
        self.energy.clear_baseline();
        self.last_voltage = None;
        self.last_current = None;
        self.running = true;
        sink.emit(&MeterEvent::Started { mode });
        info!("Meter started ({}, {})", self.config.model.name(), mode.name());
        Ok(())
    }

    /// Ignore further edges.  Detaching the interrupts is up to whoever
    /// bound them.
    pub fn stop(&mut self) {
        self.capture.stop();
        self.running = false;
        info!("Meter stopped after {} ticks", self.tick_count);
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one poll cycle: sample lines → advance mode → convert →
    /// integrate → publish.
    ///
    /// Returns the published snapshot.  Before `start` (or after `stop`)
    /// nothing is measured and an empty snapshot is returned.
    pub fn tick(
        &mut self,
        clock: &impl Clock,
        sink: &mut impl EventSink,
    ) -> Result<MeasurementSnapshot> {
        if !self.running {
            return Ok(MeasurementSnapshot::default());
        }
        let now = clock.now_us();
        self.tick_count += 1;

        // 1. Sample both lines before SEL can change.
        let cf = self.capture.sample(LineId::Cf, now);
        let cf1 = self.capture.sample(LineId::Cf1, now);
        let deadline = self.mode.settle_deadline();
        let settling = self.mode.is_settling(now);

        // 2. Advance the mode.  SEL is driven before the controller commits,
        // so a failed write leaves both on the old mode and the switch is
        // retried next tick.  The CF1 sample belongs to `measured`.
        if let Some(to) = self.mode.pending_switch() {
            self.write_sel(to)?;
            self.capture.reset(LineId::Cf1, now);
        }
        let step = self.mode.advance(now);
        if let Some(to) = step.switched_to {
            sink.emit(&MeterEvent::ModeChanged {
                from: step.measured,
                to,
            });
        }

        // 3. Convert.
        let sensors = &self.config.sensors;
        let power = (sensors.is_enabled(SensorKind::Power) || sensors.is_enabled(SensorKind::Energy))
            .then(|| self.calibrator.power(cf.period()));

        let mux_kind = sensor_for(step.measured);
        if sensors.is_enabled(mux_kind) {
            let value = match cf1 {
                LineSample::Period {
                    period_us,
                    started_at_us,
                } if deadline.is_none_or(|d| started_at_us >= d) => {
                    Some(self.calibrator.mux(step.measured, Some(period_us)))
                }
                LineSample::NoSignal if !settling => Some(0.0),
                // A whole segment without a period: the line went quiet.
                LineSample::Awaiting if step.switched_to.is_some() && !settling => Some(0.0),
                _ => None,
            };
            if let Some(v) = value {
                match step.measured {
                    MeasureMode::Voltage => self.last_voltage = Some(v),
                    MeasureMode::Current => self.last_current = Some(v),
                }
            } else {
                debug!("CF1 {} reading discarded ({:?})", step.measured.name(), cf1);
            }
        }

        // 4. Integrate.
        let energy = sensors
            .is_enabled(SensorKind::Energy)
            .then(|| self.energy.integrate(now, power.unwrap_or(0.0)));

        // 5. Publish.
        let snapshot = MeasurementSnapshot {
            voltage: self.last_voltage,
            current: self.last_current,
            power,
            energy,
        }
        .masked(sensors);
        debug!(
            "tick {}: cf={:?} cf1={:?} -> {:?}",
            self.tick_count, cf, cf1, snapshot
        );
        sink.emit(&MeterEvent::Measurement(snapshot));
        Ok(snapshot)
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command.  Invalid recalibration constants are
    /// rejected and the previous calibration stays in effect.
    pub fn handle_command(&mut self, cmd: MeterCommand, sink: &mut impl EventSink) -> Result<()> {
        match cmd {
            MeterCommand::ResetEnergy => {
                self.energy.reset();
                info!("Energy total reset");
                sink.emit(&MeterEvent::EnergyReset);
            }
            MeterCommand::Recalibrate {
                current_resistor,
                voltage_divider,
            } => {
                let constants = self
                    .calibrator
                    .constants()
                    .with_circuit(current_resistor, voltage_divider)
                    .inspect_err(|e| warn!("Recalibration rejected: {}", e))?;
                self.calibrator = Calibrator::new(constants);
                self.config.current_resistor = current_resistor;
                self.config.voltage_divider = voltage_divider;
                info!(
                    "Recalibrated: R={} ohm, divider={}",
                    current_resistor, voltage_divider
                );
                sink.emit(&MeterEvent::Recalibrated {
                    current_resistor,
                    voltage_divider,
                });
            }
        }
        Ok(())
    }

    // ── Energy persistence (opt-in) ───────────────────────────

    /// Continue counting from a total the consumer already holds (kWh).
    pub fn restore_energy(&mut self, kwh: f64) {
        self.energy.restore(kwh);
        info!("Energy restored to {:.3} kWh", self.energy.total_kwh());
    }

    /// Write the current energy total to `storage`.
    pub fn save_energy(&self, storage: &mut impl StoragePort) -> Result<()> {
        let checkpoint = EnergyCheckpoint {
            version: CHECKPOINT_VERSION,
            energy_kwh: self.energy.total_kwh(),
        };
        let bytes = postcard::to_allocvec(&checkpoint).map_err(|_| StorageError::IoError)?;
        storage.write(CHECKPOINT_NAMESPACE, CHECKPOINT_KEY, &bytes)?;
        debug!("Energy checkpoint saved ({} bytes)", bytes.len());
        Ok(())
    }

    /// Seed the accumulator from a checkpoint in `storage`.  Returns the
    /// restored total.
    pub fn load_energy(&mut self, storage: &impl StoragePort) -> Result<f64> {
        let mut buf = [0u8; 32];
        let n = storage.read(CHECKPOINT_NAMESPACE, CHECKPOINT_KEY, &mut buf)?;
        let checkpoint: EnergyCheckpoint =
            postcard::from_bytes(&buf[..n]).map_err(|_| StorageError::Corrupted)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            warn!("Unknown energy checkpoint version {}", checkpoint.version);
            return Err(StorageError::Corrupted.into());
        }
        self.restore_energy(checkpoint.energy_kwh);
        Ok(self.energy.total_kwh())
    }

    // ── Queries ───────────────────────────────────────────────

    /// A handle for the edge interrupt of `line`.
    pub fn edge_handle(&self, line: LineId) -> EdgeHandle {
        self.capture.edge_handle(line)
    }

    pub fn mode(&self) -> MeasureMode {
        self.mode.mode()
    }

    pub fn energy_kwh(&self) -> f64 {
        self.energy.total_kwh()
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn diagnostics(&self) -> MeterDiagnostics {
        MeterDiagnostics {
            running: self.running,
            tick_count: self.tick_count,
            mode: self.mode.mode(),
            mode_switches: self.mode.switch_count(),
            cf_edges: self.capture.edge_count(LineId::Cf),
            cf1_edges: self.capture.edge_count(LineId::Cf1),
            energy_kwh: self.energy.total_kwh(),
        }
    }

    /// Log the effective configuration and the derived multipliers.
    pub fn log_config(&self) {
        self.config.log_config();
        let m = self.calibrator.multipliers();
        info!(
            "  Multipliers: P={:.4} W/Hz, I={:.6} A/Hz, U={:.4} V/Hz",
            m.power, m.current, m.voltage
        );
    }

    pub fn sel(&self) -> &SEL {
        &self.sel
    }

    /// Hand back the SEL pin for re-use after shutdown.
    pub fn release(self) -> SEL {
        self.sel
    }

    // ── Internal ──────────────────────────────────────────────

    fn write_sel(&mut self, mode: MeasureMode) -> Result<()> {
        let result = if mode.sel_high(self.config.sel_inverted) {
            self.sel.set_high()
        } else {
            self.sel.set_low()
        };
        result.map_err(|_| {
            warn!("SEL write failed for {}", mode.name());
            GpioError::SelWriteFailed.into()
        })
    }
}

fn sensor_for(mode: MeasureMode) -> SensorKind {
    match mode {
        MeasureMode::Voltage => SensorKind::Voltage,
        MeasureMode::Current => SensorKind::Current,
    }
}
