//! CFMeter firmware: main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  PinDriver (SEL)   LogEventSink   NvsStore   Esp32Time       │
//! │  (OutputPin)       (EventSink)    (Storage)  (Clock)         │
//! │  PulseInterrupts (CF / CF1 edge ISRs → EdgeHandle)           │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ─────────────────      │
//! │                                                              │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │            MeterService (pure logic)                 │    │
//! │  │  PulseCapture · ModeController · Calibrator · Energy │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use log::{info, warn};

use esp_idf_svc::hal::gpio::{AnyOutputPin, PinDriver};

use cfmeter::adapters::log_sink::LogEventSink;
use cfmeter::adapters::nvs::NvsStore;
use cfmeter::adapters::time::Esp32TimeAdapter;
use cfmeter::config::{MeterConfig, SensorsConfig};
use cfmeter::drivers::hw_init::bind_pulse_interrupts;
use cfmeter::sensors::LineId;
use cfmeter::MeterService;

/// Optional build-time configuration document (JSON).
const CONFIG_JSON: Option<&str> = option_env!("CFMETER_CONFIG_JSON");

/// Ticks between energy checkpoints (1 h at the default interval).
const CHECKPOINT_EVERY_TICKS: u64 = 60;

fn load_config() -> MeterConfig {
    match CONFIG_JSON.map(MeterConfig::from_json) {
        Some(Ok(cfg)) => {
            info!("Config loaded from CFMETER_CONFIG_JSON");
            cfg
        }
        Some(Err(e)) => {
            warn!("Build-time config rejected ({}), using defaults", e);
            default_config()
        }
        None => default_config(),
    }
}

fn default_config() -> MeterConfig {
    MeterConfig {
        sensors: SensorsConfig::all(),
        ..MeterConfig::default()
    }
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    info!("CFMeter v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Configuration ──────────────────────────────────────
    let config = load_config();
    let interval_ms = config.update_interval_ms as u64;
    let (cf_pin, cf1_pin) = (config.cf_pin, config.cf1_pin);

    // ── 3. Adapters ───────────────────────────────────────────
    // SAFETY: the pin number was validated and no other driver owns it.
    let sel = PinDriver::output(unsafe { AnyOutputPin::new(config.sel_pin) })?;
    let clock = Esp32TimeAdapter::new();
    let mut sink = LogEventSink::new(config.sensors.clone());
    let mut nvs = match NvsStore::new() {
        Ok(n) => Some(n),
        Err(e) => {
            warn!("NVS init failed ({}), energy will not be checkpointed", e);
            None
        }
    };

    // ── 4. Meter service ──────────────────────────────────────
    let mut meter = MeterService::new(config, sel)?;
    meter.log_config();
    if let Some(store) = nvs.as_ref() {
        match meter.load_energy(store) {
            Ok(kwh) => info!("Energy checkpoint: {:.3} kWh", kwh),
            Err(e) => info!("No energy checkpoint ({})", e),
        }
    }

    let irq = bind_pulse_interrupts(
        cf_pin,
        meter.edge_handle(LineId::Cf),
        cf1_pin,
        meter.edge_handle(LineId::Cf1),
    )
    .map_err(cfmeter::Error::from)?;
    meter.start(&clock, &mut sink)?;

    // ── 5. Poll loop ──────────────────────────────────────────
    loop {
        std::thread::sleep(std::time::Duration::from_millis(interval_ms));

        if let Err(e) = meter.tick(&clock, &mut sink) {
            warn!("Tick failed: {}", e);
            if matches!(e, cfmeter::Error::Gpio(_)) {
                break;
            }
        }

        if meter.tick_count() % CHECKPOINT_EVERY_TICKS == 0 {
            if let Some(store) = nvs.as_mut() {
                if let Err(e) = meter.save_energy(store) {
                    warn!("Energy checkpoint failed: {}", e);
                }
            }
        }
    }

    // ── 6. Shutdown ───────────────────────────────────────────
    meter.stop();
    irq.unbind();
    if let Some(store) = nvs.as_mut() {
        meter.save_energy(store)?;
    }
    warn!("Meter halted after SEL failure");
    Ok(())
}
