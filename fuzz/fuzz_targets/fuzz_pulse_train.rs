//! Fuzz target: pulse capture and meter tick
//!
//! Drives a `MeterService` with arbitrary interleavings of edges, clock
//! jumps, ticks and resets, and checks:
//! - No panics, including across 32-bit timestamp wrap
//! - Readings are finite and non-negative
//! - The energy total never decreases between resets
//!
//! cargo fuzz run fuzz_pulse_train

#![no_main]

use std::cell::Cell;
use std::convert::Infallible;

use cfmeter::app::commands::MeterCommand;
use cfmeter::app::events::MeterEvent;
use cfmeter::app::ports::{Clock, EventSink};
use cfmeter::config::{MeterConfig, SensorsConfig};
use cfmeter::sensors::LineId;
use cfmeter::MeterService;
use embedded_hal::digital::{ErrorType, OutputPin};
use libfuzzer_sys::fuzz_target;

struct NullPin;

impl ErrorType for NullPin {
    type Error = Infallible;
}

impl OutputPin for NullPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

struct FuzzClock(Cell<u64>);

impl Clock for FuzzClock {
    fn now_us(&self) -> u64 {
        self.0.get()
    }
}

struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &MeterEvent) {}
}

fn check(v: Option<f64>) {
    if let Some(v) = v {
        assert!(v.is_finite() && v >= 0.0, "bad reading {v}");
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&every, ops)) = data.split_first() else {
        return;
    };
    let cfg = MeterConfig {
        change_mode_every: (every % 8) as u32,
        sensors: SensorsConfig::all(),
        ..MeterConfig::default()
    };
    let Ok(mut meter) = MeterService::new(cfg, NullPin) else {
        return;
    };
    let clock = FuzzClock(Cell::new(u32::MAX as u64 - 5_000_000));
    let mut sink = NullSink;
    let cf = meter.edge_handle(LineId::Cf);
    let cf1 = meter.edge_handle(LineId::Cf1);
    if meter.start(&clock, &mut sink).is_err() {
        return;
    }

    let mut last_energy = 0.0f64;
    for chunk in ops.chunks(3) {
        let arg = chunk.get(1..).map_or(0u64, |b| {
            b.iter().fold(0u64, |acc, &x| (acc << 8) | x as u64)
        });
        match chunk[0] % 5 {
            0 => cf.record_edge(clock.now_us() as u32),
            1 => cf1.record_edge(clock.now_us() as u32),
            2 => clock.0.set(clock.0.get() + arg * 100),
            3 => {
                let Ok(snap) = meter.tick(&clock, &mut sink) else {
                    return;
                };
                check(snap.voltage);
                check(snap.current);
                check(snap.power);
                if let Some(e) = snap.energy {
                    assert!(e >= last_energy, "energy dropped {last_energy} -> {e}");
                    last_energy = e;
                }
            }
            _ => {
                let _ = meter.handle_command(MeterCommand::ResetEnergy, &mut sink);
                last_energy = 0.0;
            }
        }
    }
});
