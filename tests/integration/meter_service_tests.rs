//! Integration tests for the pulse lines → MeterService → sink pipeline.
//!
//! Edge trains are injected through the service's `EdgeHandle`s and the
//! clock is advanced by hand, so every scenario is deterministic.

use crate::mock_hw::{MockClock, MockSel, RecordingSink, pulse_train};

use cfmeter::app::commands::MeterCommand;
use cfmeter::app::events::MeterEvent;
use cfmeter::config::{MeterConfig, SensorDecl, SensorsConfig};
use cfmeter::error::{ConfigError, Error, GpioError};
use cfmeter::fsm::MeasureMode;
use cfmeter::sensors::LineId;
use cfmeter::{MeasurementSnapshot, MeterService};

type Meter = MeterService<MockSel>;

fn config(sensors: SensorsConfig) -> MeterConfig {
    MeterConfig {
        sensors,
        ..MeterConfig::default()
    }
}

fn started(cfg: MeterConfig) -> (Meter, MockClock, RecordingSink) {
    let clock = MockClock::new();
    let mut sink = RecordingSink::new();
    let mut meter = match MeterService::new(cfg, MockSel::new()) {
        Ok(m) => m,
        Err(e) => panic!("config rejected: {e}"),
    };
    meter.start(&clock, &mut sink).unwrap();
    (meter, clock, sink)
}

/// Feed one second of CF pulses at `period_us` ending just before
/// `second + 1`, then tick at `second + 1`.
fn tick_with_cf(
    meter: &mut Meter,
    clock: &MockClock,
    sink: &mut RecordingSink,
    second: u64,
    period_us: u64,
) -> MeasurementSnapshot {
    let cf = meter.edge_handle(LineId::Cf);
    pulse_train(&cf, second * 1_000_000, period_us, 1_000_000 / period_us);
    clock.set_us((second + 1) * 1_000_000);
    meter.tick(clock, sink).unwrap()
}

// ── Reference scenario ───────────────────────────────────────

#[test]
fn hlw8012_voltage_mode_reference_point() {
    let (mut meter, clock, mut sink) = started(config(SensorsConfig::all()));
    assert_eq!(meter.sel().levels, [false]);

    let cf = meter.edge_handle(LineId::Cf);
    let cf1 = meter.edge_handle(LineId::Cf1);
    pulse_train(&cf, 0, 1_000, 5_000);
    pulse_train(&cf1, 1_500_000, 2_000, 1_750);
    clock.set_us(5_000_000);

    let snap = meter.tick(&clock, &mut sink).unwrap();
    let m = *meter.calibrator().multipliers();

    assert_eq!(snap.power, Some(m.power * 1_000.0));
    assert_eq!(snap.voltage, Some(m.voltage * 500.0));
    assert!((snap.power.unwrap() - 10_343.6).abs() < 5.0);
    assert!((snap.voltage.unwrap() - 204.3).abs() < 0.5);
    assert_eq!(snap.current, None, "current not measured yet");
    assert_eq!(snap.energy, Some(0.0), "first tick only sets the baseline");
    assert_eq!(sink.events.last(), Some(&MeterEvent::Measurement(snap)));
}

// ── Signal absence ───────────────────────────────────────────

#[test]
fn no_pulses_reports_zero_and_energy_stays_put() {
    let mut cfg = config(SensorsConfig::all());
    cfg.initial_mode = MeasureMode::Current;
    cfg.change_mode_every = 0;
    let (mut meter, clock, mut sink) = started(cfg);

    let mut snaps = Vec::new();
    for _ in 0..3 {
        clock.advance_ms(60_000);
        snaps.push(meter.tick(&clock, &mut sink).unwrap());
    }
    for snap in &snaps {
        assert_eq!(snap.power, Some(0.0));
        assert_eq!(snap.current, Some(0.0));
        assert_eq!(snap.voltage, None);
        assert_eq!(snap.energy, Some(0.0));
    }
    assert_eq!(sink.mode_changes(), 0);
}

#[test]
fn power_drops_to_zero_after_signal_timeout() {
    let sensors = SensorsConfig {
        power: Some(SensorDecl::named("Power")),
        ..SensorsConfig::default()
    };
    let (mut meter, clock, mut sink) = started(config(sensors));

    let snap = tick_with_cf(&mut meter, &clock, &mut sink, 0, 1_000);
    assert!(snap.power.unwrap() > 0.0);

    clock.set_us(12_000_000);
    let snap = meter.tick(&clock, &mut sink).unwrap();
    assert_eq!(snap.power, Some(0.0));
}

// ── Mode switching and settling ──────────────────────────────

#[test]
fn readings_started_inside_settling_window_are_discarded() {
    let mut cfg = config(SensorsConfig::all());
    cfg.change_mode_every = 1;
    let (mut meter, clock, mut sink) = started(cfg);
    let cf1 = meter.edge_handle(LineId::Cf1);

    // Period opens before the start-up settle deadline (1 s).
    cf1.record_edge(200_000);
    cf1.record_edge(700_000);
    clock.set_us(800_000);
    let snap = meter.tick(&clock, &mut sink).unwrap();
    assert_eq!(snap.voltage, None);
    assert_eq!(meter.mode(), MeasureMode::Current);

    // Switch at 0.8 s: deadline 1.8 s.
    cf1.record_edge(1_500_000);
    cf1.record_edge(1_600_000);
    clock.set_us(1_900_000);
    let snap = meter.tick(&clock, &mut sink).unwrap();
    assert_eq!(snap.current, None);
    assert_eq!(meter.mode(), MeasureMode::Voltage);

    // Switch at 1.9 s: deadline 2.9 s.  This period is clean.
    cf1.record_edge(3_000_000);
    cf1.record_edge(3_100_000);
    clock.set_us(3_200_000);
    let snap = meter.tick(&clock, &mut sink).unwrap();
    let m = *meter.calibrator().multipliers();
    assert_eq!(snap.voltage, Some(m.voltage * 10.0));
    assert_eq!(snap.current, None);

    assert_eq!(sink.mode_changes(), 3);
    assert_eq!(meter.sel().levels, [false, true, false, true]);
}

#[test]
fn inactive_quantity_is_carried_forward() {
    let mut cfg = config(SensorsConfig::all());
    cfg.change_mode_every = 2;
    cfg.settle_time_ms = 100;
    let (mut meter, clock, mut sink) = started(cfg);
    let cf1 = meter.edge_handle(LineId::Cf1);
    let m = *meter.calibrator().multipliers();
    let voltage = Some(m.voltage * 20.0);

    cf1.record_edge(200_000);
    cf1.record_edge(250_000);
    clock.set_us(300_000);
    assert_eq!(meter.tick(&clock, &mut sink).unwrap().voltage, voltage);
    clock.set_us(600_000);
    assert_eq!(meter.tick(&clock, &mut sink).unwrap().voltage, voltage);
    assert_eq!(meter.mode(), MeasureMode::Current);

    cf1.record_edge(800_000);
    cf1.record_edge(810_000);
    clock.set_us(900_000);
    let current = meter.tick(&clock, &mut sink).unwrap();
    assert_eq!(current.current, Some(m.current * 100.0));
    assert_eq!(current.voltage, voltage);
    clock.set_us(1_200_000);
    let last = meter.tick(&clock, &mut sink).unwrap();
    assert_eq!(meter.mode(), MeasureMode::Voltage);

    // Back in voltage mode, inside the settle window: both carried.
    clock.set_us(1_250_000);
    let settling = meter.tick(&clock, &mut sink).unwrap();
    assert_eq!(settling, last);
}

#[test]
fn quiet_segment_expires_the_multiplexed_reading() {
    let mut cfg = config(SensorsConfig::all());
    cfg.initial_mode = MeasureMode::Current;
    cfg.change_mode_every = 3;
    cfg.update_interval_ms = 1_000;
    let (mut meter, clock, mut sink) = started(cfg);
    let cf1 = meter.edge_handle(LineId::Cf1);

    clock.set_us(1_000_000);
    let mut currents = vec![meter.tick(&clock, &mut sink).unwrap().current];

    // Load runs for part of the second after settling, then stops.
    pulse_train(&cf1, 1_100_000, 10_000, 80);
    for s in 2..=60u64 {
        clock.set_us(s * 1_000_000);
        currents.push(meter.tick(&clock, &mut sink).unwrap().current);
    }

    assert!(currents[1].unwrap() > 0.0);
    // The first current segment closes at tick 3 with the period still
    // inside the signal timeout; the next quiet one reads zero.
    assert_eq!(currents[8], Some(0.0));
    assert!(currents[8..].iter().all(|c| *c == Some(0.0)));
    let last = sink.measurements().last().unwrap();
    assert_eq!(last.voltage, Some(0.0));
}

#[test]
fn sel_polarity_follows_inversion() {
    let mut cfg = config(SensorsConfig::all());
    cfg.sel_inverted = true;
    let (meter, _clock, sink) = started(cfg);
    assert_eq!(meter.sel().levels, [true]);
    assert_eq!(
        sink.events[0],
        MeterEvent::Started {
            mode: MeasureMode::Voltage
        }
    );
}

// ── Sensor selection ─────────────────────────────────────────

#[test]
fn energy_disabled_never_publishes_energy() {
    let sensors = SensorsConfig {
        energy: None,
        ..SensorsConfig::all()
    };
    let (mut meter, clock, mut sink) = started(config(sensors));
    for s in 0..5 {
        let snap = tick_with_cf(&mut meter, &clock, &mut sink, s, 1_000);
        assert!(snap.power.unwrap() > 0.0);
    }
    assert_eq!(sink.measurements().count(), 5);
    assert!(sink.measurements().all(|s| s.energy.is_none()));
}

#[test]
fn energy_only_still_integrates_power() {
    let sensors = SensorsConfig {
        energy: Some(SensorDecl::named("Energy")),
        ..SensorsConfig::default()
    };
    let (mut meter, clock, mut sink) = started(config(sensors));
    let watts = meter.calibrator().power(Some(1_000));

    let first = tick_with_cf(&mut meter, &clock, &mut sink, 0, 1_000);
    assert_eq!(first.power, None);
    assert_eq!(first.energy, Some(0.0));

    let second = tick_with_cf(&mut meter, &clock, &mut sink, 1, 1_000);
    let expected_kwh = watts / 3_600.0 / 1_000.0;
    let got = second.energy.unwrap();
    assert!((got - expected_kwh).abs() / expected_kwh < 1e-6, "{got} vs {expected_kwh}");
    assert!(second.voltage.is_none() && second.current.is_none());
}

// ── Commands ─────────────────────────────────────────────────

#[test]
fn recalibration_rescales_and_rejects_bad_constants() {
    let mut cfg = config(SensorsConfig::all());
    cfg.initial_mode = MeasureMode::Current;
    cfg.change_mode_every = 0;
    cfg.settle_time_ms = 100;
    let (mut meter, clock, mut sink) = started(cfg);
    let cf1 = meter.edge_handle(LineId::Cf1);

    cf1.record_edge(200_000);
    cf1.record_edge(300_000);
    clock.set_us(400_000);
    let before = meter.tick(&clock, &mut sink).unwrap().current.unwrap();

    meter
        .handle_command(
            MeterCommand::Recalibrate {
                current_resistor: 0.002,
                voltage_divider: 2351.0,
            },
            &mut sink,
        )
        .unwrap();
    assert!(sink.events.contains(&MeterEvent::Recalibrated {
        current_resistor: 0.002,
        voltage_divider: 2351.0
    }));

    cf1.record_edge(500_000);
    cf1.record_edge(600_000);
    clock.set_us(700_000);
    let after = meter.tick(&clock, &mut sink).unwrap().current.unwrap();
    assert!((before / after - 2.0).abs() < 1e-4);

    let err = meter
        .handle_command(
            MeterCommand::Recalibrate {
                current_resistor: 0.0,
                voltage_divider: 2351.0,
            },
            &mut sink,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::ValidationFailed(_))));
    assert_eq!(meter.calibrator().constants().current_resistor(), 0.002);
    assert_eq!(meter.config().current_resistor, 0.002);
}

#[test]
fn reset_energy_zeroes_the_total() {
    let (mut meter, clock, mut sink) = started(config(SensorsConfig::all()));
    for s in 0..4 {
        tick_with_cf(&mut meter, &clock, &mut sink, s, 1_000);
    }
    let total = meter.energy_kwh();
    assert!(total > 0.0);

    meter
        .handle_command(MeterCommand::ResetEnergy, &mut sink)
        .unwrap();
    assert_eq!(meter.energy_kwh(), 0.0);
    assert!(sink.events.contains(&MeterEvent::EnergyReset));

    let snap = tick_with_cf(&mut meter, &clock, &mut sink, 4, 1_000);
    let e = snap.energy.unwrap();
    assert!(e > 0.0 && e < total, "only one interval since reset: {e}");
}

// ── Lifecycle and errors ─────────────────────────────────────

#[test]
fn invalid_config_never_builds_a_service() {
    let mut cfg = config(SensorsConfig::all());
    cfg.current_resistor = 0.0;
    let err = MeterService::new(cfg, MockSel::new()).err();
    assert!(matches!(
        err,
        Some(Error::Config(ConfigError::ValidationFailed(_)))
    ));
}

#[test]
fn sel_write_failure_surfaces_as_gpio_error() {
    let clock = MockClock::new();
    let mut sink = RecordingSink::new();
    let mut meter = MeterService::new(config(SensorsConfig::all()), MockSel::failing())
        .ok()
        .unwrap();
    assert_eq!(
        meter.start(&clock, &mut sink),
        Err(Error::Gpio(GpioError::SelWriteFailed))
    );
    assert!(!meter.is_running());
    assert!(sink.events.is_empty());
}

#[test]
fn stopped_meter_ignores_edges_and_ticks() {
    let (mut meter, clock, mut sink) = started(config(SensorsConfig::all()));
    tick_with_cf(&mut meter, &clock, &mut sink, 0, 1_000);
    let edges = meter.diagnostics().cf_edges;
    assert_eq!(edges, 1_000);

    meter.stop();
    let published = sink.measurements().count();
    let snap = tick_with_cf(&mut meter, &clock, &mut sink, 1, 1_000);
    assert_eq!(snap, MeasurementSnapshot::default());
    assert_eq!(sink.measurements().count(), published);

    let diag = meter.diagnostics();
    assert!(!diag.running);
    assert_eq!(diag.cf_edges, edges);
}

#[test]
fn failed_switch_keeps_mode_and_retries_next_tick() {
    let mut cfg = config(SensorsConfig::all());
    cfg.change_mode_every = 1;
    let clock = MockClock::new();
    let mut sink = RecordingSink::new();
    // Write 0 is the start-up write, write 1 the first switch.
    let mut meter = MeterService::new(cfg, MockSel::failing_once_at(1)).ok().unwrap();
    meter.start(&clock, &mut sink).unwrap();

    clock.set_us(2_000_000);
    assert_eq!(
        meter.tick(&clock, &mut sink),
        Err(Error::Gpio(GpioError::SelWriteFailed))
    );
    assert_eq!(meter.mode(), MeasureMode::Voltage);
    assert_eq!(meter.sel().level(), Some(false));
    assert_eq!(sink.mode_changes(), 0);

    clock.set_us(4_000_000);
    meter.tick(&clock, &mut sink).unwrap();
    assert_eq!(meter.mode(), MeasureMode::Current);
    assert_eq!(meter.sel().level(), Some(true));
    assert_eq!(sink.mode_changes(), 1);
}

#[test]
fn restart_does_not_integrate_the_stopped_interval() {
    let (mut meter, clock, mut sink) = started(config(SensorsConfig::all()));
    for s in 0..3 {
        let snap = tick_with_cf(&mut meter, &clock, &mut sink, s, 10_000);
        assert!(snap.power.unwrap() > 500.0);
    }
    let before = meter.energy_kwh();
    assert!(before > 0.0);

    meter.stop();
    clock.set_us(3_603_000_000);
    meter.start(&clock, &mut sink).unwrap();
    clock.advance_ms(1_000);
    let snap = meter.tick(&clock, &mut sink).unwrap();
    assert_eq!(snap.power, Some(0.0));
    assert_eq!(snap.energy, Some(before));
    assert_eq!(snap.voltage, None);
}

#[test]
fn diagnostics_track_ticks_and_switches() {
    let mut cfg = config(SensorsConfig::all());
    cfg.change_mode_every = 2;
    let (mut meter, clock, mut sink) = started(cfg);
    for s in 0..5 {
        tick_with_cf(&mut meter, &clock, &mut sink, s, 10_000);
    }
    let diag = meter.diagnostics();
    assert!(diag.running);
    assert_eq!(diag.tick_count, 5);
    assert_eq!(diag.mode_switches, 2);
    assert_eq!(diag.mode, MeasureMode::Voltage);
    assert_eq!(diag.cf_edges, 500);
    assert_eq!(diag.cf1_edges, 0);
}

#[test]
fn independent_meters_do_not_share_lines() {
    let (mut a, clock, mut sink) = started(config(SensorsConfig::all()));
    let (mut b, _, mut sink_b) = started(config(SensorsConfig::all()));
    let sa = tick_with_cf(&mut a, &clock, &mut sink, 0, 1_000);
    let sb = b.tick(&clock, &mut sink_b).unwrap();
    assert!(sa.power.unwrap() > 0.0);
    assert_eq!(sb.power, Some(0.0));
}
