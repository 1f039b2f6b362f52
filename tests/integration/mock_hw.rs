//! Mock hardware for integration tests.
//!
//! Records every SEL write and every emitted event so tests can assert on
//! the full history without touching real GPIO registers.  Edge trains are
//! injected straight into the service's `EdgeHandle`s.

use std::cell::Cell;

use cfmeter::app::events::MeterEvent;
use cfmeter::app::ports::{Clock, EventSink};
use cfmeter::sensors::EdgeHandle;
use embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin};

// ── MockSel ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockPinError;

impl digital::Error for MockPinError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// SEL output pin that remembers every level written.
#[derive(Debug, Default)]
pub struct MockSel {
    pub levels: Vec<bool>,
    /// Every write fails.
    pub fail: bool,
    /// Only the write with this index (0-based) fails.
    pub fail_on: Option<usize>,
    attempts: usize,
}

#[allow(dead_code)]
impl MockSel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn failing_once_at(write: usize) -> Self {
        Self {
            fail_on: Some(write),
            ..Self::default()
        }
    }

    fn write(&mut self, high: bool) -> Result<(), MockPinError> {
        let n = self.attempts;
        self.attempts += 1;
        if self.fail || self.fail_on == Some(n) {
            return Err(MockPinError);
        }
        self.levels.push(high);
        Ok(())
    }

    pub fn level(&self) -> Option<bool> {
        self.levels.last().copied()
    }
}

impl ErrorType for MockSel {
    type Error = MockPinError;
}

impl OutputPin for MockSel {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

// ── MockClock ─────────────────────────────────────────────────

/// Manually advanced microsecond clock.
#[derive(Debug, Default)]
pub struct MockClock {
    now: Cell<u64>,
}

#[allow(dead_code)]
impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_us(&self, t: u64) {
        self.now.set(t);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now.set(self.now.get() + ms * 1_000);
    }
}

impl Clock for MockClock {
    fn now_us(&self) -> u64 {
        self.now.get()
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<MeterEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode_changes(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, MeterEvent::ModeChanged { .. }))
            .count()
    }

    pub fn measurements(&self) -> impl Iterator<Item = &cfmeter::MeasurementSnapshot> {
        self.events.iter().filter_map(|e| match e {
            MeterEvent::Measurement(s) => Some(s),
            _ => None,
        })
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &MeterEvent) {
        self.events.push(event.clone());
    }
}

// ── Pulse trains ──────────────────────────────────────────────

/// Fire `count` rising edges on `line`, `period_us` apart, starting at
/// `start_us`.  Returns the time of the last edge.
#[allow(dead_code)]
pub fn pulse_train(line: &EdgeHandle, start_us: u64, period_us: u64, count: u64) -> u64 {
    let mut t = start_us;
    for i in 0..count {
        t = start_us + i * period_us;
        line.record_edge(t as u32);
    }
    t
}
