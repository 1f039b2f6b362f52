//! Pulse capture: edge recording on the interrupt side, period sampling on
//! the poll side.
//!
//! [`PulseCapture`] owns both [`PulseLine`]s.  Edge interrupts receive
//! write-only [`EdgeHandle`]s; the poll tick calls [`PulseCapture::sample`]
//! which turns the latest edge state into a [`LineSample`], expiring lines
//! that have been silent for longer than the signal timeout.

pub mod pulse;

use std::sync::Arc;

use log::debug;

pub use pulse::{EdgeHandle, EdgeSnapshot, LineId, PulseLine};

/// Poll-side view of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSample {
    /// A complete period between two edges of the current measurement.
    Period {
        period_us: u32,
        /// Absolute time of the edge that opened this period.
        started_at_us: u64,
    },
    /// Fewer than two edges since the last reset, still within the timeout.
    Awaiting,
    /// No edge within the signal timeout.  Reported as zero by callers.
    NoSignal,
}

impl LineSample {
    pub fn period(&self) -> Option<u32> {
        match self {
            Self::Period { period_us, .. } => Some(*period_us),
            _ => None,
        }
    }
}

/// Poll-side bookkeeping per line.  Reconstructs absolute edge times from
/// the 32-bit timestamps the ISR stores.
#[derive(Debug, Clone, Copy, Default)]
struct LineWatch {
    seen_edges: u32,
    /// Absolute time of the most recent edge of the current measurement.
    last_edge_at_us: u64,
    /// Last edge or reset, whichever is later.  Drives the timeout.
    last_activity_us: u64,
}

/// Both pulse lines of one chip.
#[derive(Debug)]
pub struct PulseCapture {
    lines: [Arc<PulseLine>; LineId::COUNT],
    watch: [LineWatch; LineId::COUNT],
    timeout_us: u64,
}

impl PulseCapture {
    pub fn new(timeout_us: u64) -> Self {
        Self {
            lines: [
                Arc::new(PulseLine::new(LineId::Cf)),
                Arc::new(PulseLine::new(LineId::Cf1)),
            ],
            watch: [LineWatch::default(); LineId::COUNT],
            timeout_us,
        }
    }

    /// A handle for the edge interrupt of `line`.
    pub fn edge_handle(&self, line: LineId) -> EdgeHandle {
        EdgeHandle::new(Arc::clone(&self.lines[line as usize]))
    }

    /// Reset both lines and restart their timeouts at `now_us`.
    pub fn start(&mut self, now_us: u64) {
        for line in [LineId::Cf, LineId::Cf1] {
            self.lines[line as usize].set_enabled(true);
            self.reset(line, now_us);
        }
    }

    /// Ignore further edges on both lines.
    pub fn stop(&self) {
        for line in &self.lines {
            line.set_enabled(false);
        }
    }

    /// Invalidate any half-measured period on `line`.  Two new edges are
    /// needed before a period is reported again.
    pub fn reset(&mut self, line: LineId, now_us: u64) {
        self.lines[line as usize].reset();
        let w = &mut self.watch[line as usize];
        w.last_activity_us = now_us;
        debug!("{} reset at {} us", line.name(), now_us);
    }

    /// Classify the current state of `line` at `now_us`.
    pub fn sample(&mut self, line: LineId, now_us: u64) -> LineSample {
        let snap = self.lines[line as usize].snapshot();
        let w = &mut self.watch[line as usize];

        if snap.edge_count != w.seen_edges {
            w.seen_edges = snap.edge_count;
            if snap.edges_since_reset > 0 {
                let mut age = (now_us as u32).wrapping_sub(snap.last_edge_us);
                if age > u32::MAX / 2 {
                    // Edge landed between the clock read and the snapshot.
                    age = 0;
                }
                w.last_edge_at_us = now_us.saturating_sub(age as u64);
                w.last_activity_us = w.last_activity_us.max(w.last_edge_at_us);
            }
        }

        if now_us.saturating_sub(w.last_activity_us) > self.timeout_us {
            return LineSample::NoSignal;
        }
        match snap.period() {
            Some(period_us) => LineSample::Period {
                period_us,
                started_at_us: w.last_edge_at_us.saturating_sub(period_us as u64),
            },
            None => LineSample::Awaiting,
        }
    }

    /// The latest valid period of `line`, if any.
    pub fn latest_period(&mut self, line: LineId, now_us: u64) -> Option<u32> {
        self.sample(line, now_us).period()
    }

    /// Edges seen on `line` since construction (wrapping).
    pub fn edge_count(&self, line: LineId) -> u32 {
        self.lines[line as usize].snapshot().edge_count
    }

    pub fn timeout_us(&self) -> u64 {
        self.timeout_us
    }
}
