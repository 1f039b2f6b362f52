//! Interrupt-side pulse line state.
//!
//! One [`PulseLine`] per chip output.  The GPIO ISR for that pin is the
//! *only* writer of the edge fields; the poll path reads them through
//! [`PulseLine::snapshot`].  Because the ISR can preempt the poll path in
//! the middle of a read, the fields are published under a sequence lock:
//!
//! ```text
//!   ISR (writer)                     poll (reader)
//!   seq += 1  (odd: write open)      s1 = seq        retry if odd
//!   update fields                    copy fields
//!   seq += 1  (even: write closed)   s2 = seq        retry if s1 != s2
//! ```
//!
//! The reader never blocks the writer, so the ISR stays bounded.  Reset
//! requests from the poll side go through a separate `epoch` counter that
//! the ISR compares on its next edge; the poll side never touches the
//! ISR-owned fields.
//!
//! Timestamps are the low 32 bits of the microsecond clock; all arithmetic
//! on them is wrapping.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering, fence};
use std::sync::Arc;

/// Which chip output a line carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LineId {
    /// Active power pulses.
    Cf = 0,
    /// Current or voltage pulses, depending on SEL.
    Cf1 = 1,
}

impl LineId {
    pub const COUNT: usize = 2;

    pub fn name(self) -> &'static str {
        match self {
            Self::Cf => "CF",
            Self::Cf1 => "CF1",
        }
    }
}

/// A consistent copy of a line's edge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeSnapshot {
    /// Timestamp of the most recent edge (µs, wrapping).
    pub last_edge_us: u32,
    /// Interval between the two most recent edges of the current epoch.
    /// Meaningful only when `edges_since_reset >= 2`.
    pub period_us: u32,
    /// Edges recorded since the last reset.
    pub edges_since_reset: u32,
    /// Edges recorded since construction (wrapping).
    pub edge_count: u32,
}

impl EdgeSnapshot {
    /// The latest period, if two edges have been seen since the last reset.
    pub fn period(&self) -> Option<u32> {
        (self.edges_since_reset >= 2).then_some(self.period_us)
    }
}

/// Shared edge state for one pulse line.
#[derive(Debug)]
pub struct PulseLine {
    id: LineId,
    /// Even = stable, odd = ISR write in progress.
    seq: AtomicU32,
    last_edge_us: AtomicU32,
    period_us: AtomicU32,
    edges_in_epoch: AtomicU32,
    edge_count: AtomicU32,
    /// Epoch the ISR-owned fields belong to (written by the ISR).
    isr_epoch: AtomicU32,
    /// Requested epoch (bumped by the poll side to reset).
    epoch: AtomicU32,
    /// Edges are ignored while disabled.
    enabled: AtomicBool,
}

impl PulseLine {
    pub fn new(id: LineId) -> Self {
        Self {
            id,
            seq: AtomicU32::new(0),
            last_edge_us: AtomicU32::new(0),
            period_us: AtomicU32::new(0),
            edges_in_epoch: AtomicU32::new(0),
            edge_count: AtomicU32::new(0),
            isr_epoch: AtomicU32::new(0),
            epoch: AtomicU32::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> LineId {
        self.id
    }

    /// Record a rising edge.  Called from the GPIO ISR for this line only.
    ///
    /// Lock-free and allocation-free.  There must be a single caller per
    /// line, which holds for a GPIO interrupt bound to one pin.
    pub fn record_edge(&self, now_us: u32) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let epoch = self.epoch.load(Ordering::Acquire);

        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        let mut edges = self.edges_in_epoch.load(Ordering::Relaxed);
        if self.isr_epoch.load(Ordering::Relaxed) != epoch {
            // A reset was requested since the last edge: this edge opens a
            // fresh measurement.
            edges = 0;
            self.isr_epoch.store(epoch, Ordering::Relaxed);
        }
        let period = if edges > 0 {
            now_us.wrapping_sub(self.last_edge_us.load(Ordering::Relaxed))
        } else {
            0
        };
        self.period_us.store(period, Ordering::Relaxed);
        self.last_edge_us.store(now_us, Ordering::Relaxed);
        self.edges_in_epoch.store(edges.saturating_add(1), Ordering::Relaxed);
        let count = self.edge_count.load(Ordering::Relaxed);
        self.edge_count.store(count.wrapping_add(1), Ordering::Relaxed);

        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Read a torn-free copy of the edge state.
    ///
    /// Retries while an ISR write overlaps the read.  Edges from an epoch
    /// older than the latest reset are reported as zero edges.
    pub fn snapshot(&self) -> EdgeSnapshot {
        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 & 1 == 1 {
                core::hint::spin_loop();
                continue;
            }
            let last_edge_us = self.last_edge_us.load(Ordering::Relaxed);
            let period_us = self.period_us.load(Ordering::Relaxed);
            let edges = self.edges_in_epoch.load(Ordering::Relaxed);
            let edge_count = self.edge_count.load(Ordering::Relaxed);
            let isr_epoch = self.isr_epoch.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            let s2 = self.seq.load(Ordering::Relaxed);
            if s1 != s2 {
                continue;
            }

            let current = isr_epoch == self.epoch.load(Ordering::Acquire);
            return EdgeSnapshot {
                last_edge_us,
                period_us,
                edges_since_reset: if current { edges } else { 0 },
                edge_count,
            };
        }
    }

    /// Invalidate the period being measured.  The next edge starts a new
    /// measurement; a period needs two edges after this call.
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Stop (`false`) or resume (`true`) recording edges.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Write-only view of a [`PulseLine`] handed to the edge interrupt.
///
/// Cloning shares the same line.  The poll side keeps its own reference
/// inside [`PulseCapture`](super::PulseCapture).
#[derive(Debug, Clone)]
pub struct EdgeHandle(Arc<PulseLine>);

impl EdgeHandle {
    pub(crate) fn new(line: Arc<PulseLine>) -> Self {
        Self(line)
    }

    /// Record a rising edge at `now_us` (low 32 bits of the µs clock).
    pub fn record_edge(&self, now_us: u32) {
        self.0.record_edge(now_us);
    }

    pub fn line_id(&self) -> LineId {
        self.0.id()
    }

    /// Leak one strong reference as an opaque ISR argument.
    pub fn into_raw(self) -> *const PulseLine {
        Arc::into_raw(self.0)
    }

    /// Reclaim a reference produced by [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    /// `ptr` must come from `into_raw` and must not be reclaimed twice.
    pub unsafe fn from_raw(ptr: *const PulseLine) -> Self {
        // SAFETY: guaranteed by the caller.
        Self(unsafe { Arc::from_raw(ptr) })
    }
}
