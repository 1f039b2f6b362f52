//! CF1 multiplexing state machine.
//!
//! The chip routes either the current or the voltage channel to CF1,
//! selected by the SEL pin.  The controller owns that choice:
//!
//! ```text
//!            change_mode_every ticks
//!   ┌─────────┐ ───────────────────▶ ┌─────────┐
//!   │ VOLTAGE │                      │ CURRENT │
//!   └─────────┘ ◀─────────────────── └─────────┘
//!            change_mode_every ticks
//! ```
//!
//! Every switch (and the initial SEL write at start) opens a settling
//! window.  CF1 pulses measured inside it still reflect the previous
//! channel and must be discarded by the caller.  There is no terminal
//! state; the controller runs for the lifetime of the driver.

use log::info;
use serde::{Deserialize, Serialize};

/// Which quantity CF1 currently carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MeasureMode {
    #[serde(rename = "CURRENT")]
    Current = 0,
    #[serde(rename = "VOLTAGE")]
    Voltage = 1,
}

impl MeasureMode {
    pub fn other(self) -> Self {
        match self {
            Self::Current => Self::Voltage,
            Self::Voltage => Self::Current,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Current => "CURRENT",
            Self::Voltage => "VOLTAGE",
        }
    }

    /// SEL level that routes this channel to CF1.  Current is high on a
    /// non-inverted pin.
    pub fn sel_high(self, inverted: bool) -> bool {
        (self == Self::Current) != inverted
    }
}

/// Outcome of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTick {
    /// Mode that was in effect during the interval ending at this tick.
    pub measured: MeasureMode,
    /// New mode if the tick triggered a switch.
    pub switched_to: Option<MeasureMode>,
}

/// Tick-driven CURRENT/VOLTAGE selector with a settling window.
#[derive(Debug, Clone)]
pub struct ModeController {
    mode: MeasureMode,
    ticks_since_switch: u32,
    /// Ticks between switches; 0 pins the initial mode.
    change_mode_every: u32,
    settle_us: u64,
    /// Time of the last switch (or start).  `None` before `start`.
    switched_at_us: Option<u64>,
    switch_count: u32,
}

impl ModeController {
    pub fn new(initial: MeasureMode, change_mode_every: u32, settle_us: u64) -> Self {
        Self {
            mode: initial,
            ticks_since_switch: 0,
            change_mode_every,
            settle_us,
            switched_at_us: None,
            switch_count: 0,
        }
    }

    /// Open the first settling window.  The caller drives SEL for
    /// [`mode`](Self::mode) at the same time.
    pub fn start(&mut self, now_us: u64) {
        info!("Mode controller starting in {}", self.mode.name());
        self.ticks_since_switch = 0;
        self.switched_at_us = Some(now_us);
    }

    /// Count one poll tick and flip the mode if the interval elapsed.
    ///
    /// At most one switch per call.
    pub fn advance(&mut self, now_us: u64) -> ModeTick {
        let measured = self.mode;
        self.ticks_since_switch = self.ticks_since_switch.saturating_add(1);

        if self.change_mode_every == 0 || self.ticks_since_switch < self.change_mode_every {
            return ModeTick {
                measured,
                switched_to: None,
            };
        }

        self.mode = measured.other();
        self.ticks_since_switch = 0;
        self.switched_at_us = Some(now_us);
        self.switch_count = self.switch_count.wrapping_add(1);
        info!("Mode switch: {} -> {}", measured.name(), self.mode.name());

        ModeTick {
            measured,
            switched_to: Some(self.mode),
        }
    }

    /// The mode the next [`advance`](Self::advance) will switch to, if
    /// that tick completes the interval.  Lets the caller drive SEL before
    /// the switch is committed.
    pub fn pending_switch(&self) -> Option<MeasureMode> {
        (self.change_mode_every != 0
            && self.ticks_since_switch.saturating_add(1) >= self.change_mode_every)
            .then(|| self.mode.other())
    }

    /// End of the current settling window.  A CF1 period must start at or
    /// after this instant to be attributed to [`mode`](Self::mode).
    pub fn settle_deadline(&self) -> Option<u64> {
        self.switched_at_us.map(|t| t.saturating_add(self.settle_us))
    }

    pub fn is_settling(&self, now_us: u64) -> bool {
        self.settle_deadline().is_some_and(|d| now_us < d)
    }

    pub fn mode(&self) -> MeasureMode {
        self.mode
    }

    pub fn ticks_since_switch(&self) -> u32 {
        self.ticks_since_switch
    }

    /// Switches since construction (start not included).
    pub fn switch_count(&self) -> u32 {
        self.switch_count
    }

    pub fn change_mode_every(&self) -> u32 {
        self.change_mode_every
    }
}
