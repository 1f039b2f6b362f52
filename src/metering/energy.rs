//! Energy integration.
//!
//! Power readings arrive once per poll tick.  Between two ticks the
//! accumulator adds the mean of the two readings times the elapsed time.
//! The running total is kept in `f64` watt-hours so that adding a few
//! milliwatt-hours to a multi-MWh total over months of uptime does not
//! drift.

const US_PER_HOUR: f64 = 3_600_000_000.0;

/// Cumulative, monotonically non-decreasing energy counter.
#[derive(Debug, Clone, Default)]
pub struct EnergyAccumulator {
    total_wh: f64,
    /// Timestamp and power of the previous integration step.
    last: Option<(u64, f64)>,
}

impl EnergyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously reported total (kWh), e.g. the last value
    /// the consumer saw before a restart.
    pub fn with_initial_kwh(kwh: f64) -> Self {
        let mut acc = Self::new();
        acc.restore(kwh);
        acc
    }

    /// Integrate `power_w` up to `now_us` and return the new total in kWh.
    ///
    /// The first call only records the baseline.  Negative power is treated
    /// as zero.  A timestamp earlier than the baseline re-baselines without
    /// contributing energy.
    pub fn integrate(&mut self, now_us: u64, power_w: f64) -> f64 {
        let power_w = if power_w.is_finite() { power_w.max(0.0) } else { 0.0 };
        if let Some((then_us, prev_w)) = self.last {
            if now_us > then_us {
                let mean_w = (prev_w + power_w) / 2.0;
                self.total_wh += mean_w * (now_us - then_us) as f64 / US_PER_HOUR;
            }
        }
        self.last = Some((now_us, power_w));
        self.total_kwh()
    }

    pub fn total_kwh(&self) -> f64 {
        self.total_wh / 1000.0
    }

    /// Explicit external reset: zero the total, keep the time baseline.
    pub fn reset(&mut self) {
        self.total_wh = 0.0;
    }

    /// Replace the total with a consumer-supplied value (kWh).  Negative
    /// or non-finite values are ignored.
    pub fn restore(&mut self, kwh: f64) {
        if kwh.is_finite() && kwh >= 0.0 {
            self.total_wh = kwh * 1000.0;
        }
    }

    /// Forget the time baseline but keep the total.  The next
    /// [`integrate`](Self::integrate) call only records a new baseline.
    pub fn clear_baseline(&mut self) {
        self.last = None;
    }

    /// Whether a baseline has been recorded.
    pub fn has_baseline(&self) -> bool {
        self.last.is_some()
    }
}
