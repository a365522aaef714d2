//! Fractional step budget.
//!
//! Segments advance in whole discrete steps, but the host ticks at its own
//! pace. Each segment accrues `elapsed * steps_per_tick` into an accumulator
//! and spends one unit per executed step. The accumulator is capped so a
//! segment that sat frozen for a long time catches up in a bounded burst.

use serde::{Deserialize, Serialize};

/// Default ceiling for the accumulator.
pub const DEFAULT_BUDGET_CAP: f64 = 64.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepBudget {
    accumulator: f64,
    /// Not persisted: the first update after a load reseeds it.
    #[serde(skip)]
    last_tick: Option<u64>,
}

impl Default for StepBudget {
    fn default() -> Self {
        Self {
            accumulator: 0.0,
            last_tick: None,
        }
    }
}

impl StepBudget {
    /// Budget restored from saved state, clamped into `[0, cap]`.
    pub fn restored(accumulator: f64, cap: f64) -> Self {
        Self {
            accumulator: clamp_accumulator(accumulator, cap),
            last_tick: None,
        }
    }

    /// Budget whose clock starts at `now`.
    pub fn seeded(now: u64) -> Self {
        Self {
            accumulator: 0.0,
            last_tick: Some(now),
        }
    }

    #[inline]
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    #[inline]
    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    /// Accrue budget for the ticks elapsed since the previous update.
    ///
    /// The first update only records `now`. Returns the whole steps now
    /// available.
    pub fn update(&mut self, now: u64, steps_per_tick: f64, cap: f64) -> u32 {
        let Some(last) = self.last_tick else {
            self.last_tick = Some(now);
            return self.available_steps();
        };
        self.last_tick = Some(now);
        let elapsed = now.saturating_sub(last);
        if elapsed > 0 && steps_per_tick.is_finite() && steps_per_tick > 0.0 {
            let accrued = self.accumulator + elapsed as f64 * steps_per_tick;
            self.accumulator = clamp_accumulator(accrued, cap);
        }
        self.available_steps()
    }

    #[inline]
    pub fn available_steps(&self) -> u32 {
        self.accumulator.floor().max(0.0) as u32
    }

    pub fn consume_one(&mut self) {
        self.accumulator = (self.accumulator - 1.0).max(0.0);
    }

    /// Forget the clock so the next update reseeds instead of catching up.
    pub fn reset_clock(&mut self) {
        self.last_tick = None;
    }
}

/// Clamp into `[0, cap]`, mapping anything non-finite to 0.
pub fn clamp_accumulator(value: f64, cap: f64) -> f64 {
    let cap = if cap.is_finite() { cap.max(0.0) } else { DEFAULT_BUDGET_CAP };
    if value.is_finite() {
        value.clamp(0.0, cap)
    } else {
        0.0
    }
}
