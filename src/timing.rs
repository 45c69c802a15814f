//! Hardware timing constants of the NI 660X counters.
//!
//! Using the 80 MHz timebase one tick is 12.5 ns and the counters are 32 bits
//! wide, so the longest pulse is `(2^32 - 1) * 12.5 ns`, about 53.687091187 s.

use crate::error::{CtrlError, CtrlResult};
use serde::{Deserialize, Serialize};

/// Period of the 80 MHz counting timebase, in seconds.
pub const CLOCK_TICK: f64 = 12.5e-9;

/// Width of the counter registers.
pub const COUNTER_BITS: u32 = 32;

/// Shortest high/low time accepted by the counter/timer engine.
pub const COUNTER_MIN_PULSE: f64 = 25e-7;

/// Shortest low time written by the trigger/gate engine.
pub const TRIGGER_MIN_PULSE: f64 = 25e-6;

/// Low time forced on retriggerable slave axes so the external master has
/// time to re-arm between triggers.
pub const RETRIGGER_LOW_TIME: f64 = 3e-6;

/// Numeric hardware constants, overridable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConstants {
    /// Timebase period in seconds.
    pub clock_tick: f64,
    /// Width of the counter registers.
    pub counter_bits: u32,
    /// Shortest counter high or low time in seconds.
    pub counter_min_pulse: f64,
    /// Shortest trigger/gate low time in seconds.
    pub trigger_min_pulse: f64,
    /// Low time of retriggerable slave axes in seconds.
    pub retrigger_low_time: f64,
}

impl Default for HardwareConstants {
    fn default() -> Self {
        Self {
            clock_tick: CLOCK_TICK,
            counter_bits: COUNTER_BITS,
            counter_min_pulse: COUNTER_MIN_PULSE,
            trigger_min_pulse: TRIGGER_MIN_PULSE,
            retrigger_low_time: RETRIGGER_LOW_TIME,
        }
    }
}

impl HardwareConstants {
    /// Longest pulse the counter can time: a full register of ticks.
    pub fn max_pulse(&self) -> f64 {
        let ticks = (1u64 << self.counter_bits.min(63)) - 1;
        ticks as f64 * self.clock_tick
    }

    /// Check that a software-timed integration time fits the counter.
    ///
    /// Accepted range is `2 * counter_min_pulse ..= max_pulse`.
    pub fn check_integration_time(&self, value: f64) -> CtrlResult<()> {
        let min = 2.0 * self.counter_min_pulse;
        let max = self.max_pulse();
        if value.is_nan() || value < min || value > max {
            return Err(CtrlError::Configuration(format!(
                "Integration time {value} not supported. Min = {min}, Max = {max}"
            )));
        }
        Ok(())
    }
}
