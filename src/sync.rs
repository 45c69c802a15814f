//! Orchestrator-side acquisition model.
//!
//! The host framework drives the engines with axis numbers, a synchronization
//! mode, a synchronization descriptor and expects back states from its own
//! three-valued model. This module holds those shared types and the mapping
//! from raw device states.

use crate::hardware::channel::RawState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical acquisition channel number, starting at 1.
pub type Axis = usize;

/// Axis reserved for the timer/master channel of the counter/timer engine.
pub const TIMER_AXIS: Axis = 1;

/// Maximum number of axes per controller.
pub const MAX_DEVICE: usize = 32;

/// How the points of an acquisition are clocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AcqSynch {
    /// One point per software start, polled.
    #[default]
    SoftwareTrigger,
    /// Software-gated single point.
    SoftwareGate,
    /// Burst of points clocked by an external trigger, buffered.
    HardwareTrigger,
    /// Burst of points gated by an external signal, buffered.
    HardwareGate,
}

impl AcqSynch {
    /// Whether points arrive from hardware clocking (buffered bursts).
    pub fn is_hardware(self) -> bool {
        matches!(self, AcqSynch::HardwareTrigger | AcqSynch::HardwareGate)
    }

    /// Whether the software drives the timing pulse.
    pub fn is_software(self) -> bool {
        !self.is_hardware()
    }
}

/// State reported to the host framework.
///
/// `On`, `Standby` and `Moving` form the orchestrator's three-valued model;
/// the remaining variants pass raw device conditions through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Idle or finished.
    On,
    /// Armed and waiting.
    Standby,
    /// Acquiring or generating.
    Moving,
    /// Device is off.
    Off,
    /// Device reports a fault.
    Fault,
    /// Device reports an alarm.
    Alarm,
    /// Device is initialising.
    Init,
    /// Device is disabled.
    Disable,
    /// State could not be determined.
    Unknown,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl State {
    /// Map a raw device state: running counts as moving, standby counts as on,
    /// everything else passes through.
    pub fn from_raw(raw: RawState) -> Self {
        match raw {
            RawState::Running | RawState::Moving => State::Moving,
            RawState::Standby | RawState::On => State::On,
            RawState::Off => State::Off,
            RawState::Fault => State::Fault,
            RawState::Alarm => State::Alarm,
            RawState::Init => State::Init,
            RawState::Disable => State::Disable,
            RawState::Unknown => State::Unknown,
        }
    }
}

/// Status texts accompanying each state, one table per controller kind.
#[derive(Debug, Clone, Copy)]
pub struct StatusTexts {
    /// Text for `State::On`.
    pub on: &'static str,
    /// Text for `State::Standby`.
    pub standby: &'static str,
    /// Text for `State::Moving`.
    pub moving: &'static str,
}

impl StatusTexts {
    /// Counter/timer status texts.
    pub const COUNTING: StatusTexts = StatusTexts {
        on: "Device finished counting",
        standby: "Device is standby",
        moving: "Device is counting",
    };

    /// Trigger/gate status texts.
    pub const GENERATING: StatusTexts = StatusTexts {
        on: "Device finished generation of pulses",
        standby: "Device is standby",
        moving: "Device is generating pulses",
    };

    /// Status text for `state`; pass-through states name the raw condition.
    pub fn status(&self, state: State) -> String {
        match state {
            State::On => self.on.to_string(),
            State::Standby => self.standby.to_string(),
            State::Moving => self.moving.to_string(),
            other => format!("Device is in {other} state"),
        }
    }
}

/// One group of a synchronization descriptor. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynchGroup {
    /// Delay before the first pulse.
    pub delay: f64,
    /// Active (high) time of each period.
    pub active: f64,
    /// Total period.
    pub total: f64,
    /// Number of periods.
    pub repeats: u64,
}

impl SynchGroup {
    /// Group from its four fields.
    pub fn new(delay: f64, active: f64, total: f64, repeats: u64) -> Self {
        Self {
            delay,
            active,
            total,
            repeats,
        }
    }

    /// High and low time of one pulse when `duty_cycle` percent of the
    /// active period is kept high.
    pub fn pulse_times(&self, duty_cycle: f64) -> (f64, f64) {
        let high = self.active * (duty_cycle / 100.0);
        (high, self.total - high)
    }
}

/// Ordered synchronization groups handed over by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SynchDescriptor(pub Vec<SynchGroup>);

impl SynchDescriptor {
    /// Descriptor with one group.
    pub fn single(group: SynchGroup) -> Self {
        Self(vec![group])
    }

    /// First group; the only one used by the engines.
    pub fn first(&self) -> Option<&SynchGroup> {
        self.0.first()
    }
}
