//! State derivation for counter/timer axes.
//!
//! In hardware-synchronized acquisitions the card reports `On` as soon as the
//! last pulse was counted, long before the host has drained the buffer, and
//! the timer axis has no hardware state at all. The host must keep seeing
//! `Moving` until every point was read, so the state is derived from the raw
//! device state together with the read bookkeeping.

use crate::hardware::channel::RawState;
use crate::sync::State;

/// Which of the two read/state protocols is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Software triggered: one scalar per start.
    SingleShot,
    /// Hardware triggered or gated: buffered bursts.
    MultiPoint,
}

/// Role of an axis within the counter/timer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRole {
    /// Axis 1, the master of the acquisition.
    Timer,
    /// Any other axis.
    Counter,
}

/// Inputs of [`derive_state`].
#[derive(Debug, Clone, Copy)]
pub struct StateInputs {
    /// Timer or counter.
    pub role: AxisRole,
    /// Single-shot or multi-point acquisition.
    pub mode: ReadMode,
    /// Raw device state; not consulted for the timer axis.
    pub raw: Option<RawState>,
    /// Read cursor, `None` when the axis was not prepared for this acquisition.
    pub cursor: Option<usize>,
    /// Points expected in the acquisition.
    pub repetitions: usize,
    /// The axis was aborted since its last preparation.
    pub aborted: bool,
}

/// Derive the state reported to the host framework.
pub fn derive_state(inputs: StateInputs) -> State {
    match (inputs.mode, inputs.role) {
        // The software-timed timer cannot tell running from idle on its own.
        (ReadMode::SingleShot, AxisRole::Timer) => State::On,
        (ReadMode::SingleShot, AxisRole::Counter) => {
            inputs.raw.map(State::from_raw).unwrap_or(State::Unknown)
        }
        (ReadMode::MultiPoint, AxisRole::Timer) => match inputs.cursor {
            Some(cursor) if cursor < inputs.repetitions && !inputs.aborted => State::Moving,
            _ => State::On,
        },
        (ReadMode::MultiPoint, AxisRole::Counter) => match inputs.raw {
            Some(RawState::On) => match inputs.cursor {
                Some(cursor) if cursor < inputs.repetitions => State::Moving,
                _ => State::On,
            },
            Some(raw) => State::from_raw(raw),
            None => State::Unknown,
        },
    }
}
