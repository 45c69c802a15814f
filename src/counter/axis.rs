//! Per-axis acquisition state of the counter/timer engine.

use crate::hardware::channel::{AttrValue, Channel};
use std::collections::HashMap;

/// Index of the next unread sample in the hardware buffer.
///
/// Only ever moves forward within one acquisition; a new acquisition starts a
/// fresh cursor at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadCursor(usize);

impl ReadCursor {
    /// Samples consumed so far.
    pub fn position(self) -> usize {
        self.0
    }

    /// Move past `consumed` samples.
    pub fn advance(&mut self, consumed: usize) {
        self.0 += consumed;
    }
}

/// Last written value of each configuration attribute, keyed by lowercase name.
///
/// Unset entries hold [`AttrValue::Empty`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisAttributes(HashMap<String, AttrValue>);

impl AxisAttributes {
    /// Cached value, looked up case-insensitively.
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.0.get(&name.to_ascii_lowercase())
    }

    /// Store a value under its lowercase name.
    pub fn set(&mut self, name: &str, value: AttrValue) {
        self.0.insert(name.to_ascii_lowercase(), value);
    }

    /// Whether the attribute is known to this axis.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Numeric value of an attribute, `None` when unset or not numeric.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(AttrValue::as_f64)
    }

    /// String value of an attribute, `None` when unset, empty or not a string.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(AttrValue::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Bookkeeping reset at every preparation of an acquisition.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionState {
    /// `None` until the axis is prepared for the current acquisition.
    pub cursor: Option<ReadCursor>,
    /// Set by `abort`; stops the synthetic timer from reporting `Moving`.
    pub aborted: bool,
    /// Calls since the buffer was last read, modulo the query filter.
    pub delay_counter: u32,
}

impl AcquisitionState {
    /// Arm for a new acquisition.
    pub fn reset(&mut self) {
        self.cursor = Some(ReadCursor::default());
        self.aborted = false;
        self.delay_counter = 0;
    }

    /// Advance the decimation counter; true when this call should sample.
    pub fn should_sample(&mut self, query_filter: u32) -> bool {
        let filter = query_filter.max(1);
        self.delay_counter = (self.delay_counter + 1) % filter;
        self.delay_counter == 0
    }
}

/// Everything the engine owns for one bound axis.
pub struct BoundAxis {
    /// Bound device-proxy channel.
    pub channel: Box<dyn Channel>,
    /// Device name the channel was bound with.
    pub device_name: String,
    /// Fully qualified counter, e.g. `/Dev1/ctr2`.
    pub counter_name: String,
    /// Per-acquisition bookkeeping.
    pub acquisition: AcquisitionState,
    /// Per-session hardware configuration has been written.
    pub configured: bool,
    /// Cached configuration attributes.
    pub attributes: AxisAttributes,
}

impl BoundAxis {
    /// Read cursor, `None` when not prepared.
    pub fn cursor(&self) -> Option<usize> {
        self.acquisition.cursor.map(ReadCursor::position)
    }
}
