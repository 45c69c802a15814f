//! Channel Capability
//!
//! A `Channel` is one counting or pulse-generating line of an NI 660X card as
//! exposed by the device-proxy layer. The engines only ever talk to hardware
//! through this trait, so the same state machine runs against a remote proxy,
//! a local driver, or the simulated channels in [`crate::hardware::mock`].
//!
//! # Contract
//! - Every call may block on a slow remote round trip. Buffer reads of tens of
//!   thousands of samples have been observed to take seconds, so timeouts are
//!   applied here (see [`Channel::set_timeout`]) and never inside the engines.
//! - Methods take `&self`; implementations use interior mutability for state.
//! - Errors are reported as [`ChannelError`] and converted to
//!   `CtrlError::DeviceUnreachable` by the engines.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// An error that can occur when talking to a channel, card or attribute proxy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The device could not be reached.
    #[error("Device not reachable: {0}")]
    Unreachable(String),

    /// The call did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Reading or writing an attribute failed.
    #[error("Attribute '{name}' failed: {reason}")]
    Attribute { name: String, reason: String },

    /// A command such as `Start` or `Stop` failed.
    #[error("Command failed: {0}")]
    Command(String),
}

/// Value of a device attribute or property.
///
/// Buffers arrive as `Array`; a buffer attribute with no data yet is `Empty`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// String value.
    Str(String),
    /// Sample buffer.
    Array(Vec<f64>),
    /// No value yet.
    Empty,
}

impl AttrValue {
    /// Numeric view of the value, accepting integers, floats and numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean view, accepting integers as C-style flags.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            AttrValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// String view of a `Str` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value is unset.
    pub fn is_empty(&self) -> bool {
        matches!(self, AttrValue::Empty)
    }

    /// Interpret the value as a sample buffer. Scalars become one-element buffers.
    pub fn into_buffer(self) -> Vec<f64> {
        match self {
            AttrValue::Array(values) => values,
            AttrValue::Empty => Vec::new(),
            other => other.as_f64().into_iter().collect(),
        }
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(value: Vec<f64>) -> Self {
        AttrValue::Array(value)
    }
}

/// Discrete state reported by the device proxy.
///
/// `Standby` is the stopped and configurable state, `On` means the last
/// acquisition or generation finished, `Running` means the channel is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawState {
    /// Finished.
    On,
    /// Powered off.
    Off,
    /// Stopped and configurable.
    Standby,
    /// Counting or generating.
    Running,
    /// Moving.
    Moving,
    /// Hardware fault.
    Fault,
    /// Alarm condition.
    Alarm,
    /// Initialising.
    Init,
    /// Disabled.
    Disable,
    /// State could not be determined.
    Unknown,
}

impl fmt::Display for RawState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Capability: one hardware counting/generating line.
pub trait Channel: Send {
    /// Read an attribute (e.g. `CountBuffer`, `SampleClockSource`).
    fn read_attribute(&self, name: &str) -> Result<AttrValue, ChannelError>;

    /// Write an attribute. Some attributes require the channel to be in standby.
    fn write_attribute(&self, name: &str, value: AttrValue) -> Result<(), ChannelError>;

    /// Start counting or generation.
    fn start(&self) -> Result<(), ChannelError>;

    /// Stop counting or generation. Stopping a stopped channel is harmless.
    fn stop(&self) -> Result<(), ChannelError>;

    /// Current discrete state.
    fn state(&self) -> Result<RawState, ChannelError>;

    /// Read device properties. Every property maps to a list of string values.
    fn get_property(&self, names: &[&str]) -> Result<HashMap<String, Vec<String>>, ChannelError>;

    /// Set the I/O timeout applied to every call on this channel.
    ///
    /// # Default Implementation
    /// Ignores the request, for channels without a configurable timeout.
    fn set_timeout(&self, _timeout: Duration) {}
}

/// A card-level device able to route signals between terminals.
pub trait TerminalCard: Send {
    /// Route `source` to `destination` with the given polarity.
    fn connect_terms(
        &self,
        source: &str,
        destination: &str,
        polarity: &str,
    ) -> Result<(), ChannelError>;
}

/// A single readable attribute of some other device, addressed by full name.
pub trait AttributeSource: Send {
    /// Current value of the attribute.
    fn read(&self) -> Result<AttrValue, ChannelError>;
}

/// Binds device names from the configuration to live capabilities.
pub trait DeviceConnector: Send {
    /// Bind a counter channel by device name.
    fn channel(&self, name: &str) -> Result<Box<dyn Channel>, ChannelError>;

    /// Bind a card device used for terminal routing.
    fn card(&self, name: &str) -> Result<Box<dyn TerminalCard>, ChannelError>;

    /// Bind a fully qualified attribute (`device/attribute`).
    fn attribute(&self, full_name: &str) -> Result<Box<dyn AttributeSource>, ChannelError>;
}
