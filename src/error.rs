//! Custom error types for the controllers.
//!
//! This module defines the primary error type, `CtrlError`, shared by the
//! counter/timer and trigger/gate engines. Using the `thiserror` crate, it
//! provides a centralized and consistent way to report what went wrong to the
//! host framework that drives the axis callbacks.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: semantic problems with attributes or properties, such as an
//!   undefined clock source, an invalid idle-state string, a duty cycle outside
//!   `(0, 100]` or an integration time the 32-bit counter cannot produce. Raised
//!   synchronously and never retried.
//! - **`DeviceUnreachable`**: binding or I/O failures at the channel boundary. Created
//!   from [`ChannelError`] with `?`.
//! - **`InvalidOperation`**: the host framework called a callback in a way the engine
//!   cannot honour (for example software synchronization on a counter axis).
//! - **`UnknownAxis`**: a callback for an axis that was never added.
//! - **`Config`**: wraps Figment extraction errors from the configuration layer.
//!
//! Buffer read failures during `read_axis` are deliberately absent: they are logged
//! and the read degrades to an empty or zero sample so polling can continue.

use crate::hardware::channel::ChannelError;
use crate::sync::Axis;
use thiserror::Error;

/// Convenience alias for results using the controller error type.
pub type CtrlResult<T> = std::result::Result<T, CtrlError>;

/// Errors reported to the host framework.
#[derive(Error, Debug)]
pub enum CtrlError {
    /// Invalid configuration or argument, fixable by the operator.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A channel, card or attribute proxy could not be reached or refused a call.
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    /// The call is not valid in the current engine state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The axis was never added, or was removed.
    #[error("Axis {0} is not bound to a channel")]
    UnknownAxis(Axis),

    /// The configuration file or environment could not be loaded.
    #[error("Configuration loading error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl From<ChannelError> for CtrlError {
    fn from(value: ChannelError) -> Self {
        CtrlError::DeviceUnreachable(value.to_string())
    }
}

impl From<figment::Error> for CtrlError {
    fn from(value: figment::Error) -> Self {
        CtrlError::Config(Box::new(value))
    }
}

impl CtrlError {
    /// Whether the error is a configuration problem the operator has to fix.
    pub fn is_configuration(&self) -> bool {
        matches!(self, CtrlError::Configuration(_) | CtrlError::Config(_))
    }
}
