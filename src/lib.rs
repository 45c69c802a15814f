//! # NI 660X Controller Core Library
//!
//! Counter/timer and trigger/gate controllers for National Instruments 660X
//! counter cards. The cards are reached through device proxies exposing a
//! small attribute-oriented channel interface; an orchestrating framework
//! drives the controllers through per-axis callbacks (add, load, prepare,
//! start, poll state, read, abort).
//!
//! ## Crate Structure
//!
//! - **`counter`**: `CounterTimerEngine`, the axis-1 timer plus buffered
//!   counter axes, with pluggable acquisition variants (edge counting,
//!   encoder position capture, pulse width).
//! - **`trigger_gate`**: `TriggerGateEngine`, translating synchronization
//!   descriptors into pulse-train attributes.
//! - **`hardware`**: the `Channel` capability, terminal routing between card
//!   connectors, and mock implementations for running without hardware.
//! - **`sync`**: the orchestrator-side model (synchronization modes, states,
//!   status texts, synchronization descriptors).
//! - **`timing`**: hardware timing constants and pulse bounds.
//! - **`config`**: Figment-based configuration from TOML and environment.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`error`**: the `CtrlError` enum shared by all modules.
//! - **`validation`**: small validators used by configuration and engines.

pub mod config;
pub mod counter;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod sync;
pub mod timing;
pub mod trigger_gate;
pub mod validation;

pub use counter::{AxisData, CounterTimerEngine};
pub use error::{CtrlError, CtrlResult};
pub use sync::{AcqSynch, State, SynchDescriptor, SynchGroup};
pub use trigger_gate::TriggerGateEngine;
