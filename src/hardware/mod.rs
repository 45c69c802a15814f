//! Hardware boundary: the channel capability, terminal routing and mocks.

pub mod channel;
pub mod mock;
pub mod terminals;

pub use channel::{AttrValue, Channel, ChannelError, DeviceConnector, RawState};
pub use terminals::{ConnectDirective, ConnectTerms, TerminalRouter};
