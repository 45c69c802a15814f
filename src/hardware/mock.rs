//! Mock Hardware Implementations
//!
//! Provides simulated channels, cards and attribute proxies for testing the
//! engines without an NI 660X card or a device server.
//!
//! # Available Mocks
//!
//! - `MockChannel` - counter line with scripted state, growing sample buffers
//!   and a log of every attribute write
//! - `MockCard` - terminal-routing card recording `connect_terms` calls
//! - `MockAttribute` - external reference attribute (e.g. a motor position)
//! - `MockConnector` - hands the above out by device name
//!
//! All mocks are cheap handles over shared state: clone one, give the clone to
//! an engine, and keep inspecting or scripting the original.
//!
//! # Simulated Device Behaviour
//!
//! - `start()` moves the channel to `Running`, `stop()` to `Standby`
//! - buffer attributes return everything pushed so far, like the real
//!   buffered counters do while an acquisition is in progress
//! - `finish()` moves the channel to `On` (acquisition complete)

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::hardware::channel::{
    AttrValue, AttributeSource, Channel, ChannelError, DeviceConnector, RawState, TerminalCard,
};

// =============================================================================
// MockChannel - Simulated Counter Line
// =============================================================================

#[derive(Debug)]
struct MockChannelState {
    state: RawState,
    attributes: HashMap<String, AttrValue>,
    buffers: HashMap<String, Vec<f64>>,
    properties: HashMap<String, Vec<String>>,
    writes: Vec<(String, AttrValue)>,
    failing_reads: usize,
    failing_commands: usize,
    starts: usize,
    stops: usize,
    timeout: Option<Duration>,
}

impl MockChannelState {
    fn take_command_failure(&mut self, command: &str) -> Result<(), ChannelError> {
        if self.failing_commands > 0 {
            self.failing_commands -= 1;
            return Err(ChannelError::Command(format!("{command}: simulated failure")));
        }
        Ok(())
    }
}

/// Simulated counter line.
///
/// # Example
///
/// ```rust
/// use ni660x_ctrl::hardware::channel::Channel;
/// use ni660x_ctrl::hardware::mock::MockChannel;
///
/// let channel = MockChannel::counter("Dev1", "ctr1", "CICountEdgesChan");
/// channel.push_samples("CountBuffer", &[3.0, 5.0]);
/// let data = channel.read_attribute("CountBuffer").unwrap().into_buffer();
/// assert_eq!(data, vec![3.0, 5.0]);
/// ```
#[derive(Debug, Clone)]
pub struct MockChannel {
    inner: Arc<Mutex<MockChannelState>>,
}

impl MockChannel {
    /// Create a channel in `Standby` with no properties.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockChannelState {
                state: RawState::Standby,
                attributes: HashMap::new(),
                buffers: HashMap::new(),
                properties: HashMap::new(),
                writes: Vec::new(),
                failing_reads: 0,
                failing_commands: 0,
                starts: 0,
                stops: 0,
                timeout: None,
            })),
        }
    }

    /// Create a channel declaring the given card, counter and application type.
    pub fn counter(device_name: &str, counter_name: &str, application_type: &str) -> Self {
        let channel = Self::new();
        {
            let mut inner = channel.lock();
            inner
                .properties
                .insert("DeviceName".into(), vec![device_name.to_string()]);
            inner
                .properties
                .insert("counterName".into(), vec![counter_name.to_string()]);
            inner
                .properties
                .insert("applicationType".into(), vec![application_type.to_string()]);
        }
        channel
    }

    fn lock(&self) -> MutexGuard<'_, MockChannelState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Force the reported state.
    pub fn set_state(&self, state: RawState) {
        self.lock().state = state;
    }

    /// Mark the acquisition as complete (`On`).
    pub fn finish(&self) {
        self.set_state(RawState::On);
    }

    /// Append samples to a buffer attribute.
    pub fn push_samples(&self, buffer: &str, samples: &[f64]) {
        self.lock()
            .buffers
            .entry(buffer.to_string())
            .or_default()
            .extend_from_slice(samples);
    }

    /// Replace a buffer attribute.
    pub fn set_buffer(&self, buffer: &str, samples: Vec<f64>) {
        self.lock().buffers.insert(buffer.to_string(), samples);
    }

    /// Set an attribute value without recording a write.
    pub fn set_attribute(&self, name: &str, value: AttrValue) {
        self.lock().attributes.insert(name.to_string(), value);
    }

    /// Make the next `count` attribute reads fail.
    pub fn fail_next_reads(&self, count: usize) {
        self.lock().failing_reads = count;
    }

    /// Make the next `count` start/stop commands fail.
    pub fn fail_next_commands(&self, count: usize) {
        self.lock().failing_commands = count;
    }

    /// Every attribute write, in order.
    pub fn writes(&self) -> Vec<(String, AttrValue)> {
        self.lock().writes.clone()
    }

    /// Values written to one attribute, in order.
    pub fn writes_to(&self, name: &str) -> Vec<AttrValue> {
        self.lock()
            .writes
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Last value written to an attribute.
    pub fn last_write(&self, name: &str) -> Option<AttrValue> {
        self.writes_to(name).pop()
    }

    /// Number of `start` calls that succeeded.
    pub fn start_count(&self) -> usize {
        self.lock().starts
    }

    /// Number of `stop` calls that succeeded.
    pub fn stop_count(&self) -> usize {
        self.lock().stops
    }

    /// Last timeout set through `set_timeout`.
    pub fn timeout(&self) -> Option<Duration> {
        self.lock().timeout
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for MockChannel {
    fn read_attribute(&self, name: &str) -> Result<AttrValue, ChannelError> {
        let mut inner = self.lock();
        if inner.failing_reads > 0 {
            inner.failing_reads -= 1;
            return Err(ChannelError::Attribute {
                name: name.to_string(),
                reason: "simulated read failure".into(),
            });
        }
        if let Some(buffer) = inner.buffers.get(name) {
            return Ok(AttrValue::Array(buffer.clone()));
        }
        Ok(inner
            .attributes
            .get(name)
            .cloned()
            .unwrap_or(AttrValue::Empty))
    }

    fn write_attribute(&self, name: &str, value: AttrValue) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        inner.writes.push((name.to_string(), value.clone()));
        inner.attributes.insert(name.to_string(), value);
        Ok(())
    }

    fn start(&self) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        inner.take_command_failure("Start")?;
        inner.starts += 1;
        inner.state = RawState::Running;
        Ok(())
    }

    fn stop(&self) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        inner.take_command_failure("Stop")?;
        inner.stops += 1;
        inner.state = RawState::Standby;
        Ok(())
    }

    fn state(&self) -> Result<RawState, ChannelError> {
        Ok(self.lock().state)
    }

    fn get_property(&self, names: &[&str]) -> Result<HashMap<String, Vec<String>>, ChannelError> {
        let inner = self.lock();
        Ok(names
            .iter()
            .map(|name| {
                let values = inner.properties.get(*name).cloned().unwrap_or_default();
                (name.to_string(), values)
            })
            .collect())
    }

    fn set_timeout(&self, timeout: Duration) {
        self.lock().timeout = Some(timeout);
    }
}

// =============================================================================
// MockCard - Simulated Terminal Routing
// =============================================================================

/// Card device recording routed connections.
#[derive(Debug, Clone, Default)]
pub struct MockCard {
    connections: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl MockCard {
    /// Card with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(source, destination, polarity)` routed so far.
    pub fn connections(&self) -> Vec<(String, String, String)> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TerminalCard for MockCard {
    fn connect_terms(
        &self,
        source: &str,
        destination: &str,
        polarity: &str,
    ) -> Result<(), ChannelError> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((source.into(), destination.into(), polarity.into()));
        Ok(())
    }
}

// =============================================================================
// MockAttribute - Simulated External Attribute
// =============================================================================

/// External attribute with a settable value, counting its reads.
#[derive(Debug, Clone)]
pub struct MockAttribute {
    value: Arc<Mutex<(AttrValue, usize)>>,
}

impl MockAttribute {
    /// Attribute holding `value`.
    pub fn new(value: AttrValue) -> Self {
        Self {
            value: Arc::new(Mutex::new((value, 0))),
        }
    }

    /// Replace the value returned by later reads.
    pub fn set(&self, value: AttrValue) {
        self.value.lock().unwrap_or_else(PoisonError::into_inner).0 = value;
    }

    /// Number of reads so far.
    pub fn read_count(&self) -> usize {
        self.value.lock().unwrap_or_else(PoisonError::into_inner).1
    }
}

impl AttributeSource for MockAttribute {
    fn read(&self) -> Result<AttrValue, ChannelError> {
        let mut inner = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        inner.1 += 1;
        Ok(inner.0.clone())
    }
}

// =============================================================================
// MockConnector - Name-based Binding
// =============================================================================

/// Binds registered mocks by name; unknown names are unreachable.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    channels: HashMap<String, MockChannel>,
    cards: HashMap<String, MockCard>,
    attributes: HashMap<String, MockAttribute>,
}

impl MockConnector {
    /// Connector with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under a device name.
    pub fn with_channel(mut self, name: &str, channel: MockChannel) -> Self {
        self.channels.insert(name.to_string(), channel);
        self
    }

    /// Register a card under a device name.
    pub fn with_card(mut self, name: &str, card: MockCard) -> Self {
        self.cards.insert(name.to_string(), card);
        self
    }

    /// Register an attribute under its full name.
    pub fn with_attribute(mut self, full_name: &str, attribute: MockAttribute) -> Self {
        self.attributes.insert(full_name.to_string(), attribute);
        self
    }
}

impl DeviceConnector for MockConnector {
    fn channel(&self, name: &str) -> Result<Box<dyn Channel>, ChannelError> {
        self.channels
            .get(name)
            .map(|c| Box::new(c.clone()) as Box<dyn Channel>)
            .ok_or_else(|| ChannelError::Unreachable(name.to_string()))
    }

    fn card(&self, name: &str) -> Result<Box<dyn TerminalCard>, ChannelError> {
        self.cards
            .get(name)
            .map(|c| Box::new(c.clone()) as Box<dyn TerminalCard>)
            .ok_or_else(|| ChannelError::Unreachable(name.to_string()))
    }

    fn attribute(&self, full_name: &str) -> Result<Box<dyn AttributeSource>, ChannelError> {
        self.attributes
            .get(full_name)
            .map(|a| Box::new(a.clone()) as Box<dyn AttributeSource>)
            .ok_or_else(|| ChannelError::Unreachable(full_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stop_transitions() {
        let channel = MockChannel::new();
        assert_eq!(channel.state().unwrap(), RawState::Standby);
        channel.start().unwrap();
        assert_eq!(channel.state().unwrap(), RawState::Running);
        channel.finish();
        assert_eq!(channel.state().unwrap(), RawState::On);
        channel.stop().unwrap();
        assert_eq!(channel.state().unwrap(), RawState::Standby);
        assert_eq!((channel.start_count(), channel.stop_count()), (1, 1));
    }

    #[test]
    fn writes_are_logged_and_readable() {
        let channel = MockChannel::new();
        channel.write_attribute("HighTime", 0.5.into()).unwrap();
        channel.write_attribute("HighTime", 0.7.into()).unwrap();
        assert_eq!(channel.writes_to("HighTime").len(), 2);
        assert_eq!(channel.last_write("HighTime"), Some(AttrValue::Float(0.7)));
        assert_eq!(channel.read_attribute("HighTime").unwrap(), AttrValue::Float(0.7));
    }

    #[test]
    fn scripted_read_failures() {
        let channel = MockChannel::new();
        channel.push_samples("CountBuffer", &[1.0]);
        channel.fail_next_reads(1);
        assert!(channel.read_attribute("CountBuffer").is_err());
        assert_eq!(
            channel.read_attribute("CountBuffer").unwrap(),
            AttrValue::Array(vec![1.0])
        );
    }

    #[test]
    fn scripted_command_failures() {
        let channel = MockChannel::new();
        channel.start().unwrap();
        channel.fail_next_commands(1);
        assert!(channel.stop().is_err());
        assert_eq!(channel.stop_count(), 0);
        assert_eq!(channel.state().unwrap(), RawState::Running);
        channel.stop().unwrap();
        assert_eq!(channel.state().unwrap(), RawState::Standby);
    }

    #[test]
    fn connector_binds_by_name() {
        let card = MockCard::new();
        let connector = MockConnector::new()
            .with_channel("dev/ctr/1", MockChannel::new())
            .with_card("dev/card/1", card.clone());
        assert!(connector.channel("dev/ctr/1").is_ok());
        assert!(connector.channel("dev/ctr/2").is_err());
        connector
            .card("dev/card/1")
            .unwrap()
            .connect_terms("/Dev1/PFI39", "/Dev1/RTSI0", "DoNotInvertPolarity")
            .unwrap();
        assert_eq!(card.connections().len(), 1);
    }
}
