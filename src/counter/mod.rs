//! Counter/Timer Engine
//!
//! Drives NI 660X counting channels through the host framework's axis
//! callbacks. Axis 1 is the timer: in software-triggered acquisitions it is a
//! real pulse channel whose high time is the integration time; in hardware
//! synchronized acquisitions it has no hardware role and synthesizes one
//! integration-time value per point produced by the counters. Axes 2 and up are
//! buffered counter channels.
//!
//! # Callback Sequence
//!
//! ```text
//! add_axis ─> load ─> prepare_all ─> prepare_axis ─> start_all ─> start_axis
//!                                                                    │
//!                  ┌─────────────── query_state / read_axis <────────┘
//!                  │                        (polled until On / empty data)
//!                  └─> abort (error or cancel) ─> remove_axis
//! ```
//!
//! Acquisition specifics (buffer attribute, application type, offset and
//! sign correction, source routing) come from the injected
//! [`AcquisitionVariant`].

pub mod axis;
pub mod state;
pub mod variant;

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use crate::config::CounterTimerConfig;
use crate::error::{CtrlError, CtrlResult};
use crate::hardware::channel::{AttrValue, Channel, DeviceConnector, RawState};
use crate::hardware::terminals::TerminalRouter;
use crate::sync::{AcqSynch, Axis, State, StatusTexts, MAX_DEVICE, TIMER_AXIS};
use crate::timing::HardwareConstants;

use axis::{AcquisitionState, AxisAttributes, BoundAxis};
use state::{derive_state, AxisRole, ReadMode, StateInputs};
use variant::{AcquisitionVariant, AxisContext, COUNT_EDGES_APP_TYPE};


/// Parameters of the acquisition set up by the last [`CounterTimerEngine::load`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionSession {
    /// Integration time per point, in seconds.
    pub integration_time: f64,
    /// Points expected in this acquisition.
    pub repetitions: usize,
    /// Counter axes configured so far; a coarse progress hint only.
    pub configured_count: usize,
}

/// Data returned by [`CounterTimerEngine::read_axis`].
#[derive(Debug, Clone, PartialEq)]
pub enum AxisData {
    /// Single-shot reading.
    Scalar(f64),
    /// Points that became available since the previous read. Empty once
    /// the acquisition is fully read.
    Points(Vec<f64>),
}

impl AxisData {
    /// The points of a multi-point read; empty for a scalar.
    pub fn points(&self) -> &[f64] {
        match self {
            AxisData::Scalar(_) => &[],
            AxisData::Points(points) => points,
        }
    }
}

/// Counter/timer controller core.
pub struct CounterTimerEngine {
    channel_names: Vec<String>,
    latency_time: f64,
    query_filter: Option<u32>,
    hardware: HardwareConstants,
    synchronization: AcqSynch,
    session: AcquisitionSession,
    variant: Box<dyn AcquisitionVariant>,
    connector: Box<dyn DeviceConnector>,
    router: TerminalRouter,
    axes: BTreeMap<Axis, BoundAxis>,
}

impl CounterTimerEngine {
    /// Create an engine with an explicit acquisition variant.
    pub fn new(
        config: &CounterTimerConfig,
        hardware: HardwareConstants,
        variant: Box<dyn AcquisitionVariant>,
        connector: Box<dyn DeviceConnector>,
    ) -> Self {
        Self {
            channel_names: config.channel_names(),
            latency_time: config.latency_time,
            query_filter: config.query_filter,
            hardware,
            synchronization: AcqSynch::default(),
            session: AcquisitionSession::default(),
            variant,
            connector,
            router: TerminalRouter::new(config.connect_terms.clone()),
            axes: BTreeMap::new(),
        }
    }

    /// Create an engine with the variant selected in the configuration.
    pub fn from_config(
        config: &CounterTimerConfig,
        hardware: HardwareConstants,
        connector: Box<dyn DeviceConnector>,
    ) -> Self {
        Self::new(config, hardware, config.variant.build(), connector)
    }

    /// Set the synchronization mode of the next acquisition.
    pub fn set_synchronization(&mut self, synchronization: AcqSynch) {
        debug!(?synchronization, "synchronization changed");
        self.synchronization = synchronization;
    }

    /// Parameters of the last `load`.
    pub fn session(&self) -> &AcquisitionSession {
        &self.session
    }

    /// Terminal routing state.
    pub fn router(&self) -> &TerminalRouter {
        &self.router
    }

    /// Bound axes in ascending order.
    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        self.axes.keys().copied()
    }

    /// Read cursor of an axis, `None` when unbound or not prepared.
    pub fn cursor(&self, axis: Axis) -> Option<usize> {
        self.axes.get(&axis).and_then(BoundAxis::cursor)
    }

    /// Whether the axis was aborted since it was last prepared.
    pub fn is_aborted(&self, axis: Axis) -> Option<bool> {
        self.axes.get(&axis).map(|bound| bound.acquisition.aborted)
    }

    fn read_mode(&self) -> ReadMode {
        if self.synchronization == AcqSynch::SoftwareTrigger {
            ReadMode::SingleShot
        } else {
            ReadMode::MultiPoint
        }
    }

    fn query_filter(&self) -> u32 {
        self.query_filter
            .unwrap_or(self.variant.profile().query_filter)
            .max(1)
    }

    fn bound(&self, axis: Axis) -> CtrlResult<&BoundAxis> {
        self.axes.get(&axis).ok_or(CtrlError::UnknownAxis(axis))
    }

    fn bound_mut(&mut self, axis: Axis) -> CtrlResult<&mut BoundAxis> {
        self.axes.get_mut(&axis).ok_or(CtrlError::UnknownAxis(axis))
    }

    // =========================================================================
    // Axis lifecycle
    // =========================================================================

    /// Bind the channel configured for `axis` and initialise its state.
    ///
    /// Counter axes must declare the variant's application type. A failure
    /// leaves this axis unbound and does not affect other axes.
    pub fn add_axis(&mut self, axis: Axis) -> CtrlResult<()> {
        if !(1..=MAX_DEVICE).contains(&axis) {
            return Err(CtrlError::Configuration(format!(
                "Axis {axis} outside 1..={MAX_DEVICE}"
            )));
        }
        let name = self
            .channel_names
            .get(axis - 1)
            .filter(|name| !name.is_empty())
            .cloned()
            .ok_or_else(|| {
                CtrlError::Configuration(format!("No channel device name for axis {axis}"))
            })?;

        let channel = self.connector.channel(&name).map_err(|e| {
            error!(axis, device = %name, error = %e, "could not bind channel");
            CtrlError::from(e)
        })?;

        let properties = channel.get_property(&["applicationType", "counterName", "DeviceName"])?;
        let property = |key: &str| {
            properties
                .get(key)
                .and_then(|values| values.first())
                .cloned()
                .unwrap_or_default()
        };
        let app_type = property("applicationType");
        let counter_name = format!("/{}/{}", property("DeviceName"), property("counterName"));

        let mut attributes = AxisAttributes::default();
        if axis != TIMER_AXIS {
            let profile = self.variant.profile();
            if app_type != profile.application_type {
                error!(
                    axis,
                    found = %app_type,
                    expected = profile.application_type,
                    "channel has wrong application type"
                );
                return Err(CtrlError::Configuration(format!(
                    "The channel {axis} has wrong application type, {app_type:?} != {:?}",
                    profile.application_type
                )));
            }
            attributes.set(profile.clock_source_attr, AttrValue::Empty);
            for (attr, value) in self.variant.axis_defaults() {
                attributes.set(attr, value);
            }
            if let Some(timeout) = self.variant.channel_timeout() {
                channel.set_timeout(timeout);
            }
        }

        if self.axes.contains_key(&axis) {
            warn!(axis, "axis added twice, rebinding");
        }
        info!(axis, device = %name, counter = %counter_name, "axis added");
        self.axes.insert(
            axis,
            BoundAxis {
                channel,
                device_name: name,
                counter_name,
                acquisition: AcquisitionState::default(),
                configured: false,
                attributes,
            },
        );
        Ok(())
    }

    /// Release the axis. Removing the last axis releases terminal routing.
    pub fn remove_axis(&mut self, axis: Axis) -> CtrlResult<()> {
        self.axes.remove(&axis).ok_or(CtrlError::UnknownAxis(axis))?;
        self.variant.on_remove_axis(axis);
        info!(axis, "axis removed");
        if self.axes.is_empty() {
            self.router.release_cards();
        }
        Ok(())
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Store the parameters of the next acquisition.
    ///
    /// On the timer axis under software synchronization this also validates
    /// the integration time and programs the timing pulse. Any other axis is
    /// only loaded for hardware-synchronized acquisitions.
    pub fn load(
        &mut self,
        axis: Axis,
        value: f64,
        repetitions: usize,
        latency: f64,
    ) -> CtrlResult<()> {
        debug!(axis, value, repetitions, latency, "load");
        let software = self.synchronization.is_software();
        if axis != TIMER_AXIS && software {
            return Err(CtrlError::InvalidOperation(
                "The master channel must be the first channel".into(),
            ));
        }
        if axis == TIMER_AXIS && software {
            self.hardware.check_integration_time(value)?;
        }

        self.session = AcquisitionSession {
            integration_time: value,
            repetitions,
            configured_count: 0,
        };
        for bound in self.axes.values_mut() {
            bound.configured = false;
        }

        if axis == TIMER_AXIS && software {
            let low_time = self.latency_time;
            let bound = self.bound(axis)?;
            let channel = bound.channel.as_ref();
            stop_unless_standby(channel)?;
            channel.write_attribute("SampleTimingType", "Implicit".into())?;
            channel.write_attribute("SampPerChan", AttrValue::Int(repetitions as i64))?;
            channel.write_attribute("HighTime", value.into())?;
            channel.write_attribute("LowTime", low_time.into())?;
        }
        Ok(())
    }

    /// Forget all read cursors and apply pending terminal routing.
    pub fn prepare_all(&mut self) -> CtrlResult<bool> {
        debug!("prepare_all");
        for bound in self.axes.values_mut() {
            bound.acquisition.cursor = None;
        }
        self.router.apply_pending(self.connector.as_ref())?;
        Ok(true)
    }

    /// Arm one axis for the acquisition and write its per-session
    /// configuration if that has not happened yet.
    pub fn prepare_axis(&mut self, axis: Axis, value: f64) -> CtrlResult<bool> {
        debug!(axis, value, "prepare_axis");
        let profile = self.variant.profile();
        let repetitions = self.session.repetitions;
        let bound = self.axes.get_mut(&axis).ok_or(CtrlError::UnknownAxis(axis))?;
        bound.acquisition.reset();
        if axis == TIMER_AXIS {
            return Ok(true);
        }

        let channel = bound.channel.as_ref();
        stop_unless_standby(channel)?;
        if !bound.configured {
            let clock_source = bound
                .attributes
                .get(profile.clock_source_attr)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| {
                    CtrlError::Configuration(format!(
                        "Undefined {:?} attribute",
                        profile.clock_source_attr
                    ))
                })?;
            channel.write_attribute(profile.clock_source_attr, clock_source)?;
            channel.write_attribute("SampleTimingType", profile.sample_timing_type.into())?;
            // Edge-counting channels need a 2-point buffer for a single trigger.
            let samples = if profile.application_type == COUNT_EDGES_APP_TYPE && repetitions == 1
            {
                2
            } else {
                repetitions
            };
            channel.write_attribute("SampPerChan", AttrValue::Int(samples as i64))?;
            channel.write_attribute("DataTransferMechanism", "Interrupts".into())?;
            bound.configured = true;
            self.session.configured_count += 1;
        }

        self.variant.on_prepare_axis(AxisContext {
            axis,
            channel,
            counter_name: &bound.counter_name,
            attributes: &mut bound.attributes,
            connector: self.connector.as_ref(),
        })?;
        Ok(true)
    }

    /// Nothing to do: every axis is started by `start_axis`.
    pub fn start_all(&mut self) -> CtrlResult<()> {
        Ok(())
    }

    /// Start counting. The timer axis is only started when it provides the
    /// software timing pulse; under hardware synchronization the trigger/gate
    /// channel is the clock.
    pub fn start_axis(&mut self, axis: Axis, value: f64) -> CtrlResult<()> {
        debug!(axis, value, "start_axis");
        if axis != TIMER_AXIS || self.synchronization == AcqSynch::SoftwareTrigger {
            self.bound(axis)?.channel.start()?;
        }
        Ok(())
    }

    /// Stop the channel if needed and mark the axis aborted.
    pub fn abort(&mut self, axis: Axis) -> CtrlResult<()> {
        debug!(axis, "abort");
        let stop_channel = axis != TIMER_AXIS || self.synchronization == AcqSynch::SoftwareTrigger;
        let bound = self.bound_mut(axis)?;
        bound.acquisition.aborted = true;
        if stop_channel {
            stop_unless_standby(bound.channel.as_ref())?;
        }
        Ok(())
    }

    /// State and status text of one axis.
    pub fn query_state(&self, axis: Axis) -> CtrlResult<(State, String)> {
        let bound = self.bound(axis)?;
        let role = if axis == TIMER_AXIS {
            AxisRole::Timer
        } else {
            AxisRole::Counter
        };
        let raw = match role {
            AxisRole::Timer => None,
            AxisRole::Counter => Some(bound.channel.state()?),
        };
        let state = derive_state(StateInputs {
            role,
            mode: self.read_mode(),
            raw,
            cursor: bound.cursor(),
            repetitions: self.session.repetitions,
            aborted: bound.acquisition.aborted,
        });
        Ok((state, StatusTexts::COUNTING.status(state)))
    }

    /// Read the axis according to the active read mode.
    pub fn read_axis(&mut self, axis: Axis) -> CtrlResult<AxisData> {
        match self.read_mode() {
            ReadMode::SingleShot => self.read_single(axis).map(AxisData::Scalar),
            ReadMode::MultiPoint => self.read_multiple(axis).map(AxisData::Points),
        }
    }

    fn read_single(&mut self, axis: Axis) -> CtrlResult<f64> {
        if axis == TIMER_AXIS {
            self.bound(axis)?;
            return Ok(self.session.integration_time);
        }
        let profile = self.variant.profile();
        let query_filter = self.query_filter();
        let bound = self.axes.get_mut(&axis).ok_or(CtrlError::UnknownAxis(axis))?;

        let mut data = vec![0.0];
        if bound.acquisition.should_sample(query_filter) {
            match bound.channel.read_attribute(profile.buffer_attr) {
                Ok(value) => {
                    let buffer = value.into_buffer();
                    if !buffer.is_empty() {
                        data = buffer;
                    }
                }
                Err(e) => error!(axis, error = %e, "exception while reading buffer"),
            }
            // The card repeats the first sample of a single-point acquisition.
            if data.len() == 2 {
                data = self.variant.post_process(axis, &bound.attributes, &data, 1);
            }
        }
        Ok(data.first().copied().unwrap_or(0.0))
    }

    fn read_multiple(&mut self, axis: Axis) -> CtrlResult<Vec<f64>> {
        let repetitions = self.session.repetitions;
        let cursor = self.bound(axis)?.cursor().ok_or_else(|| {
            CtrlError::InvalidOperation(format!("Axis {axis} was not prepared for this acquisition"))
        })?;
        debug!(axis, cursor, "read_axis");
        if cursor >= repetitions {
            return Ok(Vec::new());
        }

        let data = if axis == TIMER_AXIS {
            let produced = self
                .axes
                .values()
                .filter_map(BoundAxis::cursor)
                .max()
                .unwrap_or(cursor)
                .min(repetitions);
            vec![self.session.integration_time; produced.saturating_sub(cursor)]
        } else {
            let profile = self.variant.profile();
            let query_filter = self.query_filter();
            let bound = self.axes.get_mut(&axis).ok_or(CtrlError::UnknownAxis(axis))?;
            let mut data = Vec::new();
            if bound.acquisition.should_sample(query_filter) {
                match bound.channel.read_attribute(profile.buffer_attr) {
                    Ok(value) => {
                        let buffer = value.into_buffer();
                        // A single-point edge count is buffered as two samples,
                        // the first one a repeat.
                        let skip = usize::from(
                            profile.application_type == COUNT_EDGES_APP_TYPE
                                && repetitions == 1
                                && buffer.len() == 2,
                        );
                        if !buffer.is_empty() {
                            data = self.variant.post_process(
                                axis,
                                &bound.attributes,
                                &buffer,
                                cursor + skip,
                            );
                        }
                    }
                    Err(e) => error!(axis, error = %e, "exception while reading buffer"),
                }
            }
            data.truncate(repetitions - cursor);
            data
        };

        if let Some(read_cursor) = self.bound_mut(axis)?.acquisition.cursor.as_mut() {
            read_cursor.advance(data.len());
        }
        Ok(data)
    }

    // =========================================================================
    // Extra attributes
    // =========================================================================

    fn is_cached(&self, bound: &BoundAxis, name: &str) -> bool {
        name == self.variant.profile().clock_source_attr || bound.attributes.contains(name)
    }

    /// Read an extra attribute of a counter axis.
    pub fn get_extra_attribute(&self, axis: Axis, name: &str) -> CtrlResult<AttrValue> {
        debug!(axis, name, "get_extra_attribute");
        let name = name.to_ascii_lowercase();
        if axis == TIMER_AXIS {
            return Err(timer_attribute(&name));
        }
        let bound = self.bound(axis)?;
        if name == "channeldevname" {
            return Ok(AttrValue::Str(bound.device_name.clone()));
        }
        if self.variant.direct_attributes().contains(&name.as_str()) {
            return Ok(bound.channel.read_attribute(&name)?);
        }
        if !self.is_cached(bound, &name) {
            return Err(unknown_attribute(&name));
        }
        match bound.attributes.get(&name) {
            Some(value) if !value.is_empty() => Ok(value.clone()),
            _ if name == self.variant.profile().clock_source_attr => {
                Ok(bound.channel.read_attribute(&name)?)
            }
            Some(value) => Ok(value.clone()),
            None => Ok(AttrValue::Empty),
        }
    }

    /// Write an extra attribute of a counter axis.
    ///
    /// Direct attributes go to the device (stopping it first unless in
    /// standby). Cached attributes are stored; a changed value invalidates the
    /// per-session configuration of the axis.
    pub fn set_extra_attribute(&mut self, axis: Axis, name: &str, value: AttrValue) -> CtrlResult<()> {
        debug!(axis, name, ?value, "set_extra_attribute");
        let name = name.to_ascii_lowercase();
        if axis == TIMER_AXIS {
            return Err(timer_attribute(&name));
        }
        if name == "channeldevname" {
            return Err(CtrlError::InvalidOperation("channelDevName is read-only".into()));
        }
        let direct = self.variant.direct_attributes().contains(&name.as_str());
        let bound = self.axes.get(&axis).ok_or(CtrlError::UnknownAxis(axis))?;
        if direct {
            let channel = bound.channel.as_ref();
            stop_unless_standby(channel)?;
            channel.write_attribute(&name, value)?;
            return Ok(());
        }
        if !self.is_cached(bound, &name) {
            return Err(unknown_attribute(&name));
        }

        let bound = self.axes.get_mut(&axis).ok_or(CtrlError::UnknownAxis(axis))?;
        if bound.attributes.get(&name) != Some(&value) {
            bound.attributes.set(&name, value);
            bound.configured = false;
            self.variant.on_attribute_set(axis, &name, &mut bound.attributes);
        }
        Ok(())
    }
}

fn stop_unless_standby(channel: &dyn Channel) -> CtrlResult<()> {
    if channel.state()? != RawState::Standby {
        channel.stop()?;
    }
    Ok(())
}

fn timer_attribute(name: &str) -> CtrlError {
    CtrlError::InvalidOperation(format!("Attribute {name} is not foreseen for timer"))
}

fn unknown_attribute(name: &str) -> CtrlError {
    CtrlError::Configuration(format!("Unknown axis attribute {name:?}"))
}
