//! Trigger/Gate Engine
//!
//! Turns the orchestrator's synchronization descriptor (delay, active time,
//! total time, repeats) into the pulse-train attributes of an NI 660X
//! `COPulseChanTime` channel. Each axis can be a free-running generator or a
//! slave started by an external master trigger, optionally retriggerable.
//!
//! Per-axis settings are exposed to the host framework as extra attributes:
//!
//! | Attribute | Type | Default |
//! |-----------|------|---------|
//! | `slave` | bool | `false` |
//! | `retriggerable` | bool | `false` |
//! | `extrainitialdelaytime` | float, consumed by the next `configure` | `0` |
//! | `idlestate` | `Low` / `High` / `NotSet` | `NotSet` |
//! | `dutycycle` | percentage in `(0, 100]` | `100` |
//! | `starttriggersource` | string | controller default |
//! | `starttriggertype` | string | controller default |
//! | `ignoreslavedelay` | bool | `true` |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::TriggerGateConfig;
use crate::error::{CtrlError, CtrlResult};
use crate::hardware::channel::{AttrValue, Channel, DeviceConnector};
use crate::hardware::terminals::TerminalRouter;
use crate::sync::{Axis, State, StatusTexts, SynchDescriptor, MAX_DEVICE};
use crate::timing::HardwareConstants;
use crate::validation::check_duty_cycle;

/// Output level held by a pulse channel while not generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdleState {
    /// Low while idle.
    Low,
    /// High while idle.
    High,
    /// Leave the device setting untouched.
    #[default]
    NotSet,
}

impl IdleState {
    /// Name written to the `IdleState` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            IdleState::Low => "Low",
            IdleState::High => "High",
            IdleState::NotSet => "NotSet",
        }
    }
}

impl fmt::Display for IdleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdleState {
    type Err = CtrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(IdleState::Low),
            "High" => Ok(IdleState::High),
            "NotSet" => Ok(IdleState::NotSet),
            other => Err(CtrlError::Configuration(format!(
                "{other:?} is not a valid IdleState (Low, High, NotSet)"
            ))),
        }
    }
}

/// Per-axis generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerAxisSettings {
    /// Wait for a start trigger instead of free-running.
    pub slave: bool,
    /// Re-arm after every trigger (slave axes only).
    pub retriggerable: bool,
    /// Added to the delay of the next configuration only.
    pub extra_initial_delay: f64,
    /// Idle level to write, if any.
    pub idle_state: IdleState,
    /// Share of the active time kept high, in percent.
    pub duty_cycle: f64,
    /// Overrides of the controller start trigger, `None` when unset.
    pub start_trigger_source: Option<String>,
    /// Start trigger type override.
    pub start_trigger_type: Option<String>,
    /// Drop the descriptor delay on slave axes.
    pub ignore_slave_delay: bool,
}

impl Default for TriggerAxisSettings {
    fn default() -> Self {
        Self {
            slave: false,
            retriggerable: false,
            extra_initial_delay: 0.0,
            idle_state: IdleState::NotSet,
            duty_cycle: 100.0,
            start_trigger_source: None,
            start_trigger_type: None,
            ignore_slave_delay: true,
        }
    }
}

impl TriggerAxisSettings {
    /// Consume the one-shot extra delay.
    pub fn take_extra_initial_delay(&mut self) -> f64 {
        std::mem::take(&mut self.extra_initial_delay)
    }
}

struct TriggerAxis {
    channel: Box<dyn Channel>,
    settings: TriggerAxisSettings,
}

/// Pulse-train generator core.
pub struct TriggerGateEngine {
    channel_names: Vec<String>,
    start_trigger_source: String,
    start_trigger_type: String,
    hardware: HardwareConstants,
    connector: Box<dyn DeviceConnector>,
    router: TerminalRouter,
    axes: BTreeMap<Axis, TriggerAxis>,
}

impl TriggerGateEngine {
    /// Create an engine without any bound axis.
    pub fn new(
        config: &TriggerGateConfig,
        hardware: HardwareConstants,
        connector: Box<dyn DeviceConnector>,
    ) -> Self {
        Self {
            channel_names: config.channel_names(),
            start_trigger_source: config.start_trigger_source.clone(),
            start_trigger_type: config.start_trigger_type.clone(),
            hardware,
            connector,
            router: TerminalRouter::new(config.connect_terms.clone()),
            axes: BTreeMap::new(),
        }
    }

    /// Terminal routing state.
    pub fn router(&self) -> &TerminalRouter {
        &self.router
    }

    /// Bound axes in ascending order.
    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        self.axes.keys().copied()
    }

    /// Settings of one axis.
    pub fn settings(&self, axis: Axis) -> CtrlResult<&TriggerAxisSettings> {
        Ok(&self.bound(axis)?.settings)
    }

    fn bound(&self, axis: Axis) -> CtrlResult<&TriggerAxis> {
        self.axes.get(&axis).ok_or(CtrlError::UnknownAxis(axis))
    }

    fn bound_mut(&mut self, axis: Axis) -> CtrlResult<&mut TriggerAxis> {
        self.axes.get_mut(&axis).ok_or(CtrlError::UnknownAxis(axis))
    }

    /// Bind the channel configured for `axis`.
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
            .ok_or_else(|| {
                CtrlError::Configuration(format!("No channel device name for axis {axis}"))
            })?;
        let channel = self.connector.channel(name).map_err(|e| {
            error!(axis, device = %name, error = %e, "could not bind channel");
            CtrlError::from(e)
        })?;
        info!(axis, device = %name, "trigger/gate axis added");
        self.axes.insert(
            axis,
            TriggerAxis {
                channel,
                settings: TriggerAxisSettings::default(),
            },
        );
        Ok(())
    }

    /// Release the axis. Removing the last axis releases terminal routing.
    pub fn remove_axis(&mut self, axis: Axis) -> CtrlResult<()> {
        self.axes.remove(&axis).ok_or(CtrlError::UnknownAxis(axis))?;
        info!(axis, "trigger/gate axis removed");
        if self.axes.is_empty() {
            self.router.release_cards();
        }
        Ok(())
    }

    fn state_of(channel: &dyn Channel) -> CtrlResult<State> {
        Ok(State::from_raw(channel.state()?))
    }

    /// Program the pulse train of `axis` from the first group of `descriptor`.
    pub fn configure(&mut self, axis: Axis, descriptor: &SynchDescriptor) -> CtrlResult<()> {
        debug!(axis, ?descriptor, "configure");
        let group = *descriptor.first().ok_or_else(|| {
            CtrlError::Configuration("Empty synchronization description".into())
        })?;
        let min_pulse = self.hardware.trigger_min_pulse;
        let retrigger_low_time = self.hardware.retrigger_low_time;
        let default_source = self.start_trigger_source.clone();
        let default_type = self.start_trigger_type.clone();
        let bound = self.bound_mut(axis)?;
        let settings = &mut bound.settings;
        check_duty_cycle(settings.duty_cycle)?;

        let (active, passive) = group.pulse_times(settings.duty_cycle);
        let mut delay = group.delay;

        // Writing timing attributes requires a channel in standby.
        let channel = bound.channel.as_ref();
        if Self::state_of(channel)? == State::On {
            channel.stop()?;
        }

        channel.write_attribute("HighTime", active.into())?;
        if passive < min_pulse {
            warn!(axis, passive, min_pulse, "Changing passive time to the ni660x minimum");
            channel.write_attribute("LowTime", min_pulse.into())?;
        } else {
            channel.write_attribute("LowTime", passive.into())?;
        }
        channel.write_attribute("SampPerChan", AttrValue::Int(group.repeats as i64))?;

        if settings.idle_state != IdleState::NotSet {
            channel.write_attribute("IdleState", settings.idle_state.as_str().into())?;
        }

        let mut timing_type = "Implicit";
        let (source, trigger_type) = if settings.slave {
            if settings.ignore_slave_delay {
                delay = 0.0;
            }
            if settings.retriggerable {
                timing_type = "OnDemand";
                channel.write_attribute("LowTime", retrigger_low_time.into())?;
            }
            let source = match &settings.start_trigger_source {
                Some(source) => {
                    warn!(axis, %source, "start trigger source override in effect");
                    source.clone()
                }
                None => default_source,
            };
            let trigger_type = match &settings.start_trigger_type {
                Some(trigger_type) => {
                    warn!(axis, %trigger_type, "start trigger type override in effect");
                    trigger_type.clone()
                }
                None => default_type,
            };
            (source, trigger_type)
        } else {
            ("None".to_string(), "None".to_string())
        };
        channel.write_attribute("StartTriggerSource", source.into())?;
        channel.write_attribute("StartTriggerType", trigger_type.into())?;

        delay += settings.take_extra_initial_delay();
        channel.write_attribute("InitialDelayTime", delay.into())?;
        channel.write_attribute("SampleTimingType", timing_type.into())?;
        Ok(())
    }

    /// Apply pending terminal routing before generation starts.
    pub fn prepare_all(&mut self) -> CtrlResult<bool> {
        debug!("prepare_all");
        self.router.apply_pending(self.connector.as_ref())?;
        Ok(true)
    }

    /// Nothing to arm per axis; always ready.
    pub fn prepare_axis(&mut self, axis: Axis) -> CtrlResult<bool> {
        debug!(axis, "prepare_axis");
        self.bound(axis)?;
        Ok(true)
    }

    /// Start generating.
    pub fn start(&mut self, axis: Axis) -> CtrlResult<()> {
        debug!(axis, "start");
        self.bound(axis)?.channel.start()?;
        Ok(())
    }

    /// Stop generating.
    pub fn abort(&mut self, axis: Axis) -> CtrlResult<()> {
        debug!(axis, "abort");
        self.bound(axis)?.channel.stop()?;
        Ok(())
    }

    /// State and status text of one axis.
    pub fn query_state(&self, axis: Axis) -> CtrlResult<(State, String)> {
        let state = Self::state_of(self.bound(axis)?.channel.as_ref())?;
        Ok((state, StatusTexts::GENERATING.status(state)))
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    /// Make the axis wait for a start trigger.
    pub fn set_slave(&mut self, axis: Axis, slave: bool) -> CtrlResult<()> {
        self.bound_mut(axis)?.settings.slave = slave;
        Ok(())
    }

    /// Re-arm after every trigger.
    pub fn set_retriggerable(&mut self, axis: Axis, retriggerable: bool) -> CtrlResult<()> {
        self.bound_mut(axis)?.settings.retriggerable = retriggerable;
        Ok(())
    }

    /// Whether slave axes drop the descriptor delay.
    pub fn set_ignore_slave_delay(&mut self, axis: Axis, ignore: bool) -> CtrlResult<()> {
        self.bound_mut(axis)?.settings.ignore_slave_delay = ignore;
        Ok(())
    }

    /// Idle level written on the next configuration.
    pub fn set_idle_state(&mut self, axis: Axis, idle_state: IdleState) -> CtrlResult<()> {
        self.bound_mut(axis)?.settings.idle_state = idle_state;
        Ok(())
    }

    /// Set the duty cycle, a percentage in `(0, 100]`.
    pub fn set_duty_cycle(&mut self, axis: Axis, duty_cycle: f64) -> CtrlResult<()> {
        check_duty_cycle(duty_cycle)?;
        self.bound_mut(axis)?.settings.duty_cycle = duty_cycle;
        Ok(())
    }

    /// Delay added once, to the next configuration only.
    pub fn set_extra_initial_delay(&mut self, axis: Axis, delay: f64) -> CtrlResult<()> {
        self.bound_mut(axis)?.settings.extra_initial_delay = delay;
        Ok(())
    }

    /// Override the start trigger source; `None` restores the controller default.
    pub fn set_start_trigger_source(&mut self, axis: Axis, source: Option<String>) -> CtrlResult<()> {
        self.bound_mut(axis)?.settings.start_trigger_source = source;
        Ok(())
    }

    /// Override the start trigger type; `None` restores the controller default.
    pub fn set_start_trigger_type(&mut self, axis: Axis, trigger_type: Option<String>) -> CtrlResult<()> {
        self.bound_mut(axis)?.settings.start_trigger_type = trigger_type;
        Ok(())
    }

    /// Start trigger source in effect for `axis`.
    pub fn start_trigger_source(&self, axis: Axis) -> CtrlResult<&str> {
        let settings = &self.bound(axis)?.settings;
        Ok(settings
            .start_trigger_source
            .as_deref()
            .unwrap_or(&self.start_trigger_source))
    }

    /// Start trigger type in effect for `axis`.
    pub fn start_trigger_type(&self, axis: Axis) -> CtrlResult<&str> {
        let settings = &self.bound(axis)?.settings;
        Ok(settings
            .start_trigger_type
            .as_deref()
            .unwrap_or(&self.start_trigger_type))
    }

    // =========================================================================
    // Extra attributes by name
    // =========================================================================

    /// Read a settings value by its attribute name.
    pub fn get_extra_attribute(&self, axis: Axis, name: &str) -> CtrlResult<AttrValue> {
        debug!(axis, name, "get_extra_attribute");
        let settings = &self.bound(axis)?.settings;
        let value = match name.to_ascii_lowercase().as_str() {
            "slave" => AttrValue::Bool(settings.slave),
            "retriggerable" => AttrValue::Bool(settings.retriggerable),
            "extrainitialdelaytime" => AttrValue::Float(settings.extra_initial_delay),
            "idlestate" => AttrValue::Str(settings.idle_state.to_string()),
            "dutycycle" => AttrValue::Float(settings.duty_cycle),
            "starttriggersource" => AttrValue::Str(self.start_trigger_source(axis)?.to_string()),
            "starttriggertype" => AttrValue::Str(self.start_trigger_type(axis)?.to_string()),
            "ignoreslavedelay" => AttrValue::Bool(settings.ignore_slave_delay),
            other => return Err(unknown_attribute(other)),
        };
        Ok(value)
    }

    /// Write a settings value by its attribute name.
    pub fn set_extra_attribute(&mut self, axis: Axis, name: &str, value: AttrValue) -> CtrlResult<()> {
        debug!(axis, name, ?value, "set_extra_attribute");
        let name = name.to_ascii_lowercase();
        match name.as_str() {
            "slave" => self.set_slave(axis, expect_bool(&name, &value)?),
            "retriggerable" => self.set_retriggerable(axis, expect_bool(&name, &value)?),
            "ignoreslavedelay" => self.set_ignore_slave_delay(axis, expect_bool(&name, &value)?),
            "extrainitialdelaytime" => self.set_extra_initial_delay(axis, expect_f64(&name, &value)?),
            "dutycycle" => self.set_duty_cycle(axis, expect_f64(&name, &value)?),
            "idlestate" => {
                let idle_state = expect_str(&name, &value)?.parse()?;
                self.set_idle_state(axis, idle_state)
            }
            "starttriggersource" => {
                let source = expect_str(&name, &value)?.to_string();
                self.set_start_trigger_source(axis, Some(source))
            }
            "starttriggertype" => {
                let trigger_type = expect_str(&name, &value)?.to_string();
                self.set_start_trigger_type(axis, Some(trigger_type))
            }
            other => Err(unknown_attribute(other)),
        }
    }
}

fn unknown_attribute(name: &str) -> CtrlError {
    CtrlError::Configuration(format!("Unknown axis attribute {name:?}"))
}

fn type_error(name: &str, expected: &str, value: &AttrValue) -> CtrlError {
    CtrlError::Configuration(format!("{name} expects a {expected}, got {value:?}"))
}

fn expect_bool(name: &str, value: &AttrValue) -> CtrlResult<bool> {
    value.as_bool().ok_or_else(|| type_error(name, "boolean", value))
}

fn expect_f64(name: &str, value: &AttrValue) -> CtrlResult<f64> {
    value.as_f64().ok_or_else(|| type_error(name, "number", value))
}

fn expect_str<'a>(name: &str, value: &'a AttrValue) -> CtrlResult<&'a str> {
    value.as_str().ok_or_else(|| type_error(name, "string", value))
}
