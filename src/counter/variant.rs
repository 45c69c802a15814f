//! Acquisition variants of the counter/timer engine.
//!
//! The engine state machine is shared; what differs between counting edges,
//! capturing encoder positions and measuring pulse widths is the buffer to
//! read, the expected application type, a few extra attributes and two hooks:
//! a pre-start side effect and the post-processing of freshly read samples.
//!
//! | Variant | Buffer | Application type | Timing | Clock source attribute |
//! |---------|--------|------------------|--------|------------------------|
//! | [`CountEdges`] | `CountBuffer` | `CICountEdgesChan` | `SampClk` | `sampleclocksource` |
//! | [`PositionCapture`] | `PositionBuffer` | `CIAngEncoderChan` | `SampClk` | `sampleclocksource` |
//! | [`PulseWidth`] | `PulseWidthBuffer` | `CIPulseWidthChan` | `Implicit` | `inputterminal` |

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::counter::axis::AxisAttributes;
use crate::error::{CtrlError, CtrlResult};
use crate::hardware::channel::{AttrValue, AttributeSource, Channel, DeviceConnector};
use crate::hardware::terminals::{pfi_name, CounterSignal};
use crate::sync::Axis;

/// Application type of edge-counting channels.
pub const COUNT_EDGES_APP_TYPE: &str = "CICountEdgesChan";

/// Static description of the channels a variant drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelProfile {
    /// Buffer attribute drained by `read_axis`.
    pub buffer_attr: &'static str,
    /// Application type every counter channel must declare.
    pub application_type: &'static str,
    /// Value written to `SampleTimingType`.
    pub sample_timing_type: &'static str,
    /// Lowercase name of the cached clock-source attribute.
    pub clock_source_attr: &'static str,
    /// Read the buffer only every N calls.
    pub query_filter: u32,
}

/// What a hook may touch while an axis is being prepared.
pub struct AxisContext<'a> {
    /// Axis being prepared.
    pub axis: Axis,
    /// Channel bound to the axis.
    pub channel: &'a dyn Channel,
    /// Fully qualified counter, e.g. `/Dev1/ctr2`.
    pub counter_name: &'a str,
    /// Cached attributes of the axis, writable by the hook.
    pub attributes: &'a mut AxisAttributes,
    /// Connector for binding reference attributes.
    pub connector: &'a dyn DeviceConnector,
}

/// Strategy injected into the counter/timer engine.
pub trait AcquisitionVariant: Send {
    /// Buffers, application type and timing used by this variant.
    fn profile(&self) -> ChannelProfile;

    /// Extra per-axis attributes and their initial values.
    fn axis_defaults(&self) -> Vec<(&'static str, AttrValue)> {
        Vec::new()
    }

    /// Attributes written straight to the device instead of the cache.
    fn direct_attributes(&self) -> &'static [&'static str] {
        &[]
    }

    /// I/O timeout to apply to counter channels when they are bound.
    fn channel_timeout(&self) -> Option<Duration> {
        None
    }

    /// Side effect run after the base preparation of a counter axis.
    fn on_prepare_axis(&mut self, _ctx: AxisContext<'_>) -> CtrlResult<()> {
        Ok(())
    }

    /// Notification that a cached attribute of `axis` changed.
    fn on_attribute_set(&mut self, _axis: Axis, _name: &str, _attributes: &mut AxisAttributes) {}

    /// Notification that `axis` was removed.
    fn on_remove_axis(&mut self, _axis: Axis) {}

    /// Transform the unread part of `buffer` starting at `cursor`.
    fn post_process(
        &self,
        _axis: Axis,
        _attributes: &AxisAttributes,
        buffer: &[f64],
        cursor: usize,
    ) -> Vec<f64> {
        unread(buffer, cursor).to_vec()
    }
}

/// Samples at and after `cursor`; empty when the cursor is past the end.
pub fn unread(buffer: &[f64], cursor: usize) -> &[f64] {
    buffer.get(cursor..).unwrap_or(&[])
}

/// Variant selector used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    /// Plain edge counting.
    #[default]
    CountEdges,
    /// Encoder position capture.
    Position,
    /// Pulse width measurement.
    PulseWidth,
}

impl VariantKind {
    /// Instantiate the selected variant.
    pub fn build(self) -> Box<dyn AcquisitionVariant> {
        match self {
            VariantKind::CountEdges => Box::new(CountEdges::new()),
            VariantKind::Position => Box::new(PositionCapture::new()),
            VariantKind::PulseWidth => Box::new(PulseWidth),
        }
    }
}

// =============================================================================
// CountEdges
// =============================================================================

/// Edge counting; samples pass through unchanged.
#[derive(Debug, Clone)]
pub struct CountEdges {
    query_filter: u32,
}

impl CountEdges {
    /// Edge counting that reads the buffer on every call.
    pub fn new() -> Self {
        Self { query_filter: 1 }
    }

    /// Read the buffer only every `n` calls.
    pub fn with_query_filter(n: u32) -> Self {
        Self {
            query_filter: n.max(1),
        }
    }
}

impl Default for CountEdges {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionVariant for CountEdges {
    fn profile(&self) -> ChannelProfile {
        ChannelProfile {
            buffer_attr: "CountBuffer",
            application_type: COUNT_EDGES_APP_TYPE,
            sample_timing_type: "SampClk",
            clock_source_attr: "sampleclocksource",
            query_filter: self.query_filter,
        }
    }
}

// =============================================================================
// PositionCapture
// =============================================================================

const SIGN: &str = "sign";
const INITIAL_POS: &str = "initialpos";
const INITIAL_POS_ATTR: &str = "initialposattr";
const INITIAL_POS_VALUE: &str = "initialposvalue";

/// Encoder position capture.
///
/// Positions are negated when `sign` is -1 and shifted by an initial offset,
/// taken from `initialpos` when set, otherwise read from the external
/// attribute named by `initialposattr`, otherwise zero.
#[derive(Default)]
pub struct PositionCapture {
    reference: HashMap<Axis, Box<dyn AttributeSource>>,
}

impl PositionCapture {
    /// Position capture with sign `1` and no reference offset.
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve_initial_pos(&mut self, ctx: &AxisContext<'_>) -> CtrlResult<f64> {
        if let Some(value) = ctx.attributes.get(INITIAL_POS).filter(|v| !v.is_empty()) {
            return value.as_f64().ok_or_else(|| {
                CtrlError::Configuration(format!("initialPos ({value:?}) is not float"))
            });
        }
        let Some(attr_name) = ctx.attributes.text(INITIAL_POS_ATTR) else {
            return Ok(0.0);
        };
        let source = match self.reference.entry(ctx.axis) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(ctx.connector.attribute(attr_name)?)
            }
        };
        source.read()?.as_f64().ok_or_else(|| {
            CtrlError::Configuration(format!("initialPosAttr ({attr_name}) is not float"))
        })
    }
}

impl AcquisitionVariant for PositionCapture {
    fn profile(&self) -> ChannelProfile {
        ChannelProfile {
            buffer_attr: "PositionBuffer",
            application_type: "CIAngEncoderChan",
            sample_timing_type: "SampClk",
            clock_source_attr: "sampleclocksource",
            query_filter: 1,
        }
    }

    fn axis_defaults(&self) -> Vec<(&'static str, AttrValue)> {
        vec![
            (SIGN, AttrValue::Int(1)),
            (INITIAL_POS, AttrValue::Empty),
            (INITIAL_POS_ATTR, AttrValue::Str(String::new())),
            (INITIAL_POS_VALUE, AttrValue::Float(0.0)),
        ]
    }

    fn direct_attributes(&self) -> &'static [&'static str] {
        &["units", "pulsesperrevolution", "zindexenabled"]
    }

    fn channel_timeout(&self) -> Option<Duration> {
        // Reading out 60000 positions takes about 10 s.
        Some(Duration::from_secs(120))
    }

    fn on_prepare_axis(&mut self, ctx: AxisContext<'_>) -> CtrlResult<()> {
        let offset = self.resolve_initial_pos(&ctx)?;
        debug!(axis = ctx.axis, offset, "resolved initial position");
        ctx.attributes.set(INITIAL_POS_VALUE, AttrValue::Float(offset));
        Ok(())
    }

    fn on_attribute_set(&mut self, axis: Axis, name: &str, _attributes: &mut AxisAttributes) {
        if name.eq_ignore_ascii_case(INITIAL_POS_ATTR) {
            self.reference.remove(&axis);
        }
    }

    fn on_remove_axis(&mut self, axis: Axis) {
        self.reference.remove(&axis);
    }

    fn post_process(
        &self,
        _axis: Axis,
        attributes: &AxisAttributes,
        buffer: &[f64],
        cursor: usize,
    ) -> Vec<f64> {
        let sign = if attributes.number(SIGN) == Some(-1.0) {
            -1.0
        } else {
            1.0
        };
        let offset = attributes.number(INITIAL_POS_VALUE).unwrap_or(0.0);
        unread(buffer, cursor)
            .iter()
            .map(|v| v * sign + offset)
            .collect()
    }
}

// =============================================================================
// PulseWidth
// =============================================================================

/// Pulse width measurement. The counter's own source connector is routed
/// to `SourceTerminal` before every acquisition.
#[derive(Debug, Clone, Copy, Default)]
pub struct PulseWidth;

impl AcquisitionVariant for PulseWidth {
    fn profile(&self) -> ChannelProfile {
        ChannelProfile {
            buffer_attr: "PulseWidthBuffer",
            application_type: "CIPulseWidthChan",
            sample_timing_type: "Implicit",
            clock_source_attr: "inputterminal",
            query_filter: 1,
        }
    }

    fn on_prepare_axis(&mut self, ctx: AxisContext<'_>) -> CtrlResult<()> {
        let source = pfi_name(ctx.counter_name, CounterSignal::Source)?;
        debug!(axis = ctx.axis, %source, "routing source terminal");
        ctx.channel
            .write_attribute("SourceTerminal", AttrValue::Str(source))?;
        Ok(())
    }
}
