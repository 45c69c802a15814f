//! Integration tests for the counter/timer engine
//!
//! These tests drive the engine through the host framework's callback
//! sequence against mock channels and check the attribute writes and data
//! an orchestrator would observe.

use ni660x_ctrl::config::CounterTimerConfig;
use ni660x_ctrl::counter::variant::{CountEdges, PositionCapture, PulseWidth};
use ni660x_ctrl::counter::{AxisData, CounterTimerEngine};
use ni660x_ctrl::hardware::channel::{AttrValue, RawState};
use ni660x_ctrl::hardware::mock::{MockAttribute, MockChannel, MockConnector};
use ni660x_ctrl::sync::{AcqSynch, State};
use ni660x_ctrl::timing::HardwareConstants;
use ni660x_ctrl::CtrlError;

// =============================================================================
// Fixture
// =============================================================================

struct Rig {
    engine: CounterTimerEngine,
    timer: MockChannel,
    counters: Vec<MockChannel>,
}

fn rig_with(
    app_type: &str,
    counters: usize,
    variant: Box<dyn ni660x_ctrl::counter::variant::AcquisitionVariant>,
    extra: impl FnOnce(MockConnector) -> MockConnector,
) -> Rig {
    let timer = MockChannel::counter("Dev1", "ctr0", "COPulseChanTime");
    let mut connector = MockConnector::new().with_channel("ct/1", timer.clone());
    let mut channels = Vec::new();
    for i in 0..counters {
        let channel = MockChannel::counter("Dev1", &format!("ctr{}", i + 1), app_type);
        connector = connector.with_channel(&format!("ct/{}", i + 2), channel.clone());
        channels.push(channel);
    }
    let config = CounterTimerConfig {
        channel_dev_names: (1..=counters + 1)
            .map(|i| format!("ct/{i}"))
            .collect::<Vec<_>>()
            .join(","),
        ..CounterTimerConfig::default()
    };
    let mut engine = CounterTimerEngine::new(
        &config,
        HardwareConstants::default(),
        variant,
        Box::new(extra(connector)),
    );
    for axis in 1..=counters + 1 {
        engine.add_axis(axis).unwrap();
    }
    Rig {
        engine,
        timer,
        counters: channels,
    }
}

fn count_edges_rig(counters: usize) -> Rig {
    rig_with("CICountEdgesChan", counters, Box::new(CountEdges::new()), |c| c)
}

fn set_clock_source(rig: &mut Rig, source: &str) {
    for axis in 2..=rig.counters.len() + 1 {
        rig.engine
            .set_extra_attribute(axis, "sampleClockSource", source.into())
            .unwrap();
    }
}

/// Load, prepare and start every axis.
fn arm(rig: &mut Rig, synch: AcqSynch, integration_time: f64, repetitions: usize) {
    rig.engine.set_synchronization(synch);
    rig.engine.load(1, integration_time, repetitions, 0.0).unwrap();
    assert!(rig.engine.prepare_all().unwrap());
    for axis in 1..=rig.counters.len() + 1 {
        assert!(rig.engine.prepare_axis(axis, integration_time).unwrap());
    }
    rig.engine.start_all().unwrap();
    for axis in (1..=rig.counters.len() + 1).rev() {
        rig.engine.start_axis(axis, integration_time).unwrap();
    }
}

// =============================================================================
// Axis binding
// =============================================================================

#[test]
fn test_wrong_application_type_is_rejected() {
    let timer = MockChannel::counter("Dev1", "ctr0", "COPulseChanTime");
    let wrong = MockChannel::counter("Dev1", "ctr1", "CIPulseWidthChan");
    let good = MockChannel::counter("Dev1", "ctr2", "CICountEdgesChan");
    let connector = MockConnector::new()
        .with_channel("ct/1", timer)
        .with_channel("ct/2", wrong)
        .with_channel("ct/3", good);
    let config = CounterTimerConfig {
        channel_dev_names: "ct/1,ct/2,ct/3".to_string(),
        ..CounterTimerConfig::default()
    };
    let mut engine = CounterTimerEngine::from_config(
        &config,
        HardwareConstants::default(),
        Box::new(connector),
    );

    engine.add_axis(1).unwrap();
    let err = engine.add_axis(2).unwrap_err();
    assert!(err.is_configuration());
    engine.add_axis(3).unwrap();
    assert_eq!(engine.axes().collect::<Vec<_>>(), vec![1, 3]);
    assert!(matches!(engine.query_state(2), Err(CtrlError::UnknownAxis(2))));
}

#[test]
fn test_unreachable_channel() {
    let config = CounterTimerConfig {
        channel_dev_names: "ct/1".to_string(),
        ..CounterTimerConfig::default()
    };
    let mut engine = CounterTimerEngine::from_config(
        &config,
        HardwareConstants::default(),
        Box::new(MockConnector::new()),
    );
    assert!(matches!(
        engine.add_axis(1),
        Err(CtrlError::DeviceUnreachable(_))
    ));
    assert!(engine.add_axis(2).unwrap_err().is_configuration());
}

#[test]
fn test_empty_name_slot_keeps_axis_mapping() {
    let third = MockChannel::counter("Dev1", "ctr3", "CICountEdgesChan");
    let connector = MockConnector::new()
        .with_channel("ct/1", MockChannel::counter("Dev1", "ctr0", "COPulseChanTime"))
        .with_channel("ct/3", third);
    let config = CounterTimerConfig {
        channel_dev_names: "ct/1,,ct/3".to_string(),
        ..CounterTimerConfig::default()
    };
    let mut engine = CounterTimerEngine::from_config(
        &config,
        HardwareConstants::default(),
        Box::new(connector),
    );

    engine.add_axis(1).unwrap();
    assert!(engine.add_axis(2).unwrap_err().is_configuration());
    engine.add_axis(3).unwrap();
    assert_eq!(engine.axes().collect::<Vec<_>>(), vec![1, 3]);
}

// =============================================================================
// Load
// =============================================================================

#[test]
fn test_software_timer_load_programs_pulse() {
    let mut rig = count_edges_rig(1);
    rig.engine.set_synchronization(AcqSynch::SoftwareTrigger);
    rig.timer.set_state(RawState::On);
    rig.engine.load(1, 0.5, 1, 1e-3).unwrap();

    assert_eq!(rig.timer.stop_count(), 1);
    assert_eq!(rig.timer.last_write("SampleTimingType"), Some("Implicit".into()));
    assert_eq!(rig.timer.last_write("SampPerChan"), Some(AttrValue::Int(1)));
    assert_eq!(rig.timer.last_write("HighTime"), Some(AttrValue::Float(0.5)));
    assert_eq!(rig.timer.last_write("LowTime"), Some(AttrValue::Float(25e-7)));
}

#[test]
fn test_integration_time_bounds() {
    let mut rig = count_edges_rig(1);
    rig.engine.set_synchronization(AcqSynch::SoftwareTrigger);

    rig.engine.load(1, 53.687091187, 1, 0.0).unwrap();
    let err = rig.engine.load(1, 53.687091188, 1, 0.0).unwrap_err();
    assert!(err.is_configuration());
    assert!(rig.engine.load(1, 2.0 * 25e-7, 1, 0.0).is_ok());
    assert!(rig.engine.load(1, 1e-7, 1, 0.0).unwrap_err().is_configuration());
    // Rejected before any hardware write.
    assert_eq!(rig.timer.writes_to("HighTime").len(), 2);
}

#[test]
fn test_counter_load_requires_hardware_synchronization() {
    let mut rig = count_edges_rig(1);
    rig.engine.set_synchronization(AcqSynch::SoftwareTrigger);
    assert!(matches!(
        rig.engine.load(2, 0.1, 1, 0.0),
        Err(CtrlError::InvalidOperation(_))
    ));
    rig.engine.set_synchronization(AcqSynch::HardwareGate);
    assert!(rig.engine.load(2, 0.1, 4, 0.0).is_ok());
    assert_eq!(rig.engine.session().repetitions, 4);
}

// =============================================================================
// Prepare
// =============================================================================

#[test]
fn test_single_repetition_edge_count_uses_two_samples() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/PFI39");
    arm(&mut rig, AcqSynch::HardwareTrigger, 0.1, 1);

    let counter = &rig.counters[0];
    assert_eq!(counter.last_write("SampPerChan"), Some(AttrValue::Int(2)));
    assert_eq!(counter.last_write("sampleclocksource"), Some("/Dev1/PFI39".into()));
    assert_eq!(counter.last_write("SampleTimingType"), Some("SampClk".into()));
    assert_eq!(counter.last_write("DataTransferMechanism"), Some("Interrupts".into()));
}

#[test]
fn test_missing_clock_source() {
    let mut rig = count_edges_rig(1);
    rig.engine.set_synchronization(AcqSynch::HardwareTrigger);
    rig.engine.load(1, 0.1, 3, 0.0).unwrap();
    rig.engine.prepare_all().unwrap();
    let err = rig.engine.prepare_axis(2, 0.1).unwrap_err();
    assert!(err.to_string().contains("sampleclocksource"));
}

#[test]
fn test_prepare_stops_busy_counter() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/PFI39");
    rig.counters[0].set_state(RawState::On);
    arm(&mut rig, AcqSynch::HardwareTrigger, 0.1, 3);
    assert_eq!(rig.counters[0].stop_count(), 1);
    assert_eq!(rig.counters[0].last_write("SampPerChan"), Some(AttrValue::Int(3)));
}

// =============================================================================
// Start / Abort
// =============================================================================

#[test]
fn test_hardware_timer_is_never_started() {
    let mut rig = count_edges_rig(2);
    set_clock_source(&mut rig, "/Dev1/PFI39");
    arm(&mut rig, AcqSynch::HardwareTrigger, 0.1, 3);
    assert_eq!(rig.timer.start_count(), 0);
    assert!(rig.counters.iter().all(|c| c.start_count() == 1));

    rig.engine.abort(1).unwrap();
    assert_eq!(rig.timer.stop_count(), 0);
    assert_eq!(rig.engine.query_state(1).unwrap().0, State::On);
}

#[test]
fn test_software_abort_stops_timer() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/Ctr0InternalOutput");
    arm(&mut rig, AcqSynch::SoftwareTrigger, 0.1, 1);
    assert_eq!(rig.timer.start_count(), 1);
    rig.engine.abort(1).unwrap();
    rig.engine.abort(2).unwrap();
    assert_eq!(rig.timer.stop_count(), 1);
    assert_eq!(rig.counters[0].stop_count(), 1);
    // Already in standby: no second stop.
    rig.engine.abort(2).unwrap();
    assert_eq!(rig.counters[0].stop_count(), 1);
}

#[test]
fn test_abort_flags_axis_even_when_stop_fails() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/Ctr0InternalOutput");
    arm(&mut rig, AcqSynch::SoftwareTrigger, 0.1, 1);
    assert_eq!(rig.engine.is_aborted(2), Some(false));

    rig.counters[0].fail_next_commands(1);
    assert!(matches!(
        rig.engine.abort(2),
        Err(CtrlError::DeviceUnreachable(_))
    ));
    assert_eq!(rig.engine.is_aborted(2), Some(true));
    assert_eq!(rig.counters[0].stop_count(), 0);
}

// =============================================================================
// Software-triggered reads
// =============================================================================

#[test]
fn test_single_shot_discards_duplicate_sample() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/Ctr0InternalOutput");
    arm(&mut rig, AcqSynch::SoftwareTrigger, 0.2, 1);

    rig.counters[0].set_buffer("CountBuffer", vec![7.0, 42.0]);
    rig.counters[0].finish();
    assert_eq!(
        rig.engine.query_state(2).unwrap(),
        (State::On, "Device finished counting".to_string())
    );
    assert_eq!(rig.engine.query_state(1).unwrap().0, State::On);
    assert_eq!(rig.engine.read_axis(2).unwrap(), AxisData::Scalar(42.0));
    assert_eq!(rig.engine.read_axis(1).unwrap(), AxisData::Scalar(0.2));
}

#[test]
fn test_single_shot_read_failure_degrades_to_zero() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/Ctr0InternalOutput");
    arm(&mut rig, AcqSynch::SoftwareTrigger, 0.2, 1);
    rig.counters[0].set_buffer("CountBuffer", vec![1.0]);
    rig.counters[0].fail_next_reads(1);
    assert_eq!(rig.engine.read_axis(2).unwrap(), AxisData::Scalar(0.0));
    assert_eq!(rig.engine.read_axis(2).unwrap(), AxisData::Scalar(1.0));
}

#[test]
fn test_software_counter_state_follows_device() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/Ctr0InternalOutput");
    arm(&mut rig, AcqSynch::SoftwareTrigger, 0.2, 1);
    assert_eq!(
        rig.engine.query_state(2).unwrap(),
        (State::Moving, "Device is counting".to_string())
    );
    rig.counters[0].set_state(RawState::Fault);
    let (state, status) = rig.engine.query_state(2).unwrap();
    assert_eq!(state, State::Fault);
    assert_eq!(status, "Device is in Fault state");
}

// =============================================================================
// Hardware-triggered reads
// =============================================================================

#[test]
fn test_end_to_end_hardware_trigger() {
    let mut rig = count_edges_rig(2);
    set_clock_source(&mut rig, "/Dev1/PFI39");
    arm(&mut rig, AcqSynch::HardwareTrigger, 0.1, 4);

    let mut collected: Vec<Vec<f64>> = vec![Vec::new(); 3];
    let mut last_cursor = [0usize; 3];

    for point in 0..4 {
        for (i, counter) in rig.counters.iter().enumerate() {
            counter.push_samples("CountBuffer", &[(10 * (i + 2) + point) as f64]);
        }
        if point == 3 {
            for counter in &rig.counters {
                counter.finish();
            }
        }
        // Counters first so the timer sees the newest cursor.
        for axis in [2, 3, 1] {
            let data = rig.engine.read_axis(axis).unwrap();
            collected[axis - 1].extend_from_slice(data.points());
            let cursor = rig.engine.cursor(axis).unwrap();
            assert!(cursor >= last_cursor[axis - 1]);
            last_cursor[axis - 1] = cursor;
        }
    }

    assert_eq!(collected[1], vec![20.0, 21.0, 22.0, 23.0]);
    assert_eq!(collected[2], vec![30.0, 31.0, 32.0, 33.0]);
    assert_eq!(collected[0], vec![0.1; 4]);
    for axis in 1..=3 {
        assert_eq!(rig.engine.read_axis(axis).unwrap(), AxisData::Points(Vec::new()));
        assert_eq!(rig.engine.query_state(axis).unwrap().0, State::On);
    }
}

#[test]
fn test_hardware_counter_moving_until_drained() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/PFI39");
    arm(&mut rig, AcqSynch::HardwareTrigger, 0.1, 3);

    rig.counters[0].push_samples("CountBuffer", &[1.0, 2.0, 3.0]);
    rig.counters[0].finish();
    assert_eq!(rig.engine.query_state(2).unwrap().0, State::Moving);
    assert_eq!(rig.engine.query_state(1).unwrap().0, State::Moving);

    assert_eq!(rig.engine.read_axis(2).unwrap().points(), &[1.0, 2.0, 3.0]);
    assert_eq!(rig.engine.query_state(2).unwrap().0, State::On);
    assert_eq!(rig.engine.read_axis(1).unwrap().points(), &[0.1, 0.1, 0.1]);
    assert_eq!(rig.engine.query_state(1).unwrap().0, State::On);
}

#[test]
fn test_single_repeat_hardware_trigger_returns_one_point() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/PFI39");
    arm(&mut rig, AcqSynch::HardwareTrigger, 0.1, 1);
    assert_eq!(rig.counters[0].last_write("SampPerChan"), Some(AttrValue::Int(2)));

    rig.counters[0].set_buffer("CountBuffer", vec![7.0, 9.0]);
    rig.counters[0].finish();
    assert_eq!(rig.engine.read_axis(2).unwrap().points(), &[9.0]);
    assert_eq!(rig.engine.cursor(2), Some(1));
    assert_eq!(rig.engine.query_state(2).unwrap().0, State::On);
    assert_eq!(rig.engine.read_axis(1).unwrap().points(), &[0.1]);
    assert_eq!(rig.engine.cursor(1), Some(1));

    for axis in 1..=2 {
        assert!(rig.engine.read_axis(axis).unwrap().points().is_empty());
        assert_eq!(rig.engine.cursor(axis), Some(1));
    }
}

#[test]
fn test_multi_point_read_stops_at_repetitions() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/PFI39");
    arm(&mut rig, AcqSynch::HardwareGate, 0.1, 2);

    rig.counters[0].set_buffer("CountBuffer", vec![1.0, 2.0, 3.0]);
    assert_eq!(rig.engine.read_axis(2).unwrap().points(), &[1.0, 2.0]);
    assert_eq!(rig.engine.cursor(2), Some(2));
    assert_eq!(rig.engine.read_axis(1).unwrap().points(), &[0.1, 0.1]);
    assert!(rig.engine.read_axis(2).unwrap().points().is_empty());
    assert_eq!(rig.engine.cursor(2), Some(2));
}

#[test]
fn test_multi_point_read_failure_keeps_cursor() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/PFI39");
    arm(&mut rig, AcqSynch::HardwareGate, 0.1, 2);

    rig.counters[0].push_samples("CountBuffer", &[5.0]);
    rig.counters[0].fail_next_reads(1);
    assert!(rig.engine.read_axis(2).unwrap().points().is_empty());
    assert_eq!(rig.engine.cursor(2), Some(0));
    assert_eq!(rig.engine.read_axis(2).unwrap().points(), &[5.0]);
    assert_eq!(rig.engine.cursor(2), Some(1));
}

#[test]
fn test_query_filter_decimates_reads() {
    let mut rig = rig_with(
        "CICountEdgesChan",
        1,
        Box::new(CountEdges::with_query_filter(3)),
        |c| c,
    );
    set_clock_source(&mut rig, "/Dev1/PFI39");
    arm(&mut rig, AcqSynch::HardwareTrigger, 0.1, 2);
    rig.counters[0].push_samples("CountBuffer", &[1.0, 2.0]);

    assert!(rig.engine.read_axis(2).unwrap().points().is_empty());
    assert!(rig.engine.read_axis(2).unwrap().points().is_empty());
    assert_eq!(rig.engine.read_axis(2).unwrap().points(), &[1.0, 2.0]);
}

#[test]
fn test_aborted_hardware_timer_reports_on() {
    let mut rig = count_edges_rig(1);
    set_clock_source(&mut rig, "/Dev1/PFI39");
    arm(&mut rig, AcqSynch::HardwareTrigger, 0.1, 5);
    assert_eq!(rig.engine.query_state(1).unwrap().0, State::Moving);
    rig.engine.abort(1).unwrap();
    assert_eq!(rig.engine.query_state(1).unwrap().0, State::On);
    rig.engine.prepare_axis(1, 0.1).unwrap();
    assert_eq!(rig.engine.query_state(1).unwrap().0, State::Moving);
}

// =============================================================================
// Variants
// =============================================================================

#[test]
fn test_position_capture_applies_sign_and_reference_offset() {
    let reference = MockAttribute::new(AttrValue::Float(100.0));
    let handle = reference.clone();
    let mut rig = rig_with(
        "CIAngEncoderChan",
        1,
        Box::new(PositionCapture::new()),
        move |c| c.with_attribute("motor/m1/position", handle),
    );
    assert_eq!(
        rig.counters[0].timeout(),
        Some(std::time::Duration::from_secs(120))
    );
    set_clock_source(&mut rig, "/Dev1/PFI39");
    rig.engine.set_extra_attribute(2, "sign", AttrValue::Int(-1)).unwrap();
    rig.engine
        .set_extra_attribute(2, "initialPosAttr", "motor/m1/position".into())
        .unwrap();
    arm(&mut rig, AcqSynch::HardwareTrigger, 0.1, 2);

    assert_eq!(
        rig.engine.get_extra_attribute(2, "initialposvalue").unwrap(),
        AttrValue::Float(100.0)
    );
    rig.counters[0].push_samples("PositionBuffer", &[1.0, 2.5]);
    assert_eq!(rig.engine.read_axis(2).unwrap().points(), &[99.0, 97.5]);
    assert_eq!(reference.read_count(), 1);
}

#[test]
fn test_position_direct_attributes_go_to_device() {
    let mut rig = rig_with("CIAngEncoderChan", 1, Box::new(PositionCapture::new()), |c| c);
    rig.counters[0].set_state(RawState::On);
    rig.engine
        .set_extra_attribute(2, "PulsesPerRevolution", AttrValue::Int(2048))
        .unwrap();
    assert_eq!(rig.counters[0].stop_count(), 1);
    assert_eq!(
        rig.counters[0].last_write("pulsesperrevolution"),
        Some(AttrValue::Int(2048))
    );
    assert_eq!(
        rig.engine.get_extra_attribute(2, "pulsesPerRevolution").unwrap(),
        AttrValue::Int(2048)
    );
}

#[test]
fn test_pulse_width_routes_source_terminal() {
    let mut rig = rig_with("CIPulseWidthChan", 1, Box::new(PulseWidth), |c| c);
    rig.engine
        .set_extra_attribute(2, "inputTerminal", "/Dev1/PFI38".into())
        .unwrap();
    arm(&mut rig, AcqSynch::HardwareTrigger, 0.1, 3);
    let counter = &rig.counters[0];
    assert_eq!(counter.last_write("SourceTerminal"), Some("/Dev1/PFI35".into()));
    assert_eq!(counter.last_write("SampleTimingType"), Some("Implicit".into()));
    assert_eq!(counter.last_write("SampPerChan"), Some(AttrValue::Int(3)));
}

// =============================================================================
// Extra attributes
// =============================================================================

#[test]
fn test_channel_dev_name_is_read_only() {
    let mut rig = count_edges_rig(1);
    assert_eq!(
        rig.engine.get_extra_attribute(2, "channelDevName").unwrap(),
        AttrValue::Str("ct/2".into())
    );
    assert!(matches!(
        rig.engine.set_extra_attribute(2, "channelDevName", "ct/9".into()),
        Err(CtrlError::InvalidOperation(_))
    ));
}

#[test]
fn test_unset_clock_source_reads_from_device() {
    let rig = count_edges_rig(1);
    rig.counters[0].set_attribute("sampleclocksource", "/Dev1/PFI10".into());
    assert_eq!(
        rig.engine.get_extra_attribute(2, "sampleClockSource").unwrap(),
        AttrValue::Str("/Dev1/PFI10".into())
    );
}

#[test]
fn test_unknown_attribute() {
    let rig = count_edges_rig(1);
    assert!(rig.engine.get_extra_attribute(2, "frequency").unwrap_err().is_configuration());
}
