//! Master ↔ outstation scenarios over an in-memory loopback connection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use vane_dnp3::app::{AppControl, Fragment, FunctionCode, Iin, Item, Range};
use vane_dnp3::association::{Association, LinkEvent};
use vane_dnp3::config::{PointConfig, RemoteConfig};
use vane_dnp3::endpoint::{loopback_pair, Connection};
use vane_dnp3::link::FrameCodec;
use vane_dnp3::master::Master;
use vane_dnp3::objects::PointType;
use vane_dnp3::outstation::{Outstation, OutstationHandle};
use vane_types::{DataType, PointId, PointValue, Stamp, Value};

const MASTER_ADDR: u16 = 1;
const OUTSTATION_ADDR: u16 = 1024;

fn analog_point() -> PointConfig {
    PointConfig::single(
        PointId::from(0xA1),
        PointType::AnalogInput,
        DataType::Float32,
        7,
    )
}

fn output_point() -> PointConfig {
    PointConfig::single(
        PointId::from(0xB2),
        PointType::AnalogOutput,
        DataType::Int16,
        3,
    )
}

fn ranged_point() -> PointConfig {
    PointConfig::range(
        PointId::from(0xC3),
        PointType::AnalogInput,
        DataType::Int32,
        4,
        7,
    )
}

fn config() -> RemoteConfig {
    RemoteConfig {
        reply_timeout: Duration::from_secs(2),
        ..RemoteConfig::default()
    }
}

fn start_pair(points: Vec<PointConfig>) -> (Master, OutstationHandle) {
    let (master_end, outstation_end) = loopback_pair();
    let (outstation, _updates) = Outstation::new(
        Box::new(outstation_end),
        OUTSTATION_ADDR,
        MASTER_ADDR,
        config(),
        points.clone(),
    );
    let handle = outstation.spawn().unwrap();
    let mut master = Master::new(Box::new(master_end), MASTER_ADDR, OUTSTATION_ADDR, config());
    for point in points {
        master.add_point(point);
    }
    (master, handle)
}

#[test]
fn read_analog_input() {
    let point = analog_point();
    let (mut master, handle) = start_pair(vec![point.clone()]);
    handle
        .shared()
        .set_value(point.point, Value::Double(1234.5));

    master.connect().unwrap();
    let value = master.read_point(&point).unwrap();
    assert_eq!(value.value(), &Value::Double(1234.5));
    assert_eq!(value.point(), point.point);

    handle.close();
}

#[test]
fn restart_indication_is_cleared_by_connect() {
    let point = analog_point();
    let (mut master, handle) = start_pair(vec![point.clone()]);
    assert!(handle.shared().iin().contains(Iin::DEVICE_RESTART));

    master.connect().unwrap();
    assert!(!handle.shared().iin().contains(Iin::DEVICE_RESTART));

    handle.close();
}

#[test]
fn direct_operate_publishes_update() {
    let point = output_point();
    let (mut master, handle) = start_pair(vec![point.clone()]);
    master.connect().unwrap();

    master.direct_operate(&point, &Value::Long(-100)).unwrap();
    let update = handle.next_update(Duration::from_secs(2)).unwrap();
    assert_eq!(update.point(), point.point);
    assert_eq!(update.value(), &Value::Long(-100));

    handle.close();
}

#[test]
fn ranged_read_returns_a_tuple() {
    let point = ranged_point();
    let (mut master, handle) = start_pair(vec![point.clone()]);
    handle.shared().set_value(
        point.point,
        Value::Tuple(vec![
            Value::Long(10),
            Value::Long(20),
            Value::Long(30),
            Value::Long(40),
        ]),
    );
    master.connect().unwrap();

    let value = master.read_point(&point).unwrap();
    assert_eq!(
        value.value(),
        &Value::Tuple(vec![
            Value::Long(10),
            Value::Long(20),
            Value::Long(30),
            Value::Long(40),
        ])
    );

    handle.close();
}

#[test]
fn batched_reads_answer_in_request_order() {
    let analog = analog_point();
    let ranged = ranged_point();
    let (mut master, handle) = start_pair(vec![analog.clone(), ranged.clone()]);
    handle.shared().set_value(analog.point, Value::Double(1.5));
    handle.shared().set_value(
        ranged.point,
        Value::Tuple(vec![
            Value::Long(1),
            Value::Long(2),
            Value::Long(3),
            Value::Long(4),
        ]),
    );
    master.connect().unwrap();

    for _ in 0..3 {
        master.request_point_value(&analog);
        master.request_point_value(&ranged);
        let values = master.commit_read_requests().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].point(), analog.point);
        assert_eq!(values[1].point(), ranged.point);
    }

    handle.close();
}

#[test]
fn need_time_is_served() {
    let point = analog_point();
    let (mut master, handle) = start_pair(vec![point.clone()]);
    handle.shared().set_value(point.point, Value::Double(0.0));
    master.connect().unwrap();

    handle.shared().raise_iin(Iin::NEED_TIME);
    master.read_point(&point).unwrap();
    assert!(!handle.shared().iin().contains(Iin::NEED_TIME));

    handle.close();
}

#[test]
fn unsolicited_values_reach_listeners() {
    let point = analog_point();
    // No connect() here: unsolicited reporting stays enabled.
    let (mut master, handle) = start_pair(vec![point.clone()]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    master.on_unsolicited(Box::new(move |value| {
        sink.lock().unwrap().push(value);
    }));

    handle.shared().queue_unsolicited(PointValue::new(
        point.point,
        Stamp::now(),
        None,
        Value::Double(99.5),
    ));

    // Pumping confirms the restart announcement first, then receives the
    // queued value.
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while std::time::Instant::now() < deadline {
        master.pump(Duration::from_millis(200)).unwrap();
        if !seen.lock().unwrap().is_empty() {
            break;
        }
    }
    let received = seen.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].value(), &Value::Double(99.5));
    assert_eq!(received[0].point(), point.point);

    handle.close();
}

#[test]
fn frames_for_other_stations_are_ignored() {
    let point = analog_point();
    let (mut raw, outstation_end) = loopback_pair();
    let (outstation, _updates) = Outstation::new(
        Box::new(outstation_end),
        OUTSTATION_ADDR,
        MASTER_ADDR,
        config(),
        vec![point.clone()],
    );
    let shared = outstation.shared();
    shared.set_value(point.point, Value::Double(7.5));
    let handle = outstation.spawn().unwrap();

    let mut association = Association::new(MASTER_ADDR, OUTSTATION_ADDR, true, 2048);
    let mut codec = FrameCodec::new();

    // A READ addressed to a different station draws no response.
    let misaddressed = Fragment::request(
        FunctionCode::Read,
        0,
        vec![Item::request(30, 0, Range::StartStop { start: 7, stop: 7 })],
    );
    let bytes = misaddressed.encode().unwrap();
    for mut frame in association.send_fragment(&bytes) {
        frame.destination = 0x1234;
        raw.send(&frame.encode()).unwrap();
    }

    // A correctly addressed READ is answered even afterwards.
    let request = Fragment::request(
        FunctionCode::Read,
        1,
        vec![Item::request(30, 0, Range::StartStop { start: 7, stop: 7 })],
    );
    let bytes = request.encode().unwrap();
    for frame in association.send_fragment(&bytes) {
        raw.send(&frame.encode()).unwrap();
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let mut answered = false;
    'outer: while std::time::Instant::now() < deadline {
        let Ok(Some(bytes)) = raw.recv(Duration::from_millis(100)) else {
            continue;
        };
        codec.push(&bytes);
        while let Ok(Some(frame)) = codec.next_frame() {
            if let LinkEvent::Segment(segment) = association.handle_link(&frame) {
                if let Ok(Some(fragment_bytes)) = association.receive_segment(&segment) {
                    let fragment = Fragment::decode(&fragment_bytes).unwrap();
                    match fragment.function {
                        FunctionCode::Response => {
                            assert_eq!(fragment.control.sequence, 1);
                            assert_eq!(fragment.items.len(), 1);
                            answered = true;
                            break 'outer;
                        }
                        FunctionCode::UnsolicitedResponse => {
                            // The restart announcement; confirm it.
                            let confirm = Fragment {
                                control: AppControl {
                                    fir: true,
                                    fin: true,
                                    con: false,
                                    uns: true,
                                    sequence: fragment.control.sequence,
                                },
                                function: FunctionCode::Confirm,
                                iin: None,
                                items: Vec::new(),
                            };
                            let bytes = confirm.encode().unwrap();
                            for frame in association.send_fragment(&bytes) {
                                raw.send(&frame.encode()).unwrap();
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
    assert!(answered, "correctly addressed read went unanswered");

    handle.close();
}

#[test]
fn solicited_responses_echo_their_sequence() {
    let point = analog_point();
    let (mut master, handle) = start_pair(vec![point.clone()]);
    handle.shared().set_value(point.point, Value::Double(3.25));
    master.connect().unwrap();

    // Repeated solicited transactions stay correlated.
    for _ in 0..20 {
        let value = master.read_point(&point).unwrap();
        assert_eq!(value.value(), &Value::Double(3.25));
    }

    handle.close();
}
