use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use super::{Node, State};
use crate::memory;
use crate::pool::Pool;
use crate::sample::{Sample, SampleFlags};
use crate::signal::SignalType;
use crate::timing::Timespec;

fn make_node(config: serde_json::Value) -> Node {
    crate::registry::init();
    Node::from_config("testnode", &config, &Uuid::new_v4()).unwrap()
}

fn started_loopback() -> Arc<Node> {
    let node = make_node(json!({
        "type": "loopback",
        "in": { "signals": { "count": 2, "type": "float" }, "vectorize": 4 },
    }));
    node.check().unwrap();
    node.prepare().unwrap();
    node.start().unwrap();
    Arc::new(node)
}

#[test]
fn test_lifecycle_states() {
    let node = make_node(json!({ "type": "loopback" }));
    assert_eq!(node.state(), State::Parsed);

    node.check().unwrap();
    assert_eq!(node.state(), State::Checked);

    node.prepare().unwrap();
    assert_eq!(node.state(), State::Prepared);

    node.start().unwrap();
    assert_eq!(node.state(), State::Started);

    node.pause().unwrap();
    assert_eq!(node.state(), State::Paused);
    node.resume().unwrap();
    assert_eq!(node.state(), State::Started);

    node.stop().unwrap();
    assert_eq!(node.state(), State::Stopped);
}

#[test]
fn test_unknown_type_rejected() {
    crate::registry::init();
    let err = Node::from_config(
        "bad",
        &json!({ "type": "warp-drive" }),
        &Uuid::new_v4(),
    );
    assert!(err.is_err());
}

#[test]
fn test_internal_type_not_user_instantiable() {
    crate::registry::init();
    let err = Node::from_config(
        "bad",
        &json!({ "type": "loopback.internal" }),
        &Uuid::new_v4(),
    );
    assert!(err.is_err());
}

#[test]
fn test_prepare_before_check_fails() {
    let node = make_node(json!({ "type": "loopback" }));
    assert!(node.prepare().is_err());
}

#[test]
fn test_loopback_write_read_round_trip() {
    let node = started_loopback();
    let pool = Pool::for_samples(8, 4, &memory::default_type()).unwrap();

    let mut smp = pool.get().unwrap();
    smp.sequence = 5;
    smp.length = 2;
    smp.flags = SampleFlags::HAS_SEQUENCE | SampleFlags::HAS_DATA;
    smp.ts.origin = Timespec::new(50, 0);
    smp.flags |= SampleFlags::HAS_TS_ORIGIN;
    smp.data_mut()[0].set(SignalType::Float, 1.0);
    smp.data_mut()[1].set(SignalType::Float, 2.0);

    assert_eq!(node.kind().write(&[smp]).unwrap(), 1);
    Sample::decref(smp);

    let mut out = vec![];
    assert_eq!(node.read(&mut out).unwrap(), 1);

    let got = out[0];
    assert_eq!(got.sequence, 5);
    assert_eq!(got.length, 2);
    assert_eq!(got.data()[0].as_f64(SignalType::Float), 1.0);
    // The read side always stamps the arrival time.
    assert!(got.has(SampleFlags::HAS_TS_RECEIVED));
    // Untyped on the wire, typed by the node's signal description.
    assert!(got.has(SampleFlags::HAS_SIGNALS));
    assert_eq!(got.signals().unwrap().len(), 2);

    Sample::decref_many(&out);
    node.stop().unwrap();
}

#[test]
fn test_read_vectorizes_available_samples() {
    let node = started_loopback();
    let pool = Pool::for_samples(8, 4, &memory::default_type()).unwrap();

    for seq in 0..3u64 {
        let mut smp = pool.get().unwrap();
        smp.sequence = seq;
        smp.length = 1;
        smp.flags = SampleFlags::HAS_SEQUENCE | SampleFlags::HAS_DATA;
        node.kind().write(&[smp]).unwrap();
        Sample::decref(smp);
    }

    // vectorize = 4: one read drains all three queued samples.
    let mut out = vec![];
    assert_eq!(node.read(&mut out).unwrap(), 3);

    Sample::decref_many(&out);
    node.stop().unwrap();
}

#[test]
fn test_poll_fd_signals_readiness() {
    let node = started_loopback();
    let fds = node.poll_fds();
    assert_eq!(fds.len(), 1);

    let mut pollfd = libc::pollfd {
        fd: fds[0],
        events: libc::POLLIN,
        revents: 0,
    };

    // Idle queue: not readable.
    let n = unsafe { libc::poll(&mut pollfd, 1, 0) };
    assert_eq!(n, 0);

    let pool = Pool::for_samples(4, 4, &memory::default_type()).unwrap();
    let smp = pool.get().unwrap();
    node.kind().write(&[smp]).unwrap();
    Sample::decref(smp);

    let n = unsafe { libc::poll(&mut pollfd, 1, 100) };
    assert_eq!(n, 1);

    node.stop().unwrap();
}

#[test]
fn test_stopped_node_read_returns_zero() {
    let node = started_loopback();
    node.stop().unwrap();

    let mut out = vec![];
    assert_eq!(node.read(&mut out).unwrap(), 0);
}

#[test]
fn test_owd_tracked_from_timestamps() {
    let node = started_loopback();
    let pool = Pool::for_samples(8, 4, &memory::default_type()).unwrap();

    let mut smp = pool.get().unwrap();
    smp.length = 1;
    // Origin a little in the past so the delay is clearly positive.
    smp.ts.origin = Timespec::now().diff(&Timespec::new(1, 0));
    smp.flags = SampleFlags::HAS_TS_ORIGIN | SampleFlags::HAS_DATA | SampleFlags::HAS_SEQUENCE;
    node.kind().write(&[smp]).unwrap();
    Sample::decref(smp);

    let mut out = vec![];
    node.read(&mut out).unwrap();
    Sample::decref_many(&out);

    let owd = node
        .stats()
        .get(crate::stats::Metric::Owd, crate::stats::StatType::Last);
    assert!(owd > 0.9, "owd {owd}");

    node.stop().unwrap();
}
