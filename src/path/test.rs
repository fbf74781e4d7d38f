use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use super::{Path, PathSource};
use crate::gateway::Gateway;
use crate::memory;
use crate::node::{Node, NodeKind, NodeList};
use crate::pool::Pool;
use crate::sample::{Sample, SampleFlags, SamplePtr};
use crate::signal::SignalType;
use crate::timing::Timespec;

#[derive(Debug, Clone)]
struct Collected {
    sequence: u64,
    values: Vec<f64>,
    ts_origin: Timespec,
    has_ts_origin: bool,
    has_ts_received: bool,
    ts_received: Timespec,
}

fn start_gateway(config: Value) -> Gateway {
    let mut gw = Gateway::new();
    gw.parse(&config).unwrap();
    gw.check().unwrap();
    gw.prepare().unwrap();
    gw.start().unwrap();
    gw
}

fn scratch_pool() -> Arc<Pool> {
    Pool::for_samples(2048, 8, &memory::default_type()).unwrap()
}

/// Push one sample into a node's write side, as a transport would.
fn feed(node: &Arc<Node>, pool: &Arc<Pool>, sequence: u64, origin: Option<f64>, values: &[f64]) {
    let mut smp = pool.get().unwrap();
    smp.sequence = sequence;
    smp.length = values.len() as u16;
    smp.flags = SampleFlags::HAS_SEQUENCE | SampleFlags::HAS_DATA;
    if let Some(t) = origin {
        smp.ts.origin = Timespec::from_secs_f64(t);
        smp.flags |= SampleFlags::HAS_TS_ORIGIN;
    }
    for (i, v) in values.iter().enumerate() {
        smp.data_mut()[i].set(SignalType::Float, *v);
    }

    node.kind().write(&[smp]).unwrap();
    Sample::decref(smp);
}

/// Drain a destination node from a background thread until it stops.
fn spawn_reader(
    node: Arc<Node>,
) -> (Arc<Mutex<Vec<Collected>>>, std::thread::JoinHandle<()>) {
    let collected = Arc::new(Mutex::new(vec![]));
    let sink = Arc::clone(&collected);

    let handle = std::thread::spawn(move || loop {
        let mut batch = vec![];
        match node.read(&mut batch) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let mut sink = sink.lock().unwrap();
                for smp in &batch {
                    sink.push(Collected {
                        sequence: smp.sequence,
                        values: smp
                            .data()
                            .iter()
                            .map(|d| d.as_f64(SignalType::Float))
                            .collect(),
                        ts_origin: smp.ts.origin,
                        has_ts_origin: smp.has(SampleFlags::HAS_TS_ORIGIN),
                        has_ts_received: smp.has(SampleFlags::HAS_TS_RECEIVED),
                        ts_received: smp.ts.received,
                    });
                }
                Sample::decref_many(&batch);
            }
        }
    });

    (collected, handle)
}

fn wait_for(collected: &Arc<Mutex<Vec<Collected>>>, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while collected.lock().unwrap().len() < count {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {count} samples, got {}",
            collected.lock().unwrap().len()
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_passthrough_preserves_data_and_timestamps() {
    let gw = start_gateway(json!({
        "nodes": {
            "src": { "type": "loopback", "in": { "signals": { "count": 2, "type": "float" } } },
            "dst": { "type": "loopback" },
        },
        "paths": [ { "in": "src", "out": "dst" } ],
    }));

    let pool = scratch_pool();
    let src = Arc::clone(gw.nodes().by_name("src").unwrap());
    let (collected, reader) = spawn_reader(Arc::clone(gw.nodes().by_name("dst").unwrap()));

    feed(&src, &pool, 0, Some(1000.0), &[0.5, -0.5]);
    feed(&src, &pool, 1, Some(1000.1), &[1.5, -1.5]);
    feed(&src, &pool, 2, Some(1000.2), &[2.5, -2.5]);

    wait_for(&collected, 3);
    gw.stop().unwrap();
    reader.join().unwrap();

    let got = collected.lock().unwrap();
    assert_eq!(got.len(), 3);
    for (i, smp) in got.iter().enumerate() {
        assert_eq!(smp.sequence, i as u64);
        assert_eq!(smp.values, vec![i as f64 + 0.5, -(i as f64) - 0.5]);
        assert!(smp.has_ts_origin);
        assert!(smp.has_ts_received);
        assert_eq!(smp.ts_origin, Timespec::from_secs_f64(1000.0 + 0.1 * i as f64));
        assert!(smp.ts_received >= smp.ts_origin);
    }
    // Sequence is monotone across the delivered stream.
    assert!(got.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

#[test]
fn test_drop_reordered_sequence() {
    let gw = start_gateway(json!({
        "nodes": {
            "src": { "type": "loopback", "in": { "signals": { "count": 1, "type": "float" } } },
            "dst": { "type": "loopback" },
        },
        "paths": [ { "in": "src", "out": "dst" } ],
    }));

    let pool = scratch_pool();
    let src = Arc::clone(gw.nodes().by_name("src").unwrap());
    let (collected, reader) = spawn_reader(Arc::clone(gw.nodes().by_name("dst").unwrap()));

    for seq in [0u64, 1, 3, 2, 4] {
        feed(&src, &pool, seq, None, &[seq as f64]);
    }

    wait_for(&collected, 4);
    // Give the path a beat to (wrongly) deliver the reordered sample.
    std::thread::sleep(Duration::from_millis(20));
    gw.stop().unwrap();
    reader.join().unwrap();

    let sequences: Vec<u64> = collected.lock().unwrap().iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 3, 4]);

    assert_eq!(
        src.stats().counters.reorder_dropped.load(Ordering::Relaxed),
        1
    );
}

#[test]
fn test_restart_on_sequence_reset() {
    let gw = start_gateway(json!({
        "nodes": {
            "src": { "type": "loopback", "in": { "signals": { "count": 1, "type": "float" } } },
            "dst": { "type": "loopback" },
        },
        "paths": [ { "in": "src", "out": "dst" } ],
    }));

    let pool = scratch_pool();
    let src = Arc::clone(gw.nodes().by_name("src").unwrap());
    let (collected, reader) = spawn_reader(Arc::clone(gw.nodes().by_name("dst").unwrap()));

    for seq in [10u64, 11, 0, 1] {
        feed(&src, &pool, seq, None, &[seq as f64]);
    }

    wait_for(&collected, 4);
    gw.stop().unwrap();
    reader.join().unwrap();

    // The restart lets the post-reset sequences through instead of
    // dropping them as reordered.
    let sequences: Vec<u64> = collected.lock().unwrap().iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![10, 11, 0, 1]);
    assert_eq!(
        src.stats().counters.reorder_dropped.load(Ordering::Relaxed),
        0
    );
}

#[test]
fn test_two_source_mux_mode_all() {
    let gw = start_gateway(json!({
        "nodes": {
            "a": { "type": "loopback", "in": { "signals": [ { "name": "a0", "type": "float" } ] } },
            "b": { "type": "loopback", "in": { "signals": [
                { "name": "b0", "type": "float" },
                { "name": "b1", "type": "float" },
            ] } },
            "dst": { "type": "loopback" },
        },
        "paths": [ {
            "in": [ "a.data[0]", "b.data[0-1]" ],
            "out": "dst",
            "mode": "all",
        } ],
    }));

    let pool = scratch_pool();
    let a = Arc::clone(gw.nodes().by_name("a").unwrap());
    let b = Arc::clone(gw.nodes().by_name("b").unwrap());
    let (collected, reader) = spawn_reader(Arc::clone(gw.nodes().by_name("dst").unwrap()));

    // Only A produced: no emission yet.
    feed(&a, &pool, 0, None, &[1.0]);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(collected.lock().unwrap().len(), 0);

    // B completes the round.
    feed(&b, &pool, 0, None, &[2.0, 3.0]);
    wait_for(&collected, 1);

    {
        let got = collected.lock().unwrap();
        assert_eq!(got[0].values, vec![1.0, 2.0, 3.0]);
    }

    // A new round: A alone does not trigger, B alone completes it with
    // A's held value.
    feed(&a, &pool, 1, None, &[10.0]);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(collected.lock().unwrap().len(), 1);

    feed(&b, &pool, 1, None, &[20.0, 30.0]);
    wait_for(&collected, 2);

    gw.stop().unwrap();
    reader.join().unwrap();

    let got = collected.lock().unwrap();
    assert_eq!(got[1].values, vec![10.0, 20.0, 30.0]);
}

#[test]
fn test_limit_rate_bounds_emissions() {
    let gw = start_gateway(json!({
        "nodes": {
            "src": { "type": "loopback", "in": {
                "signals": { "count": 1, "type": "float" },
                "vectorize": 64,
            }, "queuelen": 2048 },
            "dst": { "type": "loopback" },
        },
        "paths": [ {
            "in": "src",
            "out": "dst",
            "queuelen": 2048,
            "hooks": [ { "type": "limit_rate", "rate": 10.0 } ],
        } ],
    }));

    let pool = scratch_pool();
    let src = Arc::clone(gw.nodes().by_name("src").unwrap());
    let (collected, reader) = spawn_reader(Arc::clone(gw.nodes().by_name("dst").unwrap()));

    let start = Instant::now();
    for seq in 0..1000u64 {
        feed(&src, &pool, seq, None, &[seq as f64]);
    }
    let elapsed = start.elapsed().as_secs_f64();

    std::thread::sleep(Duration::from_millis(100));
    gw.stop().unwrap();
    reader.join().unwrap();

    // At 10 Hz the dead-time admits roughly elapsed * rate + 1 samples.
    let delivered = collected.lock().unwrap().len();
    let bound = (elapsed * 10.0).ceil() as usize + 2;
    assert!(delivered >= 1);
    assert!(delivered <= bound, "{delivered} delivered, bound {bound}");
}

// A sink whose write blocks until the gate opens, for back-pressure tests.
struct BlockedSink {
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl NodeKind for BlockedSink {
    fn type_name(&self) -> &'static str {
        "blocked_sink"
    }

    fn read(
        &self,
        _pool: &Arc<Pool>,
        _out: &mut Vec<SamplePtr>,
        _cnt: usize,
    ) -> crate::error::Result<usize> {
        Ok(0)
    }

    fn write(&self, smps: &[SamplePtr]) -> crate::error::Result<usize> {
        let (lock, cond) = &*self.gate;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cond.wait(open).unwrap();
        }
        Ok(smps.len())
    }
}

#[test]
fn test_fanout_backpressure_isolation() {
    crate::registry::init();
    let super_uuid = uuid::Uuid::new_v4();

    let src_cfg = json!({
        "type": "loopback",
        "in": { "signals": { "count": 1, "type": "float" } },
        "queuelen": 4096,
    });
    let src = Arc::new(Node::from_config("src", &src_cfg, &super_uuid).unwrap());
    let d1 = Arc::new(
        Node::from_config(
            "d1",
            &json!({ "type": "loopback", "queuelen": 4096 }),
            &super_uuid,
        )
        .unwrap(),
    );

    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let d2 = Arc::new(
        Node::with_kind(
            "d2",
            Box::new(BlockedSink {
                gate: Arc::clone(&gate),
            }),
            crate::node::NodeFlags::empty(),
            &json!({}),
            &super_uuid,
        )
        .unwrap(),
    );

    let mut nodes = NodeList::new();
    for node in [&src, &d1, &d2] {
        nodes.push(Arc::clone(node));
        node.check().unwrap();
        node.prepare().unwrap();
        node.start().unwrap();
    }

    let queuelen = 16usize;
    let mut path = Path::parse(
        &json!({ "in": "src", "out": ["d1", "d2"], "queuelen": queuelen }),
        0,
        &super_uuid,
    )
    .unwrap();
    path.check().unwrap();

    let source = PathSource::master(
        Arc::clone(&src),
        Arc::clone(path.restart_flag()),
        Arc::new(std::sync::atomic::AtomicBool::new(false)),
    )
    .unwrap();
    path.prepare(vec![source], &nodes).unwrap();
    path.start().unwrap();

    let pool = scratch_pool();
    let (collected, reader) = spawn_reader(Arc::clone(&d1));

    let total = 10 * queuelen;
    for seq in 0..total as u64 {
        feed(&src, &pool, seq, None, &[seq as f64]);
    }

    // D1 keeps flowing while D2's writer is stuck in its first write.
    wait_for(&collected, total);
    {
        let got = collected.lock().unwrap();
        let sequences: Vec<u64> = got.iter().map(|s| s.sequence).collect();
        let expected: Vec<u64> = (0..total as u64).collect();
        assert_eq!(sequences, expected);
    }

    assert!(
        d2.stats().counters.queue_overrun.load(Ordering::Relaxed) > 0,
        "blocked destination must overrun its queue"
    );

    // Open the gate so the stuck writer can finish, then shut down.
    {
        let (lock, cond) = &*gate;
        *lock.lock().unwrap() = true;
        cond.notify_all();
    }

    path.stop();
    for node in [&src, &d1, &d2] {
        node.stop().unwrap();
    }
    path.join();
    reader.join().unwrap();
}
