use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;

use super::builtin::{DropHook, FixHook, RestartHook};
use super::{EbmHook, Hook, HookChain, LimitRateHook, MovingAverageHook, Reason, ScaleHook};
use super::{CastHook, ShiftSequenceHook, ShiftTimestampHook};
use crate::memory;
use crate::pool::Pool;
use crate::sample::{Sample, SampleFlags, SamplePtr};
use crate::signal::{SignalList, SignalType};
use crate::stats::Stats;
use crate::timing::Timespec;

fn fixture() -> (Arc<Pool>, Arc<SignalList>) {
    let pool = Pool::for_samples(64, 8, &memory::default_type()).unwrap();
    let signals = Arc::new(SignalList::uniform(4, SignalType::Float));
    (pool, signals)
}

fn make_sample(pool: &Arc<Pool>, sequence: u64, values: &[f64]) -> SamplePtr {
    let mut smp = pool.get().unwrap();
    smp.sequence = sequence;
    smp.length = values.len() as u16;
    smp.flags = SampleFlags::HAS_SEQUENCE | SampleFlags::HAS_DATA;
    for (i, v) in values.iter().enumerate() {
        smp.data_mut()[i].set(SignalType::Float, *v);
    }
    smp
}

struct RecordHook {
    tag: i32,
    log: Arc<Mutex<Vec<i32>>>,
}

impl Hook for RecordHook {
    fn name(&self) -> &'static str {
        "record"
    }

    fn process(&mut self, _smp: &mut SamplePtr) -> Reason {
        self.log.lock().unwrap().push(self.tag);
        Reason::Ok
    }
}

#[test]
fn test_chain_runs_by_ascending_priority() {
    let (pool, signals) = fixture();
    let log = Arc::new(Mutex::new(vec![]));

    let mut chain = HookChain::new();
    for &prio in &[5, 1, 3] {
        chain.add(
            Box::new(RecordHook {
                tag: prio,
                log: Arc::clone(&log),
            }),
            prio,
            true,
        );
    }
    chain.prepare(signals).unwrap();

    let mut smp = make_sample(&pool, 0, &[1.0]);
    assert_eq!(chain.process(&mut smp), Reason::Ok);
    assert_eq!(*log.lock().unwrap(), vec![1, 3, 5]);

    Sample::decref(smp);
}

#[test]
fn test_disabled_hook_is_skipped() {
    let (pool, signals) = fixture();
    let log = Arc::new(Mutex::new(vec![]));

    let mut chain = HookChain::new();
    chain.add(
        Box::new(RecordHook {
            tag: 1,
            log: Arc::clone(&log),
        }),
        1,
        false,
    );
    chain.prepare(signals).unwrap();

    let mut smp = make_sample(&pool, 0, &[1.0]);
    chain.process(&mut smp);
    assert!(log.lock().unwrap().is_empty());

    Sample::decref(smp);
}

#[test]
fn test_fix_stamps_missing_fields() {
    let (pool, _) = fixture();
    let mut hook = FixHook::default();

    let mut smp = pool.get().unwrap();
    smp.flags = SampleFlags::empty();

    assert_eq!(hook.process(&mut smp), Reason::Ok);
    assert!(smp.has(SampleFlags::HAS_TS_RECEIVED));
    assert!(smp.has(SampleFlags::HAS_TS_ORIGIN));
    assert_eq!(smp.ts.origin, smp.ts.received);

    Sample::decref(smp);
}

#[test]
fn test_drop_skips_reordered() {
    let (pool, _) = fixture();
    let stats = Arc::new(Stats::default());
    let mut hook = DropHook::with_stats(Arc::clone(&stats));
    hook.start().unwrap();

    let mut delivered = vec![];
    for seq in [0u64, 1, 3, 2, 4] {
        let mut smp = make_sample(&pool, seq, &[seq as f64]);
        match hook.process(&mut smp) {
            Reason::Ok => delivered.push(smp.sequence),
            Reason::SkipSample => {}
            other => panic!("unexpected {other:?}"),
        }
        Sample::decref(smp);
    }
    hook.stop().unwrap();

    assert_eq!(delivered, vec![0, 1, 3, 4]);
    assert_eq!(stats.counters.reorder_dropped.load(Ordering::Relaxed), 1);
}

#[test]
fn test_restart_detects_sequence_reset() {
    let (pool, _) = fixture();
    let trigger = Arc::new(AtomicBool::new(false));
    let mut hook = RestartHook::with_trigger(Arc::clone(&trigger));

    for seq in [10u64, 11] {
        let mut smp = make_sample(&pool, seq, &[]);
        hook.process(&mut smp);
        Sample::decref(smp);
        assert!(!trigger.load(Ordering::Acquire));
    }

    let mut smp = make_sample(&pool, 0, &[]);
    hook.process(&mut smp);
    Sample::decref(smp);
    assert!(trigger.load(Ordering::Acquire));
}

#[test]
fn test_scale_applies_factor_and_offset() {
    let (pool, signals) = fixture();

    let mut hook = ScaleHook::default();
    hook.parse(&json!({ "scale": 2.0, "offset": 1.0, "signals": [0, 2] }))
        .unwrap();
    hook.prepare(&signals).unwrap();

    let mut smp = make_sample(&pool, 0, &[1.0, 1.0, 1.0, 1.0]);
    hook.process(&mut smp);

    let values: Vec<f64> = smp
        .data()
        .iter()
        .map(|d| d.as_f64(SignalType::Float))
        .collect();
    assert_eq!(values, vec![3.0, 1.0, 3.0, 1.0]);

    Sample::decref(smp);
}

#[test]
fn test_cast_transforms_signal_list_and_values() {
    let (pool, signals) = fixture();

    let mut hook = CastHook::default();
    hook.parse(&json!({ "signals": [1], "new_type": "integer" }))
        .unwrap();

    let transformed = hook.prepare(&signals).unwrap().expect("list must change");
    assert_eq!(transformed.get(1).unwrap().ty, SignalType::Integer);
    assert_eq!(transformed.get(0).unwrap().ty, SignalType::Float);

    let mut smp = make_sample(&pool, 0, &[0.5, 3.9]);
    hook.process(&mut smp);
    assert_eq!(unsafe { smp.data()[1].i }, 3);

    Sample::decref(smp);
}

#[test]
fn test_round_to_precision() {
    let (pool, signals) = fixture();

    let mut hook = super::RoundHook::default();
    hook.parse(&json!({ "precision": 2 })).unwrap();
    hook.prepare(&signals).unwrap();

    let mut smp = make_sample(&pool, 0, &[1.23456]);
    hook.process(&mut smp);
    assert_eq!(smp.data()[0].as_f64(SignalType::Float), 1.23);

    Sample::decref(smp);
}

#[test]
fn test_ma_running_mean() {
    let (pool, signals) = fixture();

    let mut hook = MovingAverageHook::default();
    hook.parse(&json!({ "window_size": 4, "signals": [0] }))
        .unwrap();
    hook.prepare(&signals).unwrap();

    let inputs = [4.0, 4.0, 4.0, 4.0, 8.0];
    let mut outputs = vec![];
    for v in inputs {
        let mut smp = make_sample(&pool, 0, &[v]);
        hook.process(&mut smp);
        outputs.push(smp.data()[0].as_f64(SignalType::Float));
        Sample::decref(smp);
    }

    // Window fills up, then the spike shifts the mean by 1/4 of its weight.
    assert_eq!(outputs[3], 4.0);
    assert_eq!(outputs[4], 5.0);
}

#[test]
fn test_ma_rejects_integer_signals() {
    let signals = Arc::new(SignalList::uniform(2, SignalType::Integer));
    let mut hook = MovingAverageHook::default();
    hook.parse(&json!({})).unwrap();
    assert!(hook.prepare(&signals).is_err());
}

#[test]
fn test_limit_rate_on_origin_clock() {
    let (pool, _) = fixture();

    let mut hook = LimitRateHook::default();
    hook.parse(&json!({ "rate": 10.0, "mode": "origin" })).unwrap();
    hook.start().unwrap();

    // 1 kHz input on the origin clock; 10 Hz limit passes every 100th.
    let mut passed = 0;
    for i in 0..1000u64 {
        let mut smp = make_sample(&pool, i, &[0.0]);
        smp.ts.origin = Timespec::new(1000, (i as i64) * 1_000_000);
        smp.flags |= SampleFlags::HAS_TS_ORIGIN;

        if hook.process(&mut smp) == Reason::Ok {
            passed += 1;
        }
        Sample::decref(smp);
    }

    assert_eq!(passed, 10);
}

#[test]
fn test_shift_seq_and_ts() {
    let (pool, _) = fixture();

    let mut seq_hook = ShiftSequenceHook::default();
    seq_hook.parse(&json!({ "offset": 100 })).unwrap();

    let mut ts_hook = ShiftTimestampHook::default();
    ts_hook
        .parse(&json!({ "offset": -0.5, "mode": "origin" }))
        .unwrap();

    let mut smp = make_sample(&pool, 7, &[0.0]);
    smp.ts.origin = Timespec::new(1000, 0);

    seq_hook.process(&mut smp);
    ts_hook.process(&mut smp);

    assert_eq!(smp.sequence, 107);
    assert_eq!(smp.ts.origin, Timespec::new(999, 500_000_000));

    Sample::decref(smp);
}

#[test]
fn test_ebm_trapezoidal_energy() {
    let (pool, _) = fixture();

    let mut hook = EbmHook::default();
    hook.parse(&json!({ "phases": [[0, 1]] })).unwrap();
    hook.start().unwrap();

    // Constant P = 230 V * 2 A = 460 W over 1 s in 2 steps.
    for (t, v, i) in [(0.0, 230.0, 2.0), (0.5, 230.0, 2.0), (1.0, 230.0, 2.0)] {
        let mut smp = make_sample(&pool, 0, &[v, i]);
        smp.ts.origin = Timespec::from_secs_f64(1000.0 + t);
        hook.process(&mut smp);
        Sample::decref(smp);
    }
    hook.stop().unwrap();

    assert!((hook.energy() - 460.0).abs() < 1e-9);
}

#[test]
fn test_process_list_skip_and_stop() {
    let (pool, signals) = fixture();

    struct SkipOdd;
    impl Hook for SkipOdd {
        fn name(&self) -> &'static str {
            "skip_odd"
        }
        fn process(&mut self, smp: &mut SamplePtr) -> Reason {
            if smp.sequence % 2 == 1 {
                Reason::SkipSample
            } else {
                Reason::Ok
            }
        }
    }

    let mut chain = HookChain::new();
    chain.add(Box::new(SkipOdd), 10, true);
    chain.prepare(Arc::clone(&signals)).unwrap();

    let mut batch: Vec<SamplePtr> = (0..6).map(|i| make_sample(&pool, i, &[0.0])).collect();
    let result = chain.process_list(&mut batch).unwrap();

    assert_eq!(result.skipped, 3);
    let sequences: Vec<u64> = batch.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![0, 2, 4]);
    Sample::decref_many(&batch);

    // StopProcessing truncates the remainder of the batch.
    struct StopAt(u64);
    impl Hook for StopAt {
        fn name(&self) -> &'static str {
            "stop_at"
        }
        fn process(&mut self, smp: &mut SamplePtr) -> Reason {
            if smp.sequence == self.0 {
                Reason::StopProcessing
            } else {
                Reason::Ok
            }
        }
    }

    let mut chain = HookChain::new();
    chain.add(Box::new(StopAt(2)), 10, true);
    chain.prepare(signals).unwrap();

    let mut batch: Vec<SamplePtr> = (0..6).map(|i| make_sample(&pool, i, &[0.0])).collect();
    let result = chain.process_list(&mut batch).unwrap();

    assert_eq!(result.skipped, 4);
    assert_eq!(batch.len(), 2);
    Sample::decref_many(&batch);

    // All pool blocks returned: nothing leaked by the chain.
    assert_eq!(pool.available(), pool.count());
}
