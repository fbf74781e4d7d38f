use std::sync::Arc;

use super::{BinaryFormat, Format, HumanFormat, JsonFormat};
use crate::memory;
use crate::pool::Pool;
use crate::sample::{Sample, SampleFlags, SamplePtr};
use crate::signal::{SignalList, SignalType};
use crate::timing::Timespec;

fn fixture() -> (Arc<Pool>, Arc<SignalList>, SamplePtr) {
    let pool = Pool::for_samples(16, 8, &memory::default_type()).unwrap();

    let mut signals = SignalList::new();
    signals.push(crate::signal::Signal::new("v", "V", SignalType::Float));
    signals.push(crate::signal::Signal::new("i", "A", SignalType::Float));
    signals.push(crate::signal::Signal::new("n", "", SignalType::Integer));
    let signals = Arc::new(signals);

    let mut smp = pool.get().unwrap();
    smp.length = 3;
    smp.sequence = 7;
    smp.ts.origin = Timespec::new(1000, 500);
    smp.flags = SampleFlags::HAS_SEQUENCE | SampleFlags::HAS_TS_ORIGIN | SampleFlags::HAS_DATA;
    smp.set_signals(Arc::downgrade(&signals));
    smp.data_mut()[0].set(SignalType::Float, 1.5);
    smp.data_mut()[1].set(SignalType::Float, -2.0);
    smp.data_mut()[2] = crate::signal::SignalData::integer(42);

    (pool, signals, smp)
}

fn assert_round_trip(codec: &dyn Format) {
    let (pool, signals, smp) = fixture();

    let mut buf = vec![];
    assert_eq!(codec.pack(&mut buf, &[smp], &signals).unwrap(), 1);

    let mut out = vec![];
    let consumed = codec.unpack(&buf, &pool, &signals, &mut out).unwrap();
    assert_eq!(consumed, buf.len());
    assert_eq!(out.len(), 1);

    let got = out[0];
    assert_eq!(got.sequence, 7);
    assert_eq!(got.ts.origin, Timespec::new(1000, 500));
    assert_eq!(got.length, 3);
    assert_eq!(got.data()[0].as_f64(SignalType::Float), 1.5);
    assert_eq!(got.data()[1].as_f64(SignalType::Float), -2.0);
    assert_eq!(unsafe { got.data()[2].i }, 42);
    assert!(got.has(SampleFlags::HAS_SEQUENCE));
    assert!(got.has(SampleFlags::HAS_TS_ORIGIN));

    Sample::decref(smp);
    Sample::decref_many(&out);
}

#[test]
fn test_binary_round_trip() {
    assert_round_trip(&BinaryFormat);
}

#[test]
fn test_json_round_trip() {
    assert_round_trip(&JsonFormat);
}

#[test]
fn test_human_round_trip() {
    assert_round_trip(&HumanFormat::default());
}

#[test]
fn test_binary_record_is_16_plus_4n() {
    let (_pool, signals, smp) = fixture();

    let mut buf = vec![];
    BinaryFormat.pack(&mut buf, &[smp], &signals).unwrap();
    assert_eq!(buf.len(), 16 + 3 * 4);

    // version 2 in the top nibble, type 0 next.
    assert_eq!(buf[0] >> 4, 2);
    assert_eq!((buf[0] >> 2) & 0b11, 0);

    Sample::decref(smp);
}

#[test]
fn test_binary_partial_record_left_unconsumed() {
    let (pool, signals, smp) = fixture();

    let mut buf = vec![];
    BinaryFormat.pack(&mut buf, &[smp, smp], &signals).unwrap();
    let record = buf.len() / 2;

    // Cut the stream in the middle of the second record.
    let mut out = vec![];
    let consumed = BinaryFormat
        .unpack(&buf[..record + 7], &pool, &signals, &mut out)
        .unwrap();
    assert_eq!(consumed, record);
    assert_eq!(out.len(), 1);

    Sample::decref(smp);
    Sample::decref_many(&out);
}

#[test]
fn test_binary_rejects_bad_version() {
    let (pool, signals, _smp) = fixture();

    let mut buf = vec![0u8; 16];
    buf[0] = 7 << 4;
    let mut out = vec![];
    assert!(BinaryFormat.unpack(&buf, &pool, &signals, &mut out).is_err());

    Sample::decref(_smp);
}

#[test]
fn test_json_decode_named_data() {
    let (pool, signals, _smp) = fixture();

    let line = br#"{ "ts": [5, 0], "sequence": 1, "data": { "v": 3.5, "n": 9 } }
"#;
    let mut out = vec![];
    JsonFormat.unpack(line, &pool, &signals, &mut out).unwrap();

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].data()[0].as_f64(SignalType::Float), 3.5);
    assert_eq!(unsafe { out[0].data()[2].i }, 9);

    Sample::decref(_smp);
    Sample::decref_many(&out);
}

#[test]
fn test_human_skips_comment_lines() {
    let (pool, signals, _smp) = fixture();

    let text = b"# seconds.nanoseconds(sequence)\tv\ti\tn\n12.000000000(3)\t1.0\t2.0\t5\n";
    let mut out = vec![];
    HumanFormat::default()
        .unpack(text, &pool, &signals, &mut out)
        .unwrap();

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].sequence, 3);
    assert_eq!(out[0].ts.origin.sec, 12);
    assert_eq!(out[0].length, 3);

    Sample::decref(_smp);
    Sample::decref_many(&out);
}
