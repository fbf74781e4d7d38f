use std::sync::Arc;

use super::{HeaderKind, MappingEntry, MappingKind, MappingList, TimestampKind};
use crate::memory;
use crate::node::{Node, NodeList};
use crate::pool::Pool;
use crate::sample::Sample;
use crate::signal::SignalType;
use crate::stats::{Metric, StatType};
use crate::timing::Timespec;
use uuid::Uuid;

#[test]
fn test_parse_selectors() {
    let m = MappingEntry::parse_str("apple.ts.origin").unwrap();
    assert_eq!(m.node_name, "apple");
    assert_eq!(m.kind, MappingKind::Timestamp(TimestampKind::Origin));

    let m = MappingEntry::parse_str("cherry.stats.owd.mean").unwrap();
    assert_eq!(m.node_name, "cherry");
    assert_eq!(
        m.kind,
        MappingKind::Stats {
            metric: Metric::Owd,
            ty: StatType::Mean
        }
    );

    let m = MappingEntry::parse_str("carrot.data[1-2]").unwrap();
    assert_eq!(m.node_name, "carrot");
    assert_eq!(
        m.kind,
        MappingKind::Data {
            first: Some("1".into()),
            last: Some("2".into())
        }
    );

    let m = MappingEntry::parse_str("carrot").unwrap();
    assert_eq!(
        m.kind,
        MappingKind::Data {
            first: None,
            last: None
        }
    );

    let m = MappingEntry::parse_str("carrot.data[sole]").unwrap();
    assert_eq!(
        m.kind,
        MappingKind::Data {
            first: Some("sole".into()),
            last: None
        }
    );

    let m = MappingEntry::parse_str("carrot.sole").unwrap();
    assert_eq!(
        m.kind,
        MappingKind::Data {
            first: Some("sole".into()),
            last: None
        }
    );

    let m = MappingEntry::parse_str("carrot.data.sole").unwrap();
    assert_eq!(
        m.kind,
        MappingKind::Data {
            first: Some("sole".into()),
            last: None
        }
    );

    let m = MappingEntry::parse_str("carrot[sole-mio]").unwrap();
    assert_eq!(
        m.kind,
        MappingKind::Data {
            first: Some("sole".into()),
            last: Some("mio".into())
        }
    );

    let m = MappingEntry::parse_str("beet.hdr.sequence").unwrap();
    assert_eq!(m.kind, MappingKind::Header(HeaderKind::Sequence));
}

#[test]
fn test_parse_rejects_malformed() {
    assert!(MappingEntry::parse_str("").is_err());
    assert!(MappingEntry::parse_str("node.ts.middle").is_err());
    assert!(MappingEntry::parse_str("node.hdr.nope").is_err());
    assert!(MappingEntry::parse_str("node.stats.owd").is_err());
    assert!(MappingEntry::parse_str("node.data[0").is_err());
}

fn test_nodes() -> NodeList {
    crate::registry::init();

    let super_uuid = Uuid::new_v4();
    let mut list = NodeList::new();

    let config = serde_json::json!({
        "type": "loopback",
        "in": { "signals": [
            { "name": "va", "type": "float" },
            { "name": "vb", "type": "float" },
            { "name": "vc", "type": "float" },
        ] },
    });
    list.push(Arc::new(
        Node::from_config("alpha", &config, &super_uuid).unwrap(),
    ));

    let config = serde_json::json!({
        "type": "loopback",
        "in": { "signals": [{ "name": "freq", "type": "float" }] },
    });
    list.push(Arc::new(
        Node::from_config("beta", &config, &super_uuid).unwrap(),
    ));

    list
}

#[test]
fn test_prepare_resolves_names_and_offsets() {
    let nodes = test_nodes();

    let json = serde_json::json!(["alpha.data[vb-vc]", "beta.freq", "alpha.hdr.sequence"]);
    let mut list = MappingList::parse(&json).unwrap();

    let total = list.prepare(&nodes).unwrap();
    assert_eq!(total, 4);

    let entries: Vec<_> = list.iter().collect();
    assert_eq!(entries[0].offset(), 0);
    assert_eq!(entries[0].length(), 2);
    assert_eq!(entries[1].offset(), 2);
    assert_eq!(entries[1].length(), 1);
    assert_eq!(entries[2].offset(), 3);

    let signals = list.to_signals();
    assert_eq!(signals.len(), 4);
    assert_eq!(signals.get(0).unwrap().name, "vb");
    assert_eq!(signals.get(2).unwrap().name, "freq");
    assert_eq!(signals.get(3).unwrap().ty, SignalType::Integer);
}

#[test]
fn test_prepare_unknown_node_fails() {
    let nodes = test_nodes();
    let mut list = MappingList::parse(&serde_json::json!("gamma.data[0]")).unwrap();
    assert!(list.prepare(&nodes).is_err());
}

#[test]
fn test_remap_copies_selected_slots() {
    let nodes = test_nodes();
    let alpha = Arc::clone(nodes.by_name("alpha").unwrap());
    let beta = Arc::clone(nodes.by_name("beta").unwrap());

    let mut list =
        MappingList::parse(&serde_json::json!(["alpha.data[vb-vc]", "beta.freq"])).unwrap();
    let total = list.prepare(&nodes).unwrap();

    let pool = Pool::for_samples(8, 8, &memory::default_type()).unwrap();

    let mut from_alpha = pool.get().unwrap();
    from_alpha.length = 3;
    from_alpha.data_mut()[0].set(SignalType::Float, 10.0);
    from_alpha.data_mut()[1].set(SignalType::Float, 11.0);
    from_alpha.data_mut()[2].set(SignalType::Float, 12.0);

    let mut from_beta = pool.get().unwrap();
    from_beta.length = 1;
    from_beta.data_mut()[0].set(SignalType::Float, 50.0);

    let mut muxed = pool.get().unwrap();
    list.remap_node(&mut muxed, &from_alpha, &alpha);
    list.remap_node(&mut muxed, &from_beta, &beta);

    assert_eq!(muxed.length as usize, total);
    assert_eq!(muxed.data()[0].as_f64(SignalType::Float), 11.0);
    assert_eq!(muxed.data()[1].as_f64(SignalType::Float), 12.0);
    assert_eq!(muxed.data()[2].as_f64(SignalType::Float), 50.0);

    // Pure in its inputs: applying the same source again changes nothing.
    list.remap_node(&mut muxed, &from_alpha, &alpha);
    assert_eq!(muxed.data()[0].as_f64(SignalType::Float), 11.0);
    assert_eq!(muxed.data()[2].as_f64(SignalType::Float), 50.0);

    Sample::decref_many(&[from_alpha, from_beta, muxed]);
}

#[test]
fn test_remap_timestamp_and_header() {
    let nodes = test_nodes();
    let beta = Arc::clone(nodes.by_name("beta").unwrap());

    let mut list =
        MappingList::parse(&serde_json::json!(["beta.ts.origin", "beta.hdr.sequence"])).unwrap();
    list.prepare(&nodes).unwrap();

    let pool = Pool::for_samples(8, 8, &memory::default_type()).unwrap();

    let mut src = pool.get().unwrap();
    src.sequence = 99;
    src.ts.origin = Timespec::new(1234, 567);

    let mut muxed = pool.get().unwrap();
    list.remap_node(&mut muxed, &src, &beta);

    assert_eq!(muxed.length, 3);
    assert_eq!(unsafe { muxed.data()[0].i }, 1234);
    assert_eq!(unsafe { muxed.data()[1].i }, 567);
    assert_eq!(unsafe { muxed.data()[2].i }, 99);

    Sample::decref_many(&[src, muxed]);
}

#[test]
fn test_nodes_deduplicated() {
    let nodes = test_nodes();
    let mut list = MappingList::parse(&serde_json::json!([
        "alpha.data[va]",
        "alpha.data[vb]",
        "beta.freq"
    ]))
    .unwrap();
    list.prepare(&nodes).unwrap();

    assert_eq!(list.nodes().len(), 2);
}
