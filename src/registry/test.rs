use crate::hook::HookFlags;
use crate::node::NodeFlags;

#[test]
fn test_lookup_by_name() {
    super::init();

    assert!(super::lookup_node("loopback").is_some());
    assert!(super::lookup_hook("scale").is_some());
    assert!(super::lookup_format("villas.binary").is_some());
    assert!(super::lookup_api("capabilities").is_some());

    assert!(super::lookup_node("mqtt").is_none());
    assert!(super::lookup_hook("lua").is_none());
}

#[test]
fn test_init_idempotent() {
    super::init();
    let before = super::hooks().count();
    super::init();
    assert_eq!(super::hooks().count(), before);
}

#[test]
fn test_builtin_hooks_flagged_and_ordered() {
    super::init();

    let fix = super::lookup_hook("fix").unwrap();
    let restart = super::lookup_hook("restart").unwrap();
    let drop = super::lookup_hook("drop").unwrap();

    for factory in [&fix, &restart, &drop] {
        assert!(factory.flags.contains(HookFlags::BUILTIN));
        assert!(factory.flags.contains(HookFlags::NODE_READ));
    }
    assert!(fix.priority < restart.priority);
    assert!(restart.priority < drop.priority);

    // User hooks run after the builtins.
    assert!(super::lookup_hook("scale").unwrap().priority > drop.priority);
}

#[test]
fn test_internal_node_types_flagged() {
    super::init();

    let internal = super::lookup_node("loopback.internal").unwrap();
    assert!(internal.flags.contains(NodeFlags::INTERNAL));
    assert!(!super::lookup_node("loopback")
        .unwrap()
        .flags
        .contains(NodeFlags::INTERNAL));
}

#[test]
fn test_factories_construct() {
    super::init();

    for factory in super::hooks() {
        let hook = (factory.make)();
        assert_eq!(hook.name(), factory.name);
    }
    for factory in super::formats() {
        let format = (factory.make)();
        assert_eq!(format.name(), factory.name);
    }
}
