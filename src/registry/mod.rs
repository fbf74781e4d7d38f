//! Name → factory lookup for node types, hooks, formats and API request
//! handlers.
//!
//! The registry is populated exactly once by [`init`], before any
//! configuration is parsed, and read-only afterwards. Built-in plugins are
//! registered here in one deterministic step; there is no load-order magic.

use std::sync::OnceLock;

use crate::api::ApiRequest;
use crate::format::Format;
use crate::hook::{builtin, Hook, HookFlags};
use crate::node::{NodeFlags, NodeKind};

#[cfg(test)]
mod test;

pub struct NodeFactory {
    pub name: &'static str,
    pub description: &'static str,
    pub flags: NodeFlags,
    pub make: fn() -> Box<dyn NodeKind>,
}

pub struct HookFactory {
    pub name: &'static str,
    pub description: &'static str,
    pub flags: HookFlags,
    /// Default chain position; overridable per instance.
    pub priority: i32,
    pub make: fn() -> Box<dyn Hook>,
}

pub struct FormatFactory {
    pub name: &'static str,
    pub description: &'static str,
    pub make: fn() -> Box<dyn Format>,
}

pub struct ApiFactory {
    pub name: &'static str,
    pub description: &'static str,
    pub make: fn() -> Box<dyn ApiRequest>,
}

struct Registry {
    nodes: Vec<NodeFactory>,
    hooks: Vec<HookFactory>,
    formats: Vec<FormatFactory>,
    api: Vec<ApiFactory>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Populate the registry with every built-in plugin. Idempotent; must run
/// before nodes, hooks or formats are looked up.
pub fn init() {
    REGISTRY.get_or_init(build);
}

fn registry() -> &'static Registry {
    REGISTRY
        .get()
        .expect("plugin registry not initialized, call registry::init() first")
}

pub fn lookup_node(name: &str) -> Option<&'static NodeFactory> {
    registry().nodes.iter().find(|f| f.name == name)
}

pub fn lookup_hook(name: &str) -> Option<&'static HookFactory> {
    registry().hooks.iter().find(|f| f.name == name)
}

pub fn lookup_format(name: &str) -> Option<&'static FormatFactory> {
    registry().formats.iter().find(|f| f.name == name)
}

pub fn lookup_api(name: &str) -> Option<&'static ApiFactory> {
    registry().api.iter().find(|f| f.name == name)
}

pub fn nodes() -> impl Iterator<Item = &'static NodeFactory> {
    registry().nodes.iter()
}

pub fn hooks() -> impl Iterator<Item = &'static HookFactory> {
    registry().hooks.iter()
}

pub fn formats() -> impl Iterator<Item = &'static FormatFactory> {
    registry().formats.iter()
}

pub fn api_requests() -> impl Iterator<Item = &'static ApiFactory> {
    registry().api.iter()
}

fn build() -> Registry {
    let rw_path = HookFlags::NODE_READ | HookFlags::NODE_WRITE | HookFlags::PATH;

    Registry {
        nodes: vec![
            NodeFactory {
                name: "loopback",
                description: "In-process queue endpoint",
                flags: NodeFlags::empty(),
                make: || Box::new(crate::node::Loopback::new()),
            },
            // Secondary mates are created by the gateway itself; the entry
            // exists so capabilities can report the type.
            NodeFactory {
                name: "loopback.internal",
                description: "Secondary mate of a shared source node",
                flags: NodeFlags::INTERNAL | NodeFlags::HIDDEN,
                make: || Box::new(crate::node::Loopback::new()),
            },
        ],
        hooks: vec![
            HookFactory {
                name: "fix",
                description: "Add missing header fields to received samples",
                flags: HookFlags::BUILTIN | HookFlags::NODE_READ,
                priority: builtin::FIX_PRIORITY,
                make: || Box::new(builtin::FixHook::default()),
            },
            HookFactory {
                name: "restart",
                description: "Detect restarted simulation runs",
                flags: HookFlags::BUILTIN | HookFlags::NODE_READ,
                priority: builtin::RESTART_PRIORITY,
                make: || Box::new(builtin::RestartHook::default()),
            },
            HookFactory {
                name: "drop",
                description: "Drop samples with reordered sequence numbers",
                flags: HookFlags::BUILTIN | HookFlags::NODE_READ,
                priority: builtin::DROP_PRIORITY,
                make: || Box::new(builtin::DropHook::default()),
            },
            HookFactory {
                name: "scale",
                description: "Scale signals by a factor and add an offset",
                flags: rw_path,
                priority: 99,
                make: || Box::new(crate::hook::ScaleHook::default()),
            },
            HookFactory {
                name: "cast",
                description: "Cast signal types",
                flags: HookFlags::NODE_READ | HookFlags::PATH,
                priority: 99,
                make: || Box::new(crate::hook::CastHook::default()),
            },
            HookFactory {
                name: "round",
                description: "Round signals to a fixed number of digits",
                flags: rw_path,
                priority: 99,
                make: || Box::new(crate::hook::RoundHook::default()),
            },
            HookFactory {
                name: "ma",
                description: "Moving average over a window of past samples",
                flags: rw_path,
                priority: 99,
                make: || Box::new(crate::hook::MovingAverageHook::default()),
            },
            HookFactory {
                name: "limit_rate",
                description: "Limit the sample rate",
                flags: rw_path,
                priority: 99,
                make: || Box::new(crate::hook::LimitRateHook::default()),
            },
            HookFactory {
                name: "shift_seq",
                description: "Shift sequence numbers",
                flags: HookFlags::NODE_READ | HookFlags::PATH,
                priority: 99,
                make: || Box::new(crate::hook::ShiftSequenceHook::default()),
            },
            HookFactory {
                name: "shift_ts",
                description: "Shift timestamps",
                flags: HookFlags::NODE_READ | HookFlags::PATH,
                priority: 99,
                make: || Box::new(crate::hook::ShiftTimestampHook::default()),
            },
            HookFactory {
                name: "ebm",
                description: "Energy metric over voltage/current pairs",
                flags: rw_path,
                priority: 99,
                make: || Box::new(crate::hook::EbmHook::default()),
            },
        ],
        formats: vec![
            FormatFactory {
                name: "villas.binary",
                description: "Compact binary framing",
                make: || Box::new(crate::format::BinaryFormat),
            },
            FormatFactory {
                name: "json",
                description: "Newline-framed JSON objects",
                make: || Box::new(crate::format::JsonFormat),
            },
            FormatFactory {
                name: "villas.human",
                description: "Human-readable text columns",
                make: || Box::new(crate::format::HumanFormat::default()),
            },
        ],
        api: crate::api::factories(),
    }
}
