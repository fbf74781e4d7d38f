use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use arrayvec::ArrayVec;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::memory::MemoryType;
use crate::pool::Pool;
use crate::sample::{SampleFlags, SamplePtr};
use crate::signal::SignalList;
use crate::stats::{Metric, Stats};
use crate::timing::Timespec;

pub use loopback::{InternalLoopback, Loopback};

mod loopback;

#[cfg(test)]
mod test;

/// Maximum number of descriptors a node may expose for polling.
pub const MAX_POLL_FDS: usize = 8;

pub type PollFds = ArrayVec<RawFd, MAX_POLL_FDS>;

/// Lifecycle state of nodes, paths and hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Initialized = 0,
    Parsed,
    Checked,
    Prepared,
    Started,
    Stopped,
    Paused,
    PendingConnect,
    Destroyed,
}

impl From<u8> for State {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Initialized,
            1 => Self::Parsed,
            2 => Self::Checked,
            3 => Self::Prepared,
            4 => Self::Started,
            5 => Self::Stopped,
            6 => Self::Paused,
            7 => Self::PendingConnect,
            _ => Self::Destroyed,
        }
    }
}

/// Atomic [`State`] cell; I/O threads observe transitions made by the
/// control thread without locks.
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> State {
        self.0.load(Ordering::Acquire).into()
    }

    pub fn set(&self, state: State) {
        self.0.store(state as u8, Ordering::Release);
    }
}

bitflags::bitflags! {
    /// Properties of a node type, carried by its factory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u32 {
        /// Not user-instantiable; created by the gateway itself and started
        /// before all other nodes.
        const INTERNAL = 1 << 0;
        /// Excluded from capability listings.
        const HIDDEN = 1 << 1;
    }
}

/// Behavior a concrete node type implements.
///
/// `parse` runs once while the instance is still exclusively owned; all
/// later entry points take `&self` and synchronize internally, because the
/// hot path is driven from path threads while lifecycle transitions come
/// from the control thread.
pub trait NodeKind: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn parse(&mut self, json: &Value, super_uuid: &Uuid) -> Result<()> {
        let _ = (json, super_uuid);
        Ok(())
    }

    /// Validate configuration coherence before any resource is allocated.
    fn check(&self, node: &Node) -> Result<()> {
        let _ = node;
        Ok(())
    }

    /// Allocate queues, threads and per-instance resources. Must succeed
    /// completely or leave nothing behind.
    fn prepare(&self, node: &Node) -> Result<()> {
        let _ = node;
        Ok(())
    }

    fn start(&self, node: &Node) -> Result<()> {
        let _ = node;
        Ok(())
    }

    fn stop(&self, node: &Node) -> Result<()> {
        let _ = node;
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        Ok(())
    }

    fn restart(&self, node: &Node) -> Result<()> {
        self.stop(node)?;
        self.start(node)
    }

    /// Swap input and output, for symmetric protocols.
    fn reverse(&self) -> Result<()> {
        Err(Error::runtime("node type does not support reverse"))
    }

    /// Fill up to `cnt` fresh samples from `pool` into `out`.
    ///
    /// Must set `length` and flags, `sequence` and `ts.origin` when the
    /// protocol carries them, and always `ts.received`. May block; a return
    /// of 0 after [`stop`][Self::stop] is the shutdown sentinel.
    fn read(&self, pool: &Arc<Pool>, out: &mut Vec<SamplePtr>, cnt: usize) -> Result<usize>;

    /// Consume samples contiguously from index 0; returns the count
    /// accepted. Does not release the caller's references.
    fn write(&self, smps: &[SamplePtr]) -> Result<usize>;

    /// Descriptors that become readable when [`read`][Self::read] would
    /// make progress. Empty means "always ready" (the path engine then must
    /// not poll this node).
    fn poll_fds(&self) -> PollFds {
        PollFds::new()
    }

    /// Descriptors for traffic-control configuration by external tooling.
    fn netem_fds(&self) -> PollFds {
        PollFds::new()
    }

    /// Override the pool's backing memory, e.g. for DMA-capable hardware.
    fn memory_type(&self) -> Option<Arc<dyn MemoryType>> {
        None
    }
}

/// Per-direction configuration of a node.
///
/// The hook chains configured here are instantiated where they run: the
/// input chain by the path source reading this node, the output chain by
/// each destination's writer thread.
pub struct NodeDirection {
    /// Max batch size for a single read/write call.
    pub vectorize: usize,
    /// Insert the fix/restart/drop hooks automatically (input side only).
    pub builtin_hooks: bool,
    signals: RwLock<Arc<SignalList>>,
    hook_config: Vec<Value>,
}

impl NodeDirection {
    fn parse(json: Option<&Value>) -> Result<Self> {
        let mut dir = Self {
            vectorize: 1,
            builtin_hooks: true,
            signals: RwLock::new(Arc::new(SignalList::new())),
            hook_config: vec![],
        };

        let Some(json) = json else {
            return Ok(dir);
        };

        if let Some(v) = json.get("vectorize").and_then(Value::as_u64) {
            if v == 0 {
                return Err(Error::config("vectorize", "must be at least 1"));
            }
            dir.vectorize = v as usize;
        }
        if let Some(b) = json.get("builtin").and_then(Value::as_bool) {
            dir.builtin_hooks = b;
        }
        if let Some(signals) = json.get("signals") {
            *dir.signals.write().unwrap() = Arc::new(SignalList::parse(signals)?);
        }
        if let Some(hooks) = json.get("hooks").and_then(Value::as_array) {
            dir.hook_config = hooks.clone();
        }

        Ok(dir)
    }

    pub fn signals(&self) -> Arc<SignalList> {
        Arc::clone(&self.signals.read().unwrap())
    }

    pub fn set_signals(&self, signals: Arc<SignalList>) {
        *self.signals.write().unwrap() = signals;
    }

    pub fn hook_config(&self) -> &[Value] {
        &self.hook_config
    }
}

/// A bidirectional endpoint.
///
/// Common state shared by all node types; the protocol behavior lives in
/// the boxed [`NodeKind`]. Nodes are shared as `Arc<Node>` between the
/// gateway, paths and mappings once parsed.
pub struct Node {
    name: String,
    uuid: Uuid,
    state: AtomicState,
    kind: Box<dyn NodeKind>,
    kind_flags: NodeFlags,
    pub input: NodeDirection,
    pub output: NodeDirection,
    pool: OnceLock<Arc<Pool>>,
    stats: Arc<Stats>,
    // Sequence counter for inputs whose protocol carries none.
    sequence: AtomicU64,
    // ts.origin of the previously read sample, for the gap metric.
    last_origin: Mutex<Option<Timespec>>,
}

impl Node {
    /// Construct and parse a node from its configuration object.
    pub fn from_config(name: &str, json: &Value, super_uuid: &Uuid) -> Result<Self> {
        let type_name = json
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::config(format!("nodes.{name}.type"), "missing node type"))?;

        let factory = crate::registry::lookup_node(type_name).ok_or_else(|| {
            Error::config(
                format!("nodes.{name}.type"),
                format!("unknown node type '{type_name}'"),
            )
        })?;
        if factory.flags.contains(NodeFlags::INTERNAL) {
            return Err(Error::config(
                format!("nodes.{name}.type"),
                format!("node type '{type_name}' is internal"),
            ));
        }

        let mut kind = (factory.make)();
        kind.parse(json, super_uuid)?;

        let mut node = Self::with_kind(name, kind, factory.flags, json, super_uuid)?;
        node.state.set(State::Parsed);
        Ok(node)
    }

    /// Assemble a node around an already-built kind, e.g. an internal
    /// loopback.
    pub fn with_kind(
        name: &str,
        kind: Box<dyn NodeKind>,
        kind_flags: NodeFlags,
        json: &Value,
        super_uuid: &Uuid,
    ) -> Result<Self> {
        let uuid = match json.get("uuid").and_then(Value::as_str) {
            Some(s) => Uuid::parse_str(s)
                .map_err(|_| Error::config(format!("nodes.{name}.uuid"), "malformed uuid"))?,
            None => Uuid::new_v5(super_uuid, name.as_bytes()),
        };

        Ok(Self {
            name: name.into(),
            uuid,
            state: AtomicState::new(State::Initialized),
            kind,
            kind_flags,
            input: NodeDirection::parse(json.get("in"))?,
            output: NodeDirection::parse(json.get("out"))?,
            pool: OnceLock::new(),
            stats: Arc::new(Stats::default()),
            sequence: AtomicU64::new(0),
            last_origin: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn kind(&self) -> &dyn NodeKind {
        self.kind.as_ref()
    }

    pub fn is_internal(&self) -> bool {
        self.kind_flags.contains(NodeFlags::INTERNAL)
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// The node's sample pool; available after prepare.
    pub fn pool(&self) -> &Arc<Pool> {
        self.pool.get().expect("node not prepared")
    }

    /// Next value of the node-scoped sequence counter.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        let state = self.state.get();
        if state != State::Parsed && state != State::Initialized {
            return Err(Error::runtime(format!(
                "node '{}' checked in state {state:?}",
                self.name
            )));
        }

        self.kind.check(self)?;
        self.state.set(State::Checked);
        Ok(())
    }

    /// Allocate the pool and let the kind set up its resources.
    pub fn prepare(&self) -> Result<()> {
        if self.state.get() != State::Checked {
            return Err(Error::runtime(format!(
                "node '{}' prepared before check",
                self.name
            )));
        }

        let samplelen = self
            .input
            .signals()
            .len()
            .max(self.output.signals().len())
            .max(crate::path::DEFAULT_SAMPLE_LEN);
        let count = (self.input.vectorize.max(self.output.vectorize) * 32).max(64);

        let mem = self
            .kind
            .memory_type()
            .unwrap_or_else(crate::memory::default_type);
        let pool = Pool::for_samples(count, samplelen, &mem)?;
        self.pool
            .set(pool)
            .map_err(|_| Error::runtime("node prepared twice"))?;

        self.kind.prepare(self)?;
        self.state.set(State::Prepared);
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        let state = self.state.get();
        if state != State::Prepared && state != State::Stopped {
            return Err(Error::runtime(format!(
                "node '{}' started in state {state:?}",
                self.name
            )));
        }

        self.kind.start(self)?;
        self.state.set(State::Started);
        tracing::info!(target: "node", "started node '{}'", self.name);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        if self.state.get() != State::Started && self.state.get() != State::Paused {
            return Ok(());
        }

        self.state.set(State::Stopped);
        self.kind.stop(self)?;
        tracing::info!(target: "node", "stopped node '{}'", self.name);
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        if self.state.get() != State::Started {
            return Err(Error::runtime("node not started"));
        }
        self.kind.pause()?;
        self.state.set(State::Paused);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        if self.state.get() != State::Paused {
            return Err(Error::runtime("node not paused"));
        }
        self.kind.resume()?;
        self.state.set(State::Started);
        Ok(())
    }

    pub fn restart(&self) -> Result<()> {
        self.kind.restart(self)?;
        self.state.set(State::Started);
        Ok(())
    }

    /// Read a batch of up to `input.vectorize` samples into `out`.
    ///
    /// Tracks the one-way-delay and gap metrics for every sample that
    /// carries timestamps. Returns 0 when stopped.
    pub fn read(&self, out: &mut Vec<SamplePtr>) -> Result<usize> {
        if self.state.get() != State::Started {
            return Ok(0);
        }

        let first = out.len();
        let cnt = self.kind.read(self.pool(), out, self.input.vectorize)?;

        let signals = self.input.signals();
        let mut last_origin = self.last_origin.lock().unwrap();
        for smp in &mut out[first..first + cnt] {
            if !smp.has(SampleFlags::HAS_SIGNALS) && !signals.is_empty() {
                smp.set_signals(Arc::downgrade(&signals));
            }
            if smp.has(SampleFlags::HAS_TS_ORIGIN) {
                if smp.has(SampleFlags::HAS_TS_RECEIVED) {
                    self.stats
                        .update(Metric::Owd, smp.ts.received.delta(&smp.ts.origin));
                }
                if let Some(prev) = *last_origin {
                    self.stats.update(Metric::Gap, smp.ts.origin.delta(&prev));
                }
                *last_origin = Some(smp.ts.origin);
            }
        }

        Ok(cnt)
    }

    /// Write a batch; returns the count accepted.
    pub fn write(&self, smps: &[SamplePtr]) -> Result<usize> {
        if self.state.get() != State::Started {
            return Ok(0);
        }

        let cnt = smps.len().min(self.output.vectorize.max(1));
        self.kind.write(&smps[..cnt])
    }

    pub fn poll_fds(&self) -> PollFds {
        self.kind.poll_fds()
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "uuid": self.uuid.to_string(),
            "type": self.kind.type_name(),
            "state": format!("{:?}", self.state()),
        })
    }
}

/// The nodes of one gateway instance, looked up by name or index.
#[derive(Default)]
pub struct NodeList(Vec<Arc<Node>>);

impl NodeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: Arc<Node>) {
        self.0.push(node);
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<Node>> {
        self.0.iter().find(|n| n.name() == name)
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Node>> {
        self.0.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|n| n.name() == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.0.iter()
    }
}
