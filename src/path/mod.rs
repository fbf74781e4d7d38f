use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use libc::epoll_event;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ffi::syscall::{epoll_add, epoll_create1, epoll_wait, eventfd, write_u64};
use crate::hook::{HookChain, HookFlags, Reason};
use crate::mapping::MappingList;
use crate::memory;
use crate::node::{AtomicState, NodeList, State};
use crate::pool::Pool;
use crate::sample::{Sample, SampleFlags, SamplePtr};
use crate::signal::SignalList;
use crate::stats::{Metric, Stats};
use crate::timing::{Task, Timespec};

pub use destination::PathDestination;
pub use source::PathSource;

mod destination;
mod source;

#[cfg(test)]
mod test;

/// Sample length a pool is provisioned for when the signal description
/// leaves it open.
pub const DEFAULT_SAMPLE_LEN: usize = 64;

/// Default length of destination queues.
pub const DEFAULT_QUEUELEN: usize = 1024;

// epoll token space: sources use their index, control fds sit on top.
const TOKEN_STOP: u64 = u64::MAX;
const TOKEN_TIMER: u64 = u64::MAX - 1;

// Drive hook periodic() roughly once a second from the path thread.
const PERIODIC_INTERVAL: f64 = 1.0;

/// When the path emits relative to its trigger mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathMode {
    /// Emit whenever any masked source produced a new sample.
    #[default]
    Any,
    /// Emit once every masked source produced since the last emission.
    All,
}

/// A directed flow from one or more source nodes through a hook chain to a
/// set of destination nodes. Owns one thread driving the mux/hook pipeline.
pub struct Path {
    name: String,
    uuid: Uuid,
    state: Arc<AtomicState>,

    mode: PathMode,
    rate: f64,
    poll: Option<bool>,
    queuelen: usize,
    drop_new: bool,
    pub enabled: bool,
    /// Keep the sequence numbers of the triggering source instead of
    /// assigning a path-local counter.
    original_sequence_no: bool,
    mask_names: Option<Vec<String>>,

    out_names: Vec<String>,
    hook_config: Vec<Value>,

    mappings: MappingList,
    signals: Arc<SignalList>,
    destinations: Vec<Arc<PathDestination>>,
    stats: Arc<Stats>,
    restart_flag: Arc<AtomicBool>,
    stop_fd: Arc<File>,

    runner: Mutex<Option<PathRunner>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Path {
    /// Parse one entry of the `paths` configuration array.
    pub fn parse(json: &Value, index: usize, super_uuid: &Uuid) -> Result<Self> {
        let at = |field: &str| format!("paths[{index}].{field}");

        let name = format!("path{index}");
        let uuid = match json.get("uuid").and_then(Value::as_str) {
            Some(s) => Uuid::parse_str(s)
                .map_err(|_| Error::config(at("uuid"), "malformed uuid"))?,
            None => Uuid::new_v5(super_uuid, name.as_bytes()),
        };

        let in_config = json
            .get("in")
            .ok_or_else(|| Error::config(at("in"), "path has no sources"))?;
        let mappings = MappingList::parse(in_config)?;

        let out_names = match json.get("out") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(list)) => list
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(String::from)
                        .ok_or_else(|| Error::config(at("out"), "expected node name"))
                })
                .collect::<Result<_>>()?,
            Some(_) => return Err(Error::config(at("out"), "expected string or array")),
            None => vec![],
        };

        let mode = match json.get("mode").and_then(Value::as_str) {
            Some("any") | None => PathMode::Any,
            Some("all") => PathMode::All,
            Some(other) => {
                return Err(Error::config(at("mode"), format!("unknown mode '{other}'")))
            }
        };

        let rate = json.get("rate").and_then(Value::as_f64).unwrap_or(0.0);
        if rate < 0.0 {
            return Err(Error::config(at("rate"), "must not be negative"));
        }

        let queuelen = json
            .get("queuelen")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_QUEUELEN as u64) as usize;
        if queuelen == 0 {
            return Err(Error::config(at("queuelen"), "must be at least 1"));
        }

        let mask_names = match json.get("mask") {
            None => None,
            Some(Value::Array(list)) => Some(
                list.iter()
                    .map(|v| {
                        v.as_str()
                            .map(String::from)
                            .ok_or_else(|| Error::config(at("mask"), "expected node name"))
                    })
                    .collect::<Result<_>>()?,
            ),
            Some(_) => return Err(Error::config(at("mask"), "expected array")),
        };

        Ok(Self {
            name,
            uuid,
            state: Arc::new(AtomicState::new(State::Parsed)),
            mode,
            rate,
            poll: json.get("poll").and_then(Value::as_bool),
            queuelen,
            drop_new: json
                .get("overrun")
                .and_then(Value::as_str)
                .map(|s| s == "drop-new")
                .unwrap_or(false),
            enabled: json.get("enabled").and_then(Value::as_bool).unwrap_or(true),
            original_sequence_no: json
                .get("original_sequence_no")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            mask_names,
            out_names,
            hook_config: json
                .get("hooks")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            mappings,
            signals: Arc::new(SignalList::new()),
            destinations: vec![],
            stats: Arc::new(Stats::default()),
            restart_flag: Arc::new(AtomicBool::new(false)),
            stop_fd: Arc::new(eventfd(0, libc::EFD_CLOEXEC)?),
            runner: Mutex::new(None),
            thread: Mutex::new(None),
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

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Muxed output signal description; valid after prepare.
    pub fn signals(&self) -> &Arc<SignalList> {
        &self.signals
    }

    pub fn mappings(&self) -> &MappingList {
        &self.mappings
    }

    pub fn restart_flag(&self) -> &Arc<AtomicBool> {
        &self.restart_flag
    }

    /// Effective polling decision: explicit config, else poll when more
    /// than one source or a rate is set.
    fn polling(&self, n_sources: usize) -> bool {
        self.poll.unwrap_or(n_sources > 1 || self.rate > 0.0)
    }

    pub fn check(&self) -> Result<()> {
        if self.mappings.is_empty() {
            return Err(Error::config("path.in", "path has no sources"));
        }
        if self.out_names.is_empty() {
            return Err(Error::config("path.out", "path has no destinations"));
        }
        if !self.polling(self.mappings.len()) && self.mappings.len() > 1 {
            return Err(Error::config(
                "path.poll",
                "multiple sources require polling",
            ));
        }
        self.state.set(State::Checked);
        Ok(())
    }

    /// Resolve mappings and destinations and assemble the runner.
    ///
    /// `sources` are built by the gateway, which knows which paths share a
    /// node and wires the master/secondary split.
    pub fn prepare(&mut self, mut sources: Vec<PathSource>, nodes: &NodeList) -> Result<()> {
        if self.state.get() != State::Checked {
            return Err(Error::runtime("path prepared before check"));
        }

        // Input chains may transform a node's signal description (cast);
        // run them first so mappings resolve against the final typing.
        for source in &mut sources {
            source.prepare()?;
        }

        let muxed_len = self.mappings.prepare(nodes)?;

        if let Some(mask) = &self.mask_names {
            for name in mask {
                if !sources.iter().any(|s| s.map_node().name() == name) {
                    return Err(Error::config(
                        "path.mask",
                        format!("'{name}' is not a source of this path"),
                    ));
                }
            }
            for source in &mut sources {
                source.masked = mask.iter().any(|n| n == source.map_node().name());
            }
        }

        let mut hooks = HookChain::new();
        hooks.parse(&self.hook_config, HookFlags::PATH)?;
        hooks.check()?;
        let muxed_signals = Arc::new(self.mappings.to_signals());
        self.signals = hooks.prepare(muxed_signals)?;

        let pool = Pool::for_samples(
            self.queuelen + 64,
            muxed_len.max(DEFAULT_SAMPLE_LEN),
            &memory::default_type(),
        )?;

        self.destinations.clear();
        for name in &self.out_names {
            let node = nodes.by_name(name).ok_or_else(|| {
                Error::config("path.out", format!("unknown destination node '{name}'"))
            })?;
            self.destinations
                .push(PathDestination::new(Arc::clone(node), self.queuelen, self.drop_new)?);
        }

        let poll = self.polling(sources.len());
        let n_sources = sources.len();

        *self.runner.lock().unwrap() = Some(PathRunner {
            name: self.name.clone(),
            sources,
            hooks,
            mappings: self.mappings.clone(),
            pool,
            signals: Arc::clone(&self.signals),
            destinations: self.destinations.clone(),
            mode: self.mode,
            rate: self.rate,
            poll,
            original_sequence_no: self.original_sequence_no,
            restart_flag: Arc::clone(&self.restart_flag),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
            stop_fd: Arc::clone(&self.stop_fd),
            sequence: 0,
            received: vec![false; n_sources],
            last_origin: None,
            muxed_len,
        });

        self.state.set(State::Prepared);
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        if self.state.get() != State::Prepared {
            return Err(Error::runtime(format!(
                "path '{}' started before prepare",
                self.name
            )));
        }

        let mut runner = self
            .runner
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::runtime("path started twice"))?;

        for destination in &self.destinations {
            destination.start()?;
        }

        runner.hooks.start()?;
        for source in &mut runner.sources {
            source.start()?;
        }

        self.state.set(State::Started);
        let handle = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || runner.run())
            .map_err(Error::System)?;
        *self.thread.lock().unwrap() = Some(handle);

        tracing::info!(target: "path", "started path '{}'", self.name);
        Ok(())
    }

    /// Request the path thread to wind down. Blocking sources return once
    /// their node is stopped; [`join`][Self::join] afterwards.
    pub fn stop(&self) {
        if self.state.get() != State::Started {
            return;
        }
        self.state.set(State::Stopped);
        let _ = write_u64(&self.stop_fd, 1);
    }

    /// Join the path thread and stop the destinations.
    pub fn join(&self) {
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        for destination in &self.destinations {
            destination.stop();
        }
        tracing::info!(target: "path", "stopped path '{}'", self.name);
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "uuid": self.uuid.to_string(),
            "state": format!("{:?}", self.state()),
            "mode": match self.mode { PathMode::Any => "any", PathMode::All => "all" },
            "rate": self.rate,
            "out": self.out_names,
        })
    }
}

// The per-thread half of a path: everything the mux/hook pipeline touches.
struct PathRunner {
    name: String,
    sources: Vec<PathSource>,
    hooks: HookChain,
    mappings: MappingList,
    pool: Arc<Pool>,
    signals: Arc<SignalList>,
    destinations: Vec<Arc<PathDestination>>,
    mode: PathMode,
    rate: f64,
    poll: bool,
    original_sequence_no: bool,
    restart_flag: Arc<AtomicBool>,
    state: Arc<AtomicState>,
    stats: Arc<Stats>,
    stop_fd: Arc<File>,
    sequence: u64,
    received: Vec<bool>,
    last_origin: Option<Timespec>,
    muxed_len: usize,
}

impl PathRunner {
    fn run(&mut self) {
        let Some(mut held) = self.pool.get() else {
            tracing::error!(target: "path", "'{}': pool exhausted at start", self.name);
            self.state.set(State::Stopped);
            return;
        };

        // Untouched slots carry the signal's initial value until a source
        // contributes.
        held.length = self.muxed_len.min(held.capacity()) as u16;
        for (i, slot) in held.data_mut().iter_mut().enumerate() {
            *slot = match self.signals.get(i) {
                Some(sig) => sig.init,
                None => crate::signal::SignalData::nan(),
            };
        }
        held.flags = SampleFlags::HAS_DATA;

        let result = if self.poll {
            self.run_polled(&mut held)
        } else {
            self.run_blocking(&mut held)
        };

        if let Err(e) = result {
            tracing::error!(target: "path", "'{}' failed: {e}", self.name);
        }
        self.state.set(State::Stopped);

        for source in &mut self.sources {
            let _ = source.stop();
        }
        let _ = self.hooks.stop();
        Sample::decref(held);
    }

    // Mode 1: one source, the thread blocks inside the node's read.
    fn run_blocking(&mut self, held: &mut SamplePtr) -> Result<()> {
        let mut last_periodic = Timespec::mono_now();

        while self.state.get() == State::Started {
            let mut batch = vec![];
            if !self.sources[0].read(&mut batch)? {
                if self.sources[0].read_node().state() == State::Paused {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    continue;
                }
                break; // shutdown sentinel from the node
            }
            self.process_batch(0, batch, held);

            let now = Timespec::mono_now();
            if now.delta(&last_periodic) >= PERIODIC_INTERVAL {
                self.periodic();
                last_periodic = now;
            }
        }
        Ok(())
    }

    // Modes 2 and 3: readiness-driven over the union of source descriptors,
    // with a timer tick taking over emission when a rate is set.
    fn run_polled(&mut self, held: &mut SamplePtr) -> Result<()> {
        let epoll = epoll_create1(libc::EPOLL_CLOEXEC)?;
        epoll_add(&epoll, std::os::fd::AsRawFd::as_raw_fd(&*self.stop_fd), TOKEN_STOP)?;

        for (i, source) in self.sources.iter().enumerate() {
            let fds = source.read_node().poll_fds();
            if fds.is_empty() {
                return Err(Error::runtime(format!(
                    "source '{}' exposes no poll descriptor",
                    source.map_node().name()
                )));
            }
            for fd in fds {
                epoll_add(&epoll, fd, i as u64)?;
            }
        }

        let timer = if self.rate > 0.0 {
            let task = Task::periodic()?;
            task.set_rate(self.rate)?;
            epoll_add(&epoll, task.fd(), TOKEN_TIMER)?;
            Some(task)
        } else {
            None
        };

        let mut events = [epoll_event { events: 0, u64: 0 }; 16];
        let mut last_periodic = Timespec::mono_now();

        'outer: while self.state.get() == State::Started {
            let ready = epoll_wait(&epoll, &mut events, 1000)?;
            let ready: Vec<u64> = ready.iter().map(|e| e.u64).collect();

            for token in ready {
                match token {
                    TOKEN_STOP => break 'outer,
                    TOKEN_TIMER => {
                        if let Some(task) = &timer {
                            let ticks = task.wait()?;
                            if ticks > 1 {
                                tracing::debug!(
                                    target: "path",
                                    "'{}' missed {} timer ticks",
                                    self.name,
                                    ticks - 1
                                );
                            }
                        }
                        // Held-last-value semantics: the tick emits the
                        // current mux state no matter what arrived.
                        self.emit(held);
                    }
                    i => {
                        let i = i as usize;
                        let mut batch = vec![];
                        match self.sources[i].read(&mut batch) {
                            Ok(true) => self.process_batch(i, batch, held),
                            Ok(false) => break 'outer,
                            Err(e) => return Err(e),
                        }
                    }
                }
            }

            let now = Timespec::mono_now();
            if now.delta(&last_periodic) >= PERIODIC_INTERVAL {
                self.periodic();
                last_periodic = now;
            }
        }

        Ok(())
    }

    fn process_batch(&mut self, source_idx: usize, batch: Vec<SamplePtr>, held: &mut SamplePtr) {
        for smp in batch {
            if self.restart_flag.swap(false, Ordering::AcqRel) {
                self.restart();
            }

            let map_node = Arc::clone(self.sources[source_idx].map_node());
            self.mappings.remap_node(held, &smp, &map_node);

            held.sequence = smp.sequence;
            if smp.has(SampleFlags::HAS_TS_ORIGIN) {
                self.last_origin = Some(smp.ts.origin);
            }
            Sample::decref(smp);

            self.received[source_idx] = true;

            // With a rate set, emission belongs to the timer alone.
            if self.rate == 0.0 && self.triggered(source_idx) {
                self.emit(held);
            }
        }
    }

    fn triggered(&self, source_idx: usize) -> bool {
        if !self.sources[source_idx].masked {
            return false;
        }
        match self.mode {
            PathMode::Any => true,
            PathMode::All => self
                .sources
                .iter()
                .zip(&self.received)
                .all(|(s, &r)| !s.masked || r),
        }
    }

    fn emit(&mut self, held: &mut SamplePtr) {
        let Some(mut out) = self.pool.get() else {
            self.stats.counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(target: "path", "'{}': pool exhausted, dropping emission", self.name);
            return;
        };

        // The emission consumes the current round regardless of what the
        // hooks decide below.
        self.received.fill(false);

        out.copy_from(held);
        out.set_signals(Arc::downgrade(&self.signals));

        out.sequence = if self.original_sequence_no {
            held.sequence
        } else {
            let seq = self.sequence;
            self.sequence += 1;
            seq
        };
        out.flags |= SampleFlags::HAS_SEQUENCE | SampleFlags::HAS_DATA;

        if let Some(origin) = self.last_origin {
            out.ts.origin = origin;
            out.flags |= SampleFlags::HAS_TS_ORIGIN;
        }
        out.ts.received = Timespec::now();
        out.flags |= SampleFlags::HAS_TS_RECEIVED;

        if out.has(SampleFlags::HAS_TS_ORIGIN) {
            self.stats
                .update(Metric::Owd, out.ts.received.delta(&out.ts.origin));
        }

        match self.hooks.process(&mut out) {
            Reason::Ok => {
                for destination in &self.destinations {
                    destination.enqueue(out);
                }
                Sample::decref(out);
            }
            Reason::SkipSample | Reason::StopProcessing => {
                Sample::decref(out);
                self.stats.counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Reason::Error => {
                Sample::decref(out);
                tracing::error!(target: "path", "'{}': hook chain failed, stopping", self.name);
                self.state.set(State::Stopped);
            }
        }
    }

    fn restart(&mut self) {
        tracing::info!(target: "path", "restarting path '{}'", self.name);
        for source in &mut self.sources {
            source.restart_hooks();
        }
        self.hooks.restart();
        self.stats.reset();
        self.sequence = 0;
        self.received.fill(false);
        self.last_origin = None;
    }

    fn periodic(&mut self) {
        for source in &mut self.sources {
            source.periodic();
        }
        self.hooks.periodic();
    }
}
