use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde_json::Value;
use uuid::Uuid;

use crate::api::{ApiRequest, Method};
use crate::error::{Error, Result};
use crate::log::LogConfig;
use crate::node::{AtomicState, InternalLoopback, Node, NodeList, State};
use crate::path::{Path, PathSource, DEFAULT_QUEUELEN};
use crate::timing::Task;


/// Owner of every node, path and hook instance of one gateway process.
///
/// Drives the strict lifecycle `parse → check → prepare → start`, with stop
/// as the exact reverse. An error at any stage aborts start-up and unwinds
/// already-started components in reverse order.
pub struct Gateway {
    uuid: Uuid,
    state: AtomicState,
    nodes: NodeList,
    paths: Vec<Path>,
    stats_rate: f64,
    stats_stop: Arc<AtomicBool>,
    stats_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new() -> Self {
        crate::registry::init();

        Self {
            uuid: Uuid::new_v4(),
            state: AtomicState::new(State::Initialized),
            nodes: NodeList::new(),
            paths: vec![],
            stats_rate: 0.0,
            stats_stop: Arc::new(AtomicBool::new(false)),
            stats_thread: Mutex::new(None),
        }
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn nodes(&self) -> &NodeList {
        &self.nodes
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    /// Materialize nodes and paths from the top-level configuration object.
    ///
    /// Include expansion and environment substitution happen in the
    /// external config loader; this expects plain JSON.
    pub fn parse(&mut self, json: &Value) -> Result<()> {
        if let Some(logging) = json.get("logging") {
            let config: LogConfig = serde_json::from_value(logging.clone())
                .map_err(|e| Error::config("logging", e.to_string()))?;
            crate::log::init(&config)?;
        }

        if let Some(uuid) = json.get("uuid").and_then(Value::as_str) {
            self.uuid =
                Uuid::parse_str(uuid).map_err(|_| Error::config("uuid", "malformed uuid"))?;
        }

        if let Some(stats) = json.get("stats").and_then(Value::as_f64) {
            self.stats_rate = stats;
        }

        if let Some(nodes) = json.get("nodes") {
            let nodes = nodes
                .as_object()
                .ok_or_else(|| Error::config("nodes", "expected object"))?;
            for (name, config) in nodes {
                let node = Node::from_config(name, config, &self.uuid)?;
                self.nodes.push(Arc::new(node));
            }
        }

        if let Some(paths) = json.get("paths") {
            let paths = paths
                .as_array()
                .ok_or_else(|| Error::config("paths", "expected array"))?;
            for (index, config) in paths.iter().enumerate() {
                self.paths.push(Path::parse(config, index, &self.uuid)?);
            }
        }

        self.state.set(State::Parsed);
        Ok(())
    }

    pub fn check(&self) -> Result<()> {
        if self.state.get() != State::Parsed {
            return Err(Error::runtime("gateway checked before parse"));
        }

        for node in self.nodes.iter() {
            node.check()?;
        }
        for path in &self.paths {
            if path.enabled {
                path.check()?;
            }
        }

        self.state.set(State::Checked);
        Ok(())
    }

    /// Prepare nodes, wire the master/secondary source split for nodes
    /// shared between paths, then prepare the paths.
    pub fn prepare(&mut self) -> Result<()> {
        if self.state.get() != State::Checked {
            return Err(Error::runtime("gateway prepared before check"));
        }

        for node in self.nodes.iter() {
            node.prepare()?;
        }

        // Resolve mapping node names early so source wiring knows which
        // paths share a node.
        let mut source_names: Vec<Vec<String>> = vec![];
        for path in &self.paths {
            let mut names = vec![];
            for entry in path.mappings().iter() {
                if !names.contains(&entry.node_name) {
                    names.push(entry.node_name.clone());
                }
            }
            source_names.push(names);
        }

        // First user of a node becomes the master; later users read via a
        // dedicated internal loopback fed by the master.
        let mut sources: Vec<Vec<PathSource>> = vec![];
        let mut masters: HashMap<String, (usize, usize)> = HashMap::new();
        let mut loopback_id = 0;

        for (path_idx, path) in self.paths.iter().enumerate() {
            let mut path_sources = vec![];

            if path.enabled {
                for name in &source_names[path_idx] {
                    let node = Arc::clone(self.nodes.by_name(name).ok_or_else(|| {
                        Error::config("path.in", format!("unknown source node '{name}'"))
                    })?);

                    match masters.get(name) {
                        None => {
                            masters.insert(name.clone(), (path_idx, path_sources.len()));
                            path_sources.push(PathSource::master(
                                node,
                                Arc::clone(path.restart_flag()),
                                Arc::new(AtomicBool::new(false)),
                            )?);
                        }
                        Some(&(master_path, master_idx)) => {
                            let loopback =
                                InternalLoopback::make_node(&node, loopback_id, DEFAULT_QUEUELEN)?;
                            loopback_id += 1;

                            sources[master_path][master_idx]
                                .add_secondary(Arc::clone(&loopback));
                            self.nodes.push(Arc::clone(&loopback));

                            path_sources.push(PathSource::secondary(node, loopback));
                        }
                    }
                }
            }

            sources.push(path_sources);
        }

        for (path, path_sources) in self.paths.iter_mut().zip(sources) {
            if path.enabled {
                path.prepare(path_sources, &self.nodes)?;
            }
        }

        self.state.set(State::Prepared);
        Ok(())
    }

    /// Start everything in dependency order: internal nodes, then all other
    /// nodes, then paths. Rolls back in reverse on the first error.
    pub fn start(&self) -> Result<()> {
        if self.state.get() != State::Prepared {
            return Err(Error::runtime("gateway started before prepare"));
        }

        let mut started_nodes: Vec<&Arc<Node>> = vec![];
        let mut started_paths: Vec<&Path> = vec![];

        let order = self
            .nodes
            .iter()
            .filter(|n| n.is_internal())
            .chain(self.nodes.iter().filter(|n| !n.is_internal()));

        let result: Result<()> = (|| {
            for node in order {
                node.start()?;
                started_nodes.push(node);
            }
            for path in self.paths.iter().filter(|p| p.enabled) {
                path.start()?;
                started_paths.push(path);
            }
            Ok(())
        })();

        if let Err(e) = result {
            tracing::error!(target: "gateway", "start-up failed, unwinding: {e}");
            for path in started_paths.iter().rev() {
                path.stop();
            }
            for node in started_nodes.iter().rev() {
                let _ = node.stop();
            }
            for path in started_paths.iter().rev() {
                path.join();
            }
            return Err(e);
        }

        self.start_stats_task();
        self.state.set(State::Started);
        tracing::info!(target: "gateway", "gateway started");
        Ok(())
    }

    /// Stop in exactly the reverse order of start. Path threads blocked in
    /// a node read return once their node stops; they are joined last.
    pub fn stop(&self) -> Result<()> {
        if self.state.get() != State::Started {
            return Ok(());
        }

        self.stop_stats_task();

        for path in self.paths.iter().filter(|p| p.enabled).rev() {
            path.stop();
        }

        let order = self
            .nodes
            .iter()
            .filter(|n| !n.is_internal())
            .chain(self.nodes.iter().filter(|n| n.is_internal()));
        for node in order {
            let _ = node.stop();
        }

        for path in self.paths.iter().filter(|p| p.enabled).rev() {
            path.join();
        }

        self.state.set(State::Stopped);
        tracing::info!(target: "gateway", "gateway stopped");
        Ok(())
    }

    /// Dispatch a control-plane request to a registered handler.
    pub fn handle_api(&self, name: &str, method: Method, body: &Value) -> Result<Value> {
        let factory = crate::registry::lookup_api(name)
            .ok_or_else(|| Error::BadRequest(format!("no api endpoint '{name}'")))?;
        let handler: Box<dyn ApiRequest> = (factory.make)();
        handler.handle(self, method, body)
    }

    fn start_stats_task(&self) {
        if self.stats_rate <= 0.0 {
            return;
        }

        self.stats_stop.store(false, Ordering::Release);
        let stop = Arc::clone(&self.stats_stop);
        let rate = self.stats_rate;

        // Snapshot what the logger needs; the task only reads.
        let stats: Vec<(String, Arc<crate::stats::Stats>)> = self
            .nodes
            .iter()
            .map(|n| (n.name().to_string(), Arc::clone(n.stats())))
            .chain(
                self.paths
                    .iter()
                    .map(|p| (p.name().to_string(), Arc::clone(p.stats()))),
            )
            .collect();

        let handle = std::thread::Builder::new()
            .name("stats".into())
            .spawn(move || {
                let Ok(task) = Task::periodic() else {
                    return;
                };
                if task.set_rate(rate).is_err() {
                    return;
                }

                while !stop.load(Ordering::Acquire) {
                    if task.wait().is_err() {
                        break;
                    }
                    for (name, stats) in &stats {
                        tracing::debug!(
                            target: "stats",
                            "{name}: {}",
                            stats.to_json()
                        );
                    }
                }
            });

        if let Ok(handle) = handle {
            *self.stats_thread.lock().unwrap() = Some(handle);
        }
    }

    fn stop_stats_task(&self) {
        self.stats_stop.store(true, Ordering::Release);
        if let Some(handle) = self.stats_thread.lock().unwrap().take() {
            // The task wakes at the next tick and observes the flag.
            let _ = handle.join();
        }
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}
