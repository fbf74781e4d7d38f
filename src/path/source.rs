use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::Result;
use crate::hook::builtin::{DropHook, FixHook, RestartHook};
use crate::hook::builtin::{DROP_PRIORITY, FIX_PRIORITY, RESTART_PRIORITY};
use crate::hook::{HookChain, HookFlags};
use crate::node::Node;
use crate::sample::{Sample, SamplePtr};

/// One node feeding a path.
///
/// The master variant reads from the node itself, runs the node's input
/// hook chain and fans the received samples out to the internal loopbacks
/// of any secondary sources sharing this node. A secondary reads from its
/// dedicated loopback instead and skips the hooks, which already ran on the
/// master side.
pub struct PathSource {
    /// Node the read loop drains: the real node (master) or the internal
    /// loopback mate (secondary).
    read_node: Arc<Node>,
    /// Node this source represents in mappings and statistics.
    map_node: Arc<Node>,
    /// Whether this source participates in the path's trigger mask.
    pub masked: bool,
    hooks: HookChain,
    /// Loopback write sides of the secondaries of this node (master only).
    secondaries: Vec<Arc<Node>>,
}

impl PathSource {
    /// Build the master source for `node`, with the input hook chain
    /// (builtins first, then the node's configured hooks).
    pub fn master(
        node: Arc<Node>,
        restart_trigger: Arc<AtomicBool>,
        chain_reset: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut hooks = HookChain::new();

        if node.input.builtin_hooks {
            hooks.add(
                Box::new(FixHook::with_node(Arc::clone(&node))),
                FIX_PRIORITY,
                true,
            );
            hooks.add(
                Box::new(RestartHook::with_triggers(vec![
                    Arc::clone(&restart_trigger),
                    Arc::clone(&chain_reset),
                ])),
                RESTART_PRIORITY,
                true,
            );
            hooks.add(
                Box::new(DropHook::with_reset(
                    Arc::clone(node.stats()),
                    chain_reset,
                )),
                DROP_PRIORITY,
                true,
            );
        }

        hooks.parse(node.input.hook_config(), HookFlags::NODE_READ)?;

        Ok(Self {
            read_node: Arc::clone(&node),
            map_node: node,
            masked: true,
            hooks,
            secondaries: vec![],
        })
    }

    /// Build a secondary source: reads `loopback`, represents `original`.
    pub fn secondary(original: Arc<Node>, loopback: Arc<Node>) -> Self {
        Self {
            read_node: loopback,
            map_node: original,
            masked: true,
            hooks: HookChain::new(),
            secondaries: vec![],
        }
    }

    pub fn add_secondary(&mut self, loopback: Arc<Node>) {
        self.secondaries.push(loopback);
    }

    pub fn read_node(&self) -> &Arc<Node> {
        &self.read_node
    }

    pub fn map_node(&self) -> &Arc<Node> {
        &self.map_node
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.hooks.check()?;
        let signals = self.hooks.prepare(self.read_node.input.signals())?;
        // A transforming hook (e.g. cast) rewrites the direction's typing.
        self.map_node.input.set_signals(signals);
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.hooks.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.hooks.stop()
    }

    pub fn restart_hooks(&mut self) {
        self.hooks.restart();
    }

    pub fn periodic(&mut self) {
        self.hooks.periodic();
    }

    /// Read one batch, run the input chain sample by sample and fan out to
    /// the secondaries. Samples surviving the chain are appended to `out`.
    ///
    /// Returns `false` when the node signalled shutdown.
    pub fn read(&mut self, out: &mut Vec<SamplePtr>) -> Result<bool> {
        let mut batch = vec![];
        let cnt = match self.read_node.read(&mut batch) {
            Ok(cnt) => cnt,
            // Transient node errors are counted and survived; only fatal
            // ones stop the owning path.
            Err(e) if !e.is_fatal() => {
                self.map_node
                    .stats()
                    .counters
                    .errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::warn!(
                    target: "path",
                    "read from '{}' failed: {e}",
                    self.map_node.name()
                );
                return Ok(true);
            }
            Err(e) => return Err(e),
        };
        if cnt == 0 {
            return Ok(false);
        }

        for mut smp in batch {
            use crate::hook::Reason;
            match self.hooks.process(&mut smp) {
                Reason::Ok => {
                    self.fan_out(smp);
                    out.push(smp);
                }
                Reason::SkipSample => {
                    Sample::decref(smp);
                    self.map_node
                        .stats()
                        .counters
                        .skipped
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                Reason::StopProcessing => {
                    Sample::decref(smp);
                    break;
                }
                Reason::Error => {
                    Sample::decref(smp);
                    return Err(crate::error::Error::runtime(format!(
                        "input hook chain of node '{}' failed",
                        self.map_node.name()
                    )));
                }
            }
        }

        Ok(true)
    }

    fn fan_out(&self, smp: SamplePtr) {
        for secondary in &self.secondaries {
            // The loopback write side increfs for its queue.
            if let Err(e) = secondary.kind().write(&[smp]) {
                tracing::warn!(
                    target: "path",
                    "fan-out to '{}' failed: {e}",
                    secondary.name()
                );
            }
        }
    }
}
