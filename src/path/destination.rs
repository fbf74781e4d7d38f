use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::Result;
use crate::hook::{HookChain, HookFlags};
use crate::node::Node;
use crate::queue::signalled::OverrunPolicy;
use crate::queue::{Pushed, SignalledQueue, WakeMode};
use crate::sample::{Sample, SamplePtr};
use crate::stats::Metric;

/// One destination node of a path: a bounded queue plus a writer thread
/// that drains it in batches.
///
/// The queue decouples destinations from each other: a slow or blocked node
/// overruns its own queue (counted, oldest evicted by default) without ever
/// stalling the path thread or its sibling destinations.
pub struct PathDestination {
    node: Arc<Node>,
    queue: Arc<SignalledQueue<SamplePtr>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl PathDestination {
    pub fn new(node: Arc<Node>, queuelen: usize, drop_new: bool) -> Result<Arc<Self>> {
        let policy = if drop_new {
            OverrunPolicy::DropNew
        } else {
            OverrunPolicy::DropOld
        };
        let queue = SignalledQueue::new(queuelen, WakeMode::EventFd, policy)?;

        Ok(Arc::new(Self {
            node,
            queue: Arc::new(queue),
            writer: Mutex::new(None),
        }))
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Hand one sample to this destination. Takes its own reference; the
    /// caller keeps (and later releases) its own.
    pub fn enqueue(&self, smp: SamplePtr) {
        smp.incref();

        self.node
            .stats()
            .update(Metric::QueueOccupancy, self.queue.len() as f64);

        match self.queue.push(smp) {
            Pushed::Ok => {}
            Pushed::Evicted(old) => {
                Sample::decref_many(&old);
                self.count_overrun();
            }
            Pushed::Rejected(new) => {
                Sample::decref(new);
                self.count_overrun();
            }
        }
    }

    fn count_overrun(&self) {
        let n = self
            .node
            .stats()
            .counters
            .queue_overrun
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        if n.is_power_of_two() {
            tracing::warn!(
                target: "path",
                "queue of destination '{}' overran {n} times",
                self.node.name()
            );
        }
    }

    /// Spawn the writer thread. The node's output hook chain is built here
    /// and owned by the thread.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut hooks = HookChain::new();
        hooks.parse(self.node.output.hook_config(), HookFlags::NODE_WRITE)?;
        hooks.check()?;
        let out_signals = self.node.output.signals();
        hooks.prepare(out_signals)?;
        hooks.start()?;

        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("dst:{}", self.node.name()))
            .spawn(move || this.run(hooks))
            .map_err(crate::error::Error::System)?;

        *self.writer.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn run(&self, mut hooks: HookChain) {
        let vectorize = self.node.output.vectorize.max(1);

        loop {
            let Some(first) = self.queue.pop_blocking() else {
                break; // closed and drained
            };

            let mut batch = vec![first];
            while batch.len() < vectorize {
                match self.queue.pop() {
                    Some(smp) => batch.push(smp),
                    None => break,
                }
            }

            match hooks.process_list(&mut batch) {
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        target: "path",
                        "output hooks of '{}' failed: {e}",
                        self.node.name()
                    );
                    Sample::decref_many(&batch);
                    continue;
                }
            }

            let mut off = 0;
            while off < batch.len() {
                match self.node.write(&batch[off..]) {
                    Ok(0) => break, // node stopped or refuses input
                    Ok(n) => off += n,
                    Err(e) => {
                        self.node.stats().counters.errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            target: "path",
                            "write to '{}' failed: {e}",
                            self.node.name()
                        );
                        break;
                    }
                }
            }

            Sample::decref_many(&batch);
        }

        let _ = hooks.stop();
    }

    /// Close the queue and join the writer.
    pub fn stop(&self) {
        self.queue.close();

        if let Some(handle) = self.writer.lock().unwrap().take() {
            // The writer exits at the close sentinel once the node's write
            // call returns; stopping the node first bounds that wait.
            let _ = handle.join();
        }

        while let Some(smp) = self.queue.pop() {
            Sample::decref(smp);
        }
    }
}
