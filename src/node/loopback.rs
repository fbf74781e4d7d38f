use std::sync::{Arc, RwLock};

use serde_json::Value;
use uuid::Uuid;

use super::{Node, NodeKind, PollFds};
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::queue::signalled::OverrunPolicy;
use crate::queue::{Pushed, SignalledQueue, WakeMode};
use crate::sample::{Sample, SampleFlags, SamplePtr};
use crate::timing::Timespec;

const DEFAULT_QUEUELEN: usize = 1024;

// Shared behavior of both loopback kinds: a signalled queue whose write
// side increfs and whose read side hands out copies.
struct LoopbackCore {
    queuelen: usize,
    wake: WakeMode,
    queue: RwLock<Option<Arc<SignalledQueue<SamplePtr>>>>,
}

impl LoopbackCore {
    fn new(queuelen: usize, wake: WakeMode) -> Self {
        Self {
            queuelen,
            wake,
            queue: RwLock::new(None),
        }
    }

    fn start(&self) -> Result<()> {
        let queue = SignalledQueue::new(self.queuelen, self.wake, OverrunPolicy::DropOld)?;
        *self.queue.write().unwrap() = Some(Arc::new(queue));
        Ok(())
    }

    fn stop(&self) {
        if let Some(queue) = self.queue.write().unwrap().take() {
            queue.close();
            // Release references still parked in the queue.
            while let Some(smp) = queue.pop() {
                Sample::decref(smp);
            }
        }
    }

    fn queue(&self) -> Result<Arc<SignalledQueue<SamplePtr>>> {
        self.queue
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::runtime("loopback not started"))
    }

    fn read(&self, pool: &Arc<Pool>, out: &mut Vec<SamplePtr>, cnt: usize) -> Result<usize> {
        let queue = self.queue()?;

        let mut queued = Vec::with_capacity(cnt);
        match queue.pop_blocking() {
            Some(smp) => queued.push(smp),
            None => return Ok(0), // closed: shutdown sentinel
        }
        if queued.len() < cnt {
            queue.pop_many(&mut queued, cnt - 1);
        }

        let now = Timespec::now();
        let mut produced = 0;
        for orig in &queued {
            let Some(mut copy) = pool.get() else {
                break;
            };
            copy.copy_from(orig);
            copy.ts.received = now;
            copy.flags |= SampleFlags::HAS_TS_RECEIVED;
            out.push(copy);
            produced += 1;
        }
        Sample::decref_many(&queued);

        Ok(produced)
    }

    fn write(&self, smps: &[SamplePtr]) -> Result<usize> {
        let queue = self.queue()?;

        let mut written = 0;
        for &smp in smps {
            smp.incref();
            match queue.push(smp) {
                Pushed::Ok => written += 1,
                Pushed::Evicted(old) => {
                    Sample::decref_many(&old);
                    written += 1;
                    tracing::warn!(target: "node", "loopback queue overrun");
                }
                Pushed::Rejected(new) => {
                    Sample::decref(new);
                    break;
                }
            }
        }

        Ok(written)
    }

    fn poll_fds(&self) -> PollFds {
        let mut fds = PollFds::new();
        if let Some(queue) = self.queue.read().unwrap().as_ref() {
            if let Some(fd) = queue.fd() {
                fds.push(fd);
            }
        }
        fds
    }
}

/// User-instantiable in-process endpoint: whatever is written to the node
/// comes back out of its read side. Useful to wire paths to each other and
/// as the pure in-memory endpoint of the test suite.
pub struct Loopback {
    core: LoopbackCore,
}

impl Loopback {
    pub fn new() -> Self {
        Self {
            core: LoopbackCore::new(DEFAULT_QUEUELEN, WakeMode::EventFd),
        }
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeKind for Loopback {
    fn type_name(&self) -> &'static str {
        "loopback"
    }

    fn parse(&mut self, json: &Value, _super_uuid: &Uuid) -> Result<()> {
        if let Some(len) = json.get("queuelen").and_then(Value::as_u64) {
            if len == 0 {
                return Err(Error::config("queuelen", "must be at least 1"));
            }
            self.core.queuelen = len as usize;
        }

        if let Some(mode) = json.get("mode").and_then(Value::as_str) {
            self.core.wake = match mode {
                "auto" | "eventfd" => WakeMode::EventFd,
                "pthread" | "condvar" => WakeMode::CondVar,
                other => {
                    return Err(Error::config(
                        "mode",
                        format!("unknown wakeup mode '{other}'"),
                    ))
                }
            };
        }

        Ok(())
    }

    fn check(&self, node: &Node) -> Result<()> {
        if self.core.queuelen < node.input.vectorize {
            return Err(Error::config(
                "queuelen",
                "smaller than the read vectorize width",
            ));
        }
        Ok(())
    }

    fn start(&self, _node: &Node) -> Result<()> {
        self.core.start()
    }

    fn stop(&self, _node: &Node) -> Result<()> {
        self.core.stop();
        Ok(())
    }

    fn read(&self, pool: &Arc<Pool>, out: &mut Vec<SamplePtr>, cnt: usize) -> Result<usize> {
        self.core.read(pool, out, cnt)
    }

    fn write(&self, smps: &[SamplePtr]) -> Result<usize> {
        self.core.write(smps)
    }

    fn poll_fds(&self) -> PollFds {
        self.core.poll_fds()
    }
}

/// Secondary mate of a source node used by more than one path.
///
/// The master path source fans received samples out by writing into one
/// internal loopback per secondary; the secondary's path then reads from it
/// like from any other node. Not user-instantiable.
pub struct InternalLoopback {
    core: LoopbackCore,
}

impl InternalLoopback {
    /// Build the mate node for `source`; `id` disambiguates multiple
    /// secondaries of the same source.
    pub fn make_node(source: &Arc<Node>, id: usize, queuelen: usize) -> Result<Arc<Node>> {
        let name = format!("{}.lo{id}", source.name());
        let kind = Box::new(InternalLoopback {
            core: LoopbackCore::new(queuelen, WakeMode::EventFd),
        });

        let config = serde_json::json!({});
        let mut node = Node::with_kind(
            &name,
            kind,
            super::NodeFlags::INTERNAL | super::NodeFlags::HIDDEN,
            &config,
            source.uuid(),
        )?;
        node.input.set_signals(source.input.signals());
        // Batch shape follows the source.
        node.input.vectorize = source.input.vectorize;
        let node = Arc::new(node);

        node.check()?;
        node.prepare()?;
        Ok(node)
    }
}

impl NodeKind for InternalLoopback {
    fn type_name(&self) -> &'static str {
        "loopback.internal"
    }

    fn start(&self, _node: &Node) -> Result<()> {
        self.core.start()
    }

    fn stop(&self, _node: &Node) -> Result<()> {
        self.core.stop();
        Ok(())
    }

    fn read(&self, pool: &Arc<Pool>, out: &mut Vec<SamplePtr>, cnt: usize) -> Result<usize> {
        self.core.read(pool, out, cnt)
    }

    fn write(&self, smps: &[SamplePtr]) -> Result<usize> {
        self.core.write(smps)
    }

    fn poll_fds(&self) -> PollFds {
        self.core.poll_fds()
    }
}
