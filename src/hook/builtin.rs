//! Hooks inserted automatically into every node input chain, at fixed
//! priorities: fix (1) repairs missing header fields, restart (2) detects a
//! new simulation run, drop (3) discards reordered samples.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Hook, Reason};
use crate::node::Node;
use crate::sample::{Sample, SampleFlags, SamplePtr};
use crate::stats::Stats;
use crate::timing::Timespec;

pub const FIX_PRIORITY: i32 = 1;
pub const RESTART_PRIORITY: i32 = 2;
pub const DROP_PRIORITY: i32 = 3;

/// Stamps `ts.received`/`ts.origin` if the node left them unset and assigns
/// a sequence number from the node's counter when the protocol carried none.
#[derive(Default)]
pub struct FixHook {
    node: Option<Arc<Node>>,
}

impl FixHook {
    pub fn with_node(node: Arc<Node>) -> Self {
        Self { node: Some(node) }
    }
}

impl Hook for FixHook {
    fn name(&self) -> &'static str {
        "fix"
    }

    fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        if !smp.has(SampleFlags::HAS_SEQUENCE) {
            if let Some(node) = &self.node {
                smp.sequence = node.next_sequence();
                smp.flags |= SampleFlags::HAS_SEQUENCE;
            }
        }

        if !smp.has(SampleFlags::HAS_TS_RECEIVED) {
            smp.ts.received = Timespec::now();
            smp.flags |= SampleFlags::HAS_TS_RECEIVED;
        }

        if !smp.has(SampleFlags::HAS_TS_ORIGIN) {
            smp.ts.origin = smp.ts.received;
            smp.flags |= SampleFlags::HAS_TS_ORIGIN;
        }

        Reason::Ok
    }
}

/// Detects the start of a new simulation run: a sequence number of zero
/// right after a much larger one. Raises the path's restart flag, which
/// resets hook state and statistics.
#[derive(Default)]
pub struct RestartHook {
    prev_sequence: Option<u64>,
    triggers: Vec<Arc<AtomicBool>>,
}

impl RestartHook {
    pub fn with_trigger(trigger: Arc<AtomicBool>) -> Self {
        Self::with_triggers(vec![trigger])
    }

    /// Raise several flags at once, e.g. the path's restart flag plus the
    /// reset token consumed by the drop hook further down the chain.
    pub fn with_triggers(triggers: Vec<Arc<AtomicBool>>) -> Self {
        Self {
            prev_sequence: None,
            triggers,
        }
    }
}

impl Hook for RestartHook {
    fn name(&self) -> &'static str {
        "restart"
    }

    fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        if let Some(prev) = self.prev_sequence {
            if smp.sequence == 0 && prev > 1 {
                tracing::info!(
                    target: "hook",
                    "restart detected: previous sequence was {prev}"
                );
                for trigger in &self.triggers {
                    trigger.store(true, Ordering::Release);
                }
            }
        }

        self.prev_sequence = Some(smp.sequence);
        Reason::Ok
    }

    fn restart(&mut self) {
        self.prev_sequence = None;
    }
}

/// Discards samples whose sequence number did not advance past the last
/// delivered one, so destinations observe a monotone stream even when the
/// transport reorders.
#[derive(Default)]
pub struct DropHook {
    prev: Option<SamplePtr>,
    stats: Option<Arc<Stats>>,
    // Raised by the restart hook; makes the drop hook forget its previous
    // sample before it would reject the first sample of a new run.
    reset: Option<Arc<AtomicBool>>,
}

impl DropHook {
    pub fn with_stats(stats: Arc<Stats>) -> Self {
        Self {
            prev: None,
            stats: Some(stats),
            reset: None,
        }
    }

    pub fn with_reset(stats: Arc<Stats>, reset: Arc<AtomicBool>) -> Self {
        Self {
            prev: None,
            stats: Some(stats),
            reset: Some(reset),
        }
    }

    fn release_prev(&mut self) {
        if let Some(prev) = self.prev.take() {
            Sample::decref(prev);
        }
    }
}

impl Hook for DropHook {
    fn name(&self) -> &'static str {
        "drop"
    }

    fn start(&mut self) -> Result<(), crate::error::Error> {
        self.prev = None;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), crate::error::Error> {
        self.release_prev();
        Ok(())
    }

    fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        if let Some(reset) = &self.reset {
            if reset.swap(false, Ordering::AcqRel) {
                self.release_prev();
            }
        }

        if let Some(prev) = &self.prev {
            let dist = smp.sequence as i64 - prev.sequence as i64;
            if dist <= 0 {
                tracing::debug!(
                    target: "hook",
                    "dropping reordered sample: sequence={}, distance={dist}",
                    smp.sequence
                );
                if let Some(stats) = &self.stats {
                    stats.counters.reorder_dropped.fetch_add(1, Ordering::Relaxed);
                }
                return Reason::SkipSample;
            }
            if let Some(stats) = &self.stats {
                stats.update(crate::stats::Metric::SequenceDistance, dist as f64);
            }
        }

        smp.incref();
        self.release_prev();
        self.prev = Some(*smp);

        Reason::Ok
    }

    fn restart(&mut self) {
        self.release_prev();
    }
}

impl Drop for DropHook {
    fn drop(&mut self) {
        self.release_prev();
    }
}
