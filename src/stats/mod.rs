use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};

pub use hist::Hist;

mod hist;

#[cfg(test)]
mod test;

/// Metrics tracked per node and per path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// One-way delay: `ts.received - ts.origin`, in seconds.
    Owd,
    /// Gap between origin timestamps of consecutive samples, in seconds.
    Gap,
    /// Distance between consecutive sequence numbers.
    SequenceDistance,
    /// Destination queue fill level at enqueue time.
    QueueOccupancy,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Owd,
        Metric::Gap,
        Metric::SequenceDistance,
        Metric::QueueOccupancy,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "owd" => Some(Self::Owd),
            "gap" => Some(Self::Gap),
            "sequence" => Some(Self::SequenceDistance),
            "queue" => Some(Self::QueueOccupancy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owd => "owd",
            Self::Gap => "gap",
            Self::SequenceDistance => "sequence",
            Self::QueueOccupancy => "queue",
        }
    }
}

/// Aggregate selected from a metric's histogram, e.g. by the `stats.`
/// mapping selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatType {
    Last,
    Highest,
    Lowest,
    Mean,
    Var,
    Stddev,
    Total,
}

impl StatType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "last" => Some(Self::Last),
            "highest" => Some(Self::Highest),
            "lowest" => Some(Self::Lowest),
            "mean" => Some(Self::Mean),
            "var" => Some(Self::Var),
            "stddev" => Some(Self::Stddev),
            "total" => Some(Self::Total),
            _ => None,
        }
    }
}

/// Event counters that do not fit a distribution.
#[derive(Debug, Default)]
pub struct Counters {
    /// Samples discarded by the reorder-drop hook.
    pub reorder_dropped: AtomicU64,
    /// Samples skipped by any other hook.
    pub skipped: AtomicU64,
    /// Destination queue overruns.
    pub queue_overrun: AtomicU64,
    /// Hot-path errors that were survivable.
    pub errors: AtomicU64,
}

/// Online statistics of one node or path.
///
/// Histograms sit behind one mutex; the hot path takes it once per sample
/// batch and contention is limited to the stats reader.
pub struct Stats {
    hists: Mutex<Vec<(Metric, Hist)>>,
    pub counters: Counters,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new(20, 0)
    }
}

impl Stats {
    pub fn new(buckets: usize, warmup: u64) -> Self {
        let hists = Metric::ALL
            .iter()
            .map(|&m| (m, Hist::new(buckets, warmup)))
            .collect();
        Self {
            hists: Mutex::new(hists),
            counters: Counters::default(),
        }
    }

    pub fn update(&self, metric: Metric, value: f64) {
        let mut hists = self.hists.lock().unwrap();
        if let Some((_, h)) = hists.iter_mut().find(|(m, _)| *m == metric) {
            h.put(value);
        }
    }

    pub fn get(&self, metric: Metric, ty: StatType) -> f64 {
        let hists = self.hists.lock().unwrap();
        let Some((_, h)) = hists.iter().find(|(m, _)| *m == metric) else {
            return f64::NAN;
        };
        match ty {
            StatType::Last => h.last(),
            StatType::Highest => h.highest(),
            StatType::Lowest => h.lowest(),
            StatType::Mean => h.mean(),
            StatType::Var => h.var(),
            StatType::Stddev => h.stddev(),
            StatType::Total => h.total() as f64,
        }
    }

    pub fn reset(&self) {
        let mut hists = self.hists.lock().unwrap();
        for (_, h) in hists.iter_mut() {
            h.reset();
        }
        self.counters.reorder_dropped.store(0, Ordering::Relaxed);
        self.counters.skipped.store(0, Ordering::Relaxed);
        self.counters.queue_overrun.store(0, Ordering::Relaxed);
        self.counters.errors.store(0, Ordering::Relaxed);
    }

    pub fn to_json(&self) -> Value {
        let hists = self.hists.lock().unwrap();
        let mut obj = serde_json::Map::new();
        for (m, h) in hists.iter() {
            obj.insert(m.as_str().into(), h.to_json());
        }
        obj.insert(
            "counters".into(),
            json!({
                "reorder_dropped": self.counters.reorder_dropped.load(Ordering::Relaxed),
                "skipped": self.counters.skipped.load(Ordering::Relaxed),
                "queue_overrun": self.counters.queue_overrun.load(Ordering::Relaxed),
                "errors": self.counters.errors.load(Ordering::Relaxed),
            }),
        );
        Value::Object(obj)
    }
}
