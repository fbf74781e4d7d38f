use std::sync::Arc;

use serde_json::Value;

use super::{Hook, Reason, SignalSelection};
use crate::error::{Error, Result};
use crate::sample::SamplePtr;
use crate::signal::{SignalList, SignalType};

/// Moving average over a fixed window of past samples, per selected channel.
///
/// Each channel keeps a circular history buffer; the running sum is updated
/// incrementally so processing is O(channels) per sample regardless of the
/// window size.
pub struct MovingAverageHook {
    selection: SignalSelection,
    window_size: usize,
    // One history ring and running sum per selected channel.
    history: Vec<Vec<f64>>,
    sums: Vec<f64>,
    position: u64,
}

impl Default for MovingAverageHook {
    fn default() -> Self {
        Self {
            selection: SignalSelection::default(),
            window_size: 10,
            history: vec![],
            sums: vec![],
            position: 0,
        }
    }
}

impl Hook for MovingAverageHook {
    fn name(&self) -> &'static str {
        "ma"
    }

    fn parse(&mut self, json: &Value) -> Result<()> {
        self.selection.parse(json)?;
        if let Some(w) = json.get("window_size").and_then(Value::as_u64) {
            if w == 0 {
                return Err(Error::config("ma.window_size", "must be at least 1"));
            }
            self.window_size = w as usize;
        }
        Ok(())
    }

    fn prepare(&mut self, signals: &Arc<SignalList>) -> Result<Option<SignalList>> {
        self.selection.prepare(signals)?;

        for &index in self.selection.indices() {
            if let Some(sig) = signals.get(index) {
                if sig.ty != SignalType::Float {
                    return Err(Error::runtime(format!(
                        "the ma hook can only average float signals, '{}' is {}",
                        sig.name, sig.ty
                    )));
                }
            }
        }

        self.history = vec![vec![0.0; self.window_size]; self.selection.indices().len()];
        self.sums = vec![0.0; self.selection.indices().len()];
        self.position = 0;
        Ok(None)
    }

    fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        for (slot, &index) in self.selection.indices().iter().enumerate() {
            if index >= smp.length as usize {
                continue;
            }

            let new = unsafe { smp.data()[index].f };
            let ring = &mut self.history[slot];
            let at = (self.position % self.window_size as u64) as usize;

            self.sums[slot] += new - ring[at];
            ring[at] = new;

            unsafe {
                smp.data_mut()[index].f = self.sums[slot] / self.window_size as f64;
            }
        }

        self.position += 1;
        Reason::Ok
    }

    fn restart(&mut self) {
        for ring in &mut self.history {
            ring.fill(0.0);
        }
        self.sums.fill(0.0);
        self.position = 0;
    }
}
