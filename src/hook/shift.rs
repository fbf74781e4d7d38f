use serde_json::Value;

use super::{Hook, Reason};
use crate::error::{Error, Result};
use crate::sample::SamplePtr;
use crate::timing::Timespec;

/// Adds a constant offset to the sequence number of every sample.
#[derive(Default)]
pub struct ShiftSequenceHook {
    offset: i64,
}

impl Hook for ShiftSequenceHook {
    fn name(&self) -> &'static str {
        "shift_seq"
    }

    fn parse(&mut self, json: &Value) -> Result<()> {
        self.offset = json
            .get("offset")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::config("shift_seq.offset", "missing offset"))?;
        Ok(())
    }

    fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        smp.sequence = smp.sequence.wrapping_add_signed(self.offset);
        Reason::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ShiftTarget {
    #[default]
    Origin,
    Received,
}

/// Adds a constant offset to the origin or received timestamp, e.g. to
/// compensate a known clock skew between federated simulators.
#[derive(Default)]
pub struct ShiftTimestampHook {
    target: ShiftTarget,
    offset: Timespec,
    negative: bool,
}

impl Hook for ShiftTimestampHook {
    fn name(&self) -> &'static str {
        "shift_ts"
    }

    fn parse(&mut self, json: &Value) -> Result<()> {
        let offset = json
            .get("offset")
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::config("shift_ts.offset", "missing offset"))?;
        self.negative = offset < 0.0;
        self.offset = Timespec::from_secs_f64(offset.abs());

        if let Some(mode) = json.get("mode").and_then(Value::as_str) {
            self.target = match mode {
                "origin" => ShiftTarget::Origin,
                "received" => ShiftTarget::Received,
                other => {
                    return Err(Error::config(
                        "shift_ts.mode",
                        format!("unknown mode '{other}'"),
                    ))
                }
            };
        }

        Ok(())
    }

    fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        let ts = match self.target {
            ShiftTarget::Origin => &mut smp.ts.origin,
            ShiftTarget::Received => &mut smp.ts.received,
        };

        *ts = if self.negative {
            ts.diff(&self.offset)
        } else {
            ts.add(&self.offset)
        };

        Reason::Ok
    }
}
