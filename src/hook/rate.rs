use serde_json::Value;

use super::{Hook, Reason};
use crate::error::{Error, Result};
use crate::sample::SamplePtr;
use crate::timing::Timespec;

/// Which clock the dead-time comparison uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum RateMode {
    #[default]
    Local,
    Origin,
    Received,
}

/// Enforces a minimum dead-time of `1/rate` between forwarded samples;
/// everything arriving earlier is skipped.
#[derive(Default)]
pub struct LimitRateHook {
    mode: RateMode,
    deadtime: f64,
    last: Option<Timespec>,
}

impl Hook for LimitRateHook {
    fn name(&self) -> &'static str {
        "limit_rate"
    }

    fn parse(&mut self, json: &Value) -> Result<()> {
        let rate = json
            .get("rate")
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::config("limit_rate.rate", "missing rate"))?;
        if rate <= 0.0 {
            return Err(Error::config("limit_rate.rate", "must be positive"));
        }
        self.deadtime = 1.0 / rate;

        if let Some(mode) = json.get("mode").and_then(Value::as_str) {
            self.mode = match mode {
                "local" => RateMode::Local,
                "origin" => RateMode::Origin,
                "received" => RateMode::Received,
                other => {
                    return Err(Error::config(
                        "limit_rate.mode",
                        format!("unknown mode '{other}'"),
                    ))
                }
            };
        }

        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.last = None;
        Ok(())
    }

    fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        let next = match self.mode {
            RateMode::Local => Timespec::now(),
            RateMode::Origin => smp.ts.origin,
            RateMode::Received => smp.ts.received,
        };

        if let Some(last) = self.last {
            if next.delta(&last) < self.deadtime {
                return Reason::SkipSample;
            }
        }

        self.last = Some(next);
        Reason::Ok
    }

    fn restart(&mut self) {
        self.last = None;
    }
}
