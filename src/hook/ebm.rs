use serde_json::Value;

use super::{Hook, Reason};
use crate::error::{Error, Result};
use crate::sample::{Sample, SamplePtr};

/// Energy metric: integrates `v(t) * i(t)` over time for configured
/// (voltage, current) channel pairs, using the trapezoidal rule between
/// consecutive samples.
#[derive(Default)]
pub struct EbmHook {
    // (voltage index, current index) pairs.
    phases: Vec<(usize, usize)>,
    energy: f64,
    last: Option<SamplePtr>,
}

impl EbmHook {
    pub fn energy(&self) -> f64 {
        self.energy
    }

    fn release_last(&mut self) {
        if let Some(last) = self.last.take() {
            Sample::decref(last);
        }
    }
}

impl Hook for EbmHook {
    fn name(&self) -> &'static str {
        "ebm"
    }

    fn parse(&mut self, json: &Value) -> Result<()> {
        let phases = json
            .get("phases")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::config("ebm.phases", "missing phases array"))?;

        for phase in phases {
            let pair = phase
                .as_array()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| Error::config("ebm.phases", "each phase is [voltage, current]"))?;
            let voltage = pair[0]
                .as_u64()
                .ok_or_else(|| Error::config("ebm.phases", "expected channel index"))?;
            let current = pair[1]
                .as_u64()
                .ok_or_else(|| Error::config("ebm.phases", "expected channel index"))?;
            self.phases.push((voltage as usize, current as usize));
        }

        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.energy = 0.0;
        self.last = None;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.release_last();
        Ok(())
    }

    fn periodic(&mut self) {
        tracing::info!(target: "hook", "energy: {}", self.energy);
    }

    fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        if let Some(last) = &self.last {
            let dt = smp.ts.origin.delta(&last.ts.origin);

            for &(v, i) in &self.phases {
                if v >= smp.length as usize || i >= smp.length as usize {
                    continue;
                }
                let p = unsafe { smp.data()[v].f * smp.data()[i].f };
                let p_last = unsafe { last.data()[v].f * last.data()[i].f };

                self.energy += dt * (p_last + p) / 2.0;
            }
        }

        smp.incref();
        self.release_last();
        self.last = Some(*smp);

        Reason::Ok
    }

    fn restart(&mut self) {
        self.release_last();
        self.energy = 0.0;
    }
}

impl Drop for EbmHook {
    fn drop(&mut self) {
        self.release_last();
    }
}
