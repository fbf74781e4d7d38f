use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::sample::{Sample, SamplePtr};
use crate::signal::SignalList;

pub use builtin::{DropHook, FixHook, RestartHook};
pub use ebm::EbmHook;
pub use ma::MovingAverageHook;
pub use rate::LimitRateHook;
pub use scale::{CastHook, RoundHook, ScaleHook};
pub use shift::{ShiftSequenceHook, ShiftTimestampHook};

pub mod builtin;
mod ebm;
mod ma;
mod rate;
mod scale;
mod shift;

#[cfg(test)]
mod test;

/// Outcome of processing one sample. Control flow, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Forward the sample to the next hook.
    Ok,
    /// Halt the owning path.
    Error,
    /// Release this sample without forwarding it; continue with the next.
    SkipSample,
    /// Release this sample and stop processing the rest of the batch.
    StopProcessing,
}

bitflags::bitflags! {
    /// Where a hook type may be attached, carried by its factory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HookFlags: u32 {
        /// Inserted automatically into every node input chain.
        const BUILTIN = 1 << 0;
        const NODE_READ = 1 << 1;
        const NODE_WRITE = 1 << 2;
        const PATH = 1 << 3;
    }
}

/// An in-stream transform.
///
/// Lifecycle mirrors nodes and paths: parse, check, prepare (where the hook
/// sees its input signal list and may transform it), start/stop around the
/// owning path's activity, periodic driven by the stats timer, restart when
/// the stream begins a new simulation run.
pub trait Hook: Send {
    fn name(&self) -> &'static str;

    fn parse(&mut self, json: &Value) -> Result<()> {
        let _ = json;
        Ok(())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Receives the signal list of the attachment point. A hook that
    /// changes the shape or typing of the stream returns the transformed
    /// list; others return `None`.
    fn prepare(&mut self, signals: &Arc<SignalList>) -> Result<Option<SignalList>> {
        let _ = signals;
        Ok(None)
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn periodic(&mut self) {}

    /// A new simulation run began; discard inter-sample state.
    fn restart(&mut self) {}

    fn process(&mut self, smp: &mut SamplePtr) -> Reason;
}

struct ChainEntry {
    priority: i32,
    enabled: bool,
    hook: Box<dyn Hook>,
}

/// Outcome counters of one batch run through a chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct Processed {
    pub skipped: usize,
}

/// Hooks of one node direction or path, ordered by ascending priority.
#[derive(Default)]
pub struct HookChain {
    entries: Vec<ChainEntry>,
    sorted: bool,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate hooks from an array of `{ type, priority?, enabled?, ... }`
    /// objects via the registry.
    pub fn parse(&mut self, configs: &[Value], allowed: HookFlags) -> Result<()> {
        for json in configs {
            let type_name = json
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::config("hooks", "hook entry lacks a type"))?;

            let factory = crate::registry::lookup_hook(type_name).ok_or_else(|| {
                Error::config("hooks", format!("unknown hook type '{type_name}'"))
            })?;
            if !factory.flags.intersects(allowed) {
                return Err(Error::config(
                    "hooks",
                    format!("hook '{type_name}' cannot be attached here"),
                ));
            }

            let mut hook = (factory.make)();
            hook.parse(json)?;

            let priority = json
                .get("priority")
                .and_then(Value::as_i64)
                .map(|p| {
                    if p < 0 {
                        Err(Error::config("hooks.priority", "must not be negative"))
                    } else {
                        Ok(p as i32)
                    }
                })
                .transpose()?
                .unwrap_or(factory.priority);
            let enabled = json
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(true);

            self.add(hook, priority, enabled);
        }
        Ok(())
    }

    pub fn add(&mut self, hook: Box<dyn Hook>, priority: i32, enabled: bool) {
        self.entries.push(ChainEntry {
            priority,
            enabled,
            hook,
        });
        self.sorted = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn check(&self) -> Result<()> {
        for entry in &self.entries {
            entry.hook.check()?;
        }
        Ok(())
    }

    /// Sort by priority and run every enabled hook's prepare, threading the
    /// signal list through transforms. Returns the chain's output list.
    pub fn prepare(&mut self, signals: Arc<SignalList>) -> Result<Arc<SignalList>> {
        self.entries.sort_by_key(|e| e.priority);
        self.sorted = true;

        let mut current = signals;
        for entry in &mut self.entries {
            if !entry.enabled {
                continue;
            }
            if let Some(transformed) = entry.hook.prepare(&current)? {
                current = Arc::new(transformed);
            }
        }
        Ok(current)
    }

    pub fn start(&mut self) -> Result<()> {
        for entry in &mut self.entries {
            if entry.enabled {
                entry.hook.start()?;
            }
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        for entry in &mut self.entries {
            if entry.enabled {
                entry.hook.stop()?;
            }
        }
        Ok(())
    }

    pub fn periodic(&mut self) {
        for entry in &mut self.entries {
            if entry.enabled {
                entry.hook.periodic();
            }
        }
    }

    pub fn restart(&mut self) {
        for entry in &mut self.entries {
            if entry.enabled {
                entry.hook.restart();
            }
        }
    }

    /// Run one sample through the chain. The first non-[`Reason::Ok`]
    /// outcome short-circuits.
    pub fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        debug_assert!(self.sorted || self.entries.is_empty());

        for entry in &mut self.entries {
            if !entry.enabled {
                continue;
            }
            match entry.hook.process(smp) {
                Reason::Ok => continue,
                other => return other,
            }
        }
        Reason::Ok
    }

    /// Run a batch through the chain, releasing skipped samples in place.
    ///
    /// [`Reason::SkipSample`] drops the current sample and moves on;
    /// [`Reason::StopProcessing`] drops the current and all later samples of
    /// the batch; [`Reason::Error`] releases the remainder and surfaces as
    /// an error for the owning path.
    pub fn process_list(&mut self, smps: &mut Vec<SamplePtr>) -> Result<Processed> {
        let mut result = Processed::default();
        let mut kept = 0;

        for i in 0..smps.len() {
            let mut smp = smps[i];
            match self.process(&mut smp) {
                Reason::Ok => {
                    smps[kept] = smp;
                    kept += 1;
                }
                Reason::SkipSample => {
                    Sample::decref(smp);
                    result.skipped += 1;
                }
                Reason::StopProcessing => {
                    Sample::decref_many(&smps[i..]);
                    result.skipped += smps.len() - i;
                    break;
                }
                Reason::Error => {
                    Sample::decref_many(&smps[i..]);
                    smps.truncate(kept);
                    return Err(Error::runtime("hook chain failed"));
                }
            }
        }

        smps.truncate(kept);
        Ok(result)
    }
}

/// The `signals` option shared by the value-transforming hooks: a list of
/// names or indices selecting which channels the hook touches, defaulting
/// to all of them.
#[derive(Debug, Default, Clone)]
pub struct SignalSelection {
    tokens: Vec<String>,
    indices: Vec<usize>,
}

impl SignalSelection {
    pub fn parse(&mut self, json: &Value) -> Result<()> {
        let Some(list) = json.get("signals") else {
            return Ok(());
        };
        let list = list
            .as_array()
            .ok_or_else(|| Error::config("hooks.signals", "expected array"))?;

        for entry in list {
            match entry {
                Value::String(name) => self.tokens.push(name.clone()),
                Value::Number(n) => self.tokens.push(n.to_string()),
                _ => return Err(Error::config("hooks.signals", "expected name or index")),
            }
        }
        Ok(())
    }

    /// Resolve names against the attachment point's signal list.
    pub fn prepare(&mut self, signals: &SignalList) -> Result<()> {
        self.indices.clear();

        if self.tokens.is_empty() {
            self.indices.extend(0..signals.len());
            return Ok(());
        }

        for token in &self.tokens {
            let index = match token.parse::<usize>() {
                Ok(i) => i,
                Err(_) => signals.index_of(token).ok_or_else(|| {
                    Error::config("hooks.signals", format!("no signal '{token}'"))
                })?,
            };
            if index >= signals.len() {
                return Err(Error::config(
                    "hooks.signals",
                    format!("index {index} out of range"),
                ));
            }
            self.indices.push(index);
        }
        Ok(())
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}
