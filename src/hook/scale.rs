//! Value transforms over a selectable subset of channels.

use std::sync::Arc;

use serde_json::Value;

use super::{Hook, Reason, SignalSelection};
use crate::error::{Error, Result};
use crate::sample::SamplePtr;
use crate::signal::{Signal, SignalList, SignalType};

// Looks up the type of channel `index` the way the transform hooks need it:
// signals may be absent on untyped streams, then float is assumed.
fn signal_type(signals: &Option<Arc<SignalList>>, index: usize) -> SignalType {
    signals
        .as_ref()
        .and_then(|s| s.get(index))
        .map(|s| s.ty)
        .unwrap_or(SignalType::Float)
}

/// `v := v * scale + offset` over the selected numeric channels.
pub struct ScaleHook {
    selection: SignalSelection,
    signals: Option<Arc<SignalList>>,
    scale: f64,
    offset: f64,
}

impl Default for ScaleHook {
    fn default() -> Self {
        Self {
            selection: SignalSelection::default(),
            signals: None,
            scale: 1.0,
            offset: 0.0,
        }
    }
}

impl Hook for ScaleHook {
    fn name(&self) -> &'static str {
        "scale"
    }

    fn parse(&mut self, json: &Value) -> Result<()> {
        self.selection.parse(json)?;
        if let Some(v) = json.get("scale").and_then(Value::as_f64) {
            self.scale = v;
        }
        if let Some(v) = json.get("offset").and_then(Value::as_f64) {
            self.offset = v;
        }
        Ok(())
    }

    fn prepare(&mut self, signals: &Arc<SignalList>) -> Result<Option<SignalList>> {
        self.selection.prepare(signals)?;
        self.signals = Some(Arc::clone(signals));
        Ok(None)
    }

    fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        for &index in self.selection.indices() {
            if index >= smp.length as usize {
                continue;
            }
            let ty = signal_type(&self.signals, index);
            let slot = &mut smp.data_mut()[index];
            match ty {
                SignalType::Float => unsafe {
                    slot.f = slot.f * self.scale + self.offset;
                },
                SignalType::Integer => unsafe {
                    slot.i = (slot.i as f64 * self.scale + self.offset) as i64;
                },
                SignalType::Complex => unsafe {
                    slot.z[0] = (slot.z[0] as f64 * self.scale + self.offset) as f32;
                    slot.z[1] = (slot.z[1] as f64 * self.scale) as f32;
                },
                _ => {}
            }
        }
        Reason::Ok
    }
}

/// Rounds the selected channels to a fixed number of decimal digits.
pub struct RoundHook {
    selection: SignalSelection,
    signals: Option<Arc<SignalList>>,
    precision: u32,
}

impl Default for RoundHook {
    fn default() -> Self {
        Self {
            selection: SignalSelection::default(),
            signals: None,
            precision: 1,
        }
    }
}

impl Hook for RoundHook {
    fn name(&self) -> &'static str {
        "round"
    }

    fn parse(&mut self, json: &Value) -> Result<()> {
        self.selection.parse(json)?;
        if let Some(p) = json.get("precision").and_then(Value::as_u64) {
            self.precision = p as u32;
        }
        Ok(())
    }

    fn prepare(&mut self, signals: &Arc<SignalList>) -> Result<Option<SignalList>> {
        self.selection.prepare(signals)?;
        self.signals = Some(Arc::clone(signals));
        Ok(None)
    }

    fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        let factor = 10f64.powi(self.precision as i32);

        for &index in self.selection.indices() {
            if index >= smp.length as usize {
                continue;
            }
            let ty = signal_type(&self.signals, index);
            let slot = &mut smp.data_mut()[index];
            match ty {
                SignalType::Float => unsafe {
                    slot.f = (slot.f * factor).round() / factor;
                },
                SignalType::Complex => unsafe {
                    slot.z[0] = ((slot.z[0] as f64 * factor).round() / factor) as f32;
                    slot.z[1] = ((slot.z[1] as f64 * factor).round() / factor) as f32;
                },
                _ => {}
            }
        }
        Reason::Ok
    }
}

/// Retypes (and optionally renames) the selected channels, converting every
/// passing value. The transformed signal list is visible downstream.
#[derive(Default)]
pub struct CastHook {
    selection: SignalSelection,
    old_types: Vec<(usize, SignalType)>,
    new_type: Option<SignalType>,
    new_name: Option<String>,
    new_unit: Option<String>,
}

impl Hook for CastHook {
    fn name(&self) -> &'static str {
        "cast"
    }

    fn parse(&mut self, json: &Value) -> Result<()> {
        self.selection.parse(json)?;

        if let Some(ty) = json.get("new_type").and_then(Value::as_str) {
            let ty = SignalType::from_str(ty);
            if ty == SignalType::Invalid {
                return Err(Error::config("cast.new_type", "unknown signal type"));
            }
            self.new_type = Some(ty);
        }
        self.new_name = json
            .get("new_name")
            .and_then(Value::as_str)
            .map(String::from);
        self.new_unit = json
            .get("new_unit")
            .and_then(Value::as_str)
            .map(String::from);

        Ok(())
    }

    fn prepare(&mut self, signals: &Arc<SignalList>) -> Result<Option<SignalList>> {
        self.selection.prepare(signals)?;

        let mut transformed = signals.as_ref().clone();
        self.old_types.clear();

        for &index in self.selection.indices() {
            let orig = signals.get(index).unwrap();
            self.old_types.push((index, orig.ty));

            let mut new = Signal::new(
                self.new_name.clone().unwrap_or_else(|| orig.name.clone()),
                self.new_unit.clone().unwrap_or_else(|| orig.unit.clone()),
                self.new_type.unwrap_or(orig.ty),
            );
            new.init = orig.init;
            transformed.set(index, new);
        }

        Ok(Some(transformed))
    }

    fn process(&mut self, smp: &mut SamplePtr) -> Reason {
        let Some(to) = self.new_type else {
            return Reason::Ok;
        };

        for &(index, from) in &self.old_types {
            if index >= smp.length as usize {
                continue;
            }
            let slot = &mut smp.data_mut()[index];
            *slot = slot.cast(from, to);
        }
        Reason::Ok
    }
}
