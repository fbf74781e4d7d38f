use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Error, Result};

pub use data::SignalData;

mod data;


/// Value type of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalType {
    #[default]
    Invalid,
    Boolean,
    Integer,
    Float,
    Complex,
}

impl SignalType {
    pub fn from_str(s: &str) -> Self {
        match s {
            "boolean" => Self::Boolean,
            "integer" => Self::Integer,
            "float" => Self::Float,
            "complex" => Self::Complex,
            _ => Self::Invalid,
        }
    }

    /// Short type code as used in format strings like "64f" or "3f2i".
    pub fn from_format_char(c: char) -> Self {
        match c {
            'b' => Self::Boolean,
            'i' => Self::Integer,
            'f' => Self::Float,
            'c' => Self::Complex,
            _ => Self::Invalid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Complex => "complex",
        }
    }

    /// Guess the type of a textual value.
    pub fn detect(val: &str) -> Self {
        if val.contains('i') {
            return Self::Complex;
        }
        if val.contains('.') || val.contains(',') {
            return Self::Float;
        }
        if val == "0" || val == "1" {
            return Self::Boolean;
        }
        Self::Integer
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::Complex)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor for one channel of a sample vector.
///
/// Shared by reference among all samples produced by a node or path; created
/// at prepare time and immutable while any sample points at its list.
#[derive(Debug, Clone)]
pub struct Signal {
    pub name: String,
    pub unit: String,
    pub ty: SignalType,
    /// Value a channel holds before its source produced anything.
    pub init: SignalData,
}

impl Signal {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, ty: SignalType) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            ty,
            init: SignalData::default(),
        }
    }

    pub fn parse(json: &Value) -> Result<Self> {
        match json {
            // Shorthand: the string is the signal name, type defaults to float.
            Value::String(name) => Ok(Self::new(name.clone(), "", SignalType::Float)),

            Value::Object(obj) => {
                let name = obj
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let unit = obj
                    .get("unit")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();

                let ty = match obj.get("type").and_then(Value::as_str) {
                    Some(s) => {
                        let ty = SignalType::from_str(s);
                        if ty == SignalType::Invalid {
                            return Err(Error::config("signal.type", format!("unknown type '{s}'")));
                        }
                        ty
                    }
                    None => SignalType::Float,
                };

                let mut sig = Signal::new(name, unit, ty);
                if let Some(init) = obj.get("init") {
                    sig.init = SignalData::parse_json(ty, init)?;
                }

                Ok(sig)
            }

            _ => Err(Error::config("signal", "expected string or object")),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "unit": self.unit,
            "type": self.ty.as_str(),
            "init": self.init.to_json(self.ty),
        })
    }
}

/// Ordered set of signals. Indices are the stable identity of a channel
/// within a sample.
#[derive(Debug, Clone, Default)]
pub struct SignalList(Vec<Arc<Signal>>);

impl SignalList {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` unnamed signals of a uniform type, named "signal0".."signalN".
    pub fn uniform(count: usize, ty: SignalType) -> Self {
        let mut list = Self::new();
        for i in 0..count {
            list.push(Signal::new(format!("signal{i}"), "", ty));
        }
        list
    }

    /// Parse a JSON signal description.
    ///
    /// Accepts an array of signal objects/names, or the `{ count, type }`
    /// shorthand for homogeneous lists.
    pub fn parse(json: &Value) -> Result<Self> {
        match json {
            Value::Array(entries) => {
                let mut list = Self::new();
                for entry in entries {
                    list.push(Signal::parse(entry)?);
                }
                Ok(list)
            }

            Value::Object(obj) => {
                let count = obj
                    .get("count")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| Error::config("signals.count", "missing count"))? as usize;
                let ty = obj
                    .get("type")
                    .and_then(Value::as_str)
                    .map(SignalType::from_str)
                    .unwrap_or(SignalType::Float);
                if ty == SignalType::Invalid {
                    return Err(Error::config("signals.type", "unknown type"));
                }
                Ok(Self::uniform(count, ty))
            }

            _ => Err(Error::config("signals", "expected array or object")),
        }
    }

    /// Parse a compact format string such as "64f" (64 floats) or "3f2i"
    /// (three floats followed by two integers).
    pub fn parse_format(fmt: &str) -> Result<Self> {
        let mut list = Self::new();
        let mut count = 0usize;
        let mut digits = false;

        for c in fmt.chars() {
            if let Some(d) = c.to_digit(10) {
                count = count * 10 + d as usize;
                digits = true;
            } else {
                let ty = SignalType::from_format_char(c);
                if ty == SignalType::Invalid {
                    return Err(Error::config("signals", format!("bad format char '{c}'")));
                }
                let n = if digits { count } else { 1 };
                for _ in 0..n {
                    let i = list.len();
                    list.push(Signal::new(format!("signal{i}"), "", ty));
                }
                count = 0;
                digits = false;
            }
        }

        if digits {
            return Err(Error::config("signals", "trailing count without type"));
        }

        Ok(list)
    }

    pub fn push(&mut self, sig: Signal) {
        self.0.push(Arc::new(sig));
    }

    pub fn push_shared(&mut self, sig: Arc<Signal>) {
        self.0.push(sig);
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Signal>> {
        self.0.get(index)
    }

    /// Replace the descriptor at `index`, e.g. by the cast hook.
    pub fn set(&mut self, index: usize, sig: Signal) {
        self.0[index] = Arc::new(sig);
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Signal>> {
        self.0.iter()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.0.iter().map(|s| s.to_json()).collect())
    }
}
