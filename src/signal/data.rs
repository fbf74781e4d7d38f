use serde_json::{json, Value};

use super::SignalType;
use crate::error::{Error, Result};

/// One channel value, in host byte order.
///
/// An untagged 64-bit union; the discriminant lives in the signal list the
/// owning sample points at. Accessors take the [`SignalType`] explicitly so
/// untyped data can still move through the gateway without being printed.
#[derive(Clone, Copy)]
#[repr(C)]
pub union SignalData {
    pub f: f64,
    pub i: i64,
    pub b: bool,
    /// Single-precision complex, (re, im).
    pub z: [f32; 2],
}

impl Default for SignalData {
    fn default() -> Self {
        Self { i: 0 }
    }
}

impl SignalData {
    pub fn float(f: f64) -> Self {
        Self { f }
    }

    pub fn integer(i: i64) -> Self {
        Self { i }
    }

    pub fn boolean(b: bool) -> Self {
        Self { b }
    }

    pub fn complex(re: f32, im: f32) -> Self {
        Self { z: [re, im] }
    }

    /// The NaN sentinel, used for slots whose source never produced a value.
    pub fn nan() -> Self {
        Self { f: f64::NAN }
    }

    pub fn is_nan(&self) -> bool {
        unsafe { self.f.is_nan() }
    }

    /// Convert between value types, e.g. by the cast hook.
    pub fn cast(&self, from: SignalType, to: SignalType) -> SignalData {
        if from == to {
            return *self;
        }

        unsafe {
            match (from, to) {
                (SignalType::Boolean, SignalType::Integer) => Self::integer(self.b as i64),
                (SignalType::Boolean, SignalType::Float) => Self::float(self.b as u8 as f64),
                (SignalType::Boolean, SignalType::Complex) => {
                    Self::complex(self.b as u8 as f32, 0.0)
                }

                (SignalType::Integer, SignalType::Boolean) => Self::boolean(self.i != 0),
                (SignalType::Integer, SignalType::Float) => Self::float(self.i as f64),
                (SignalType::Integer, SignalType::Complex) => Self::complex(self.i as f32, 0.0),

                (SignalType::Float, SignalType::Boolean) => Self::boolean(self.f != 0.0),
                (SignalType::Float, SignalType::Integer) => Self::integer(self.f as i64),
                (SignalType::Float, SignalType::Complex) => Self::complex(self.f as f32, 0.0),

                (SignalType::Complex, SignalType::Boolean) => Self::boolean(self.z[0] != 0.0),
                (SignalType::Complex, SignalType::Integer) => Self::integer(self.z[0] as i64),
                (SignalType::Complex, SignalType::Float) => Self::float(self.z[0] as f64),

                _ => *self,
            }
        }
    }

    /// Assign from a double, converting to the slot's type.
    pub fn set(&mut self, ty: SignalType, val: f64) {
        *self = match ty {
            SignalType::Boolean => Self::boolean(val != 0.0),
            SignalType::Integer => Self::integer(val as i64),
            SignalType::Complex => Self::complex(val as f32, 0.0),
            _ => Self::float(val),
        };
    }

    /// The value as a double, converting from the slot's type.
    pub fn as_f64(&self, ty: SignalType) -> f64 {
        unsafe {
            match ty {
                SignalType::Boolean => self.b as u8 as f64,
                SignalType::Integer => self.i as f64,
                SignalType::Complex => self.z[0] as f64,
                _ => self.f,
            }
        }
    }

    /// Render to text. `precision` bounds the fractional digits of floats.
    pub fn print_str(&self, ty: SignalType, precision: usize) -> String {
        unsafe {
            match ty {
                SignalType::Boolean => (self.b as u8).to_string(),
                SignalType::Integer => self.i.to_string(),
                SignalType::Complex => {
                    let [re, im] = self.z;
                    if im >= 0.0 {
                        format!("{re:.precision$}+{im:.precision$}i")
                    } else {
                        format!("{re:.precision$}-{:.precision$}i", -im)
                    }
                }
                _ => format!("{:.precision$}", self.f),
            }
        }
    }

    /// Parse from one whitespace-free token. Inverse of [`print_str`][Self::print_str]
    /// for all non-NaN values.
    pub fn parse_str(ty: SignalType, s: &str) -> Result<SignalData> {
        fn bad(s: &str, ty: SignalType) -> Error {
            Error::runtime(format!("cannot parse '{s}' as {ty}"))
        }

        match ty {
            SignalType::Boolean => {
                let i: i64 = s.parse().map_err(|_| bad(s, ty))?;
                Ok(Self::boolean(i != 0))
            }
            SignalType::Integer => Ok(Self::integer(s.parse().map_err(|_| bad(s, ty))?)),
            SignalType::Float => Ok(Self::float(s.parse().map_err(|_| bad(s, ty))?)),
            SignalType::Complex => {
                let body = s
                    .strip_suffix('i')
                    .ok_or_else(|| Error::runtime(format!("complex value '{s}' lacks 'i' suffix")))?;

                // Split real and imaginary part on the last sign that is not
                // an exponent sign.
                let split = body
                    .char_indices()
                    .skip(1)
                    .filter(|&(i, c)| {
                        (c == '+' || c == '-')
                            && !matches!(body.as_bytes()[i - 1], b'e' | b'E')
                    })
                    .map(|(i, _)| i)
                    .last();

                match split {
                    Some(i) => {
                        let re: f32 = body[..i].parse().map_err(|_| {
                            Error::runtime(format!("cannot parse '{s}' as complex"))
                        })?;
                        let im: f32 = body[i..].parse().map_err(|_| {
                            Error::runtime(format!("cannot parse '{s}' as complex"))
                        })?;
                        Ok(Self::complex(re, im))
                    }
                    None => {
                        // Pure imaginary.
                        let im: f32 = body.parse().map_err(|_| {
                            Error::runtime(format!("cannot parse '{s}' as complex"))
                        })?;
                        Ok(Self::complex(0.0, im))
                    }
                }
            }
            SignalType::Invalid => Err(Error::runtime("cannot parse value of invalid type")),
        }
    }

    pub fn to_json(&self, ty: SignalType) -> Value {
        unsafe {
            match ty {
                SignalType::Boolean => json!(self.b),
                SignalType::Integer => json!(self.i),
                SignalType::Complex => json!({ "real": self.z[0], "imag": self.z[1] }),
                _ => json!(self.f),
            }
        }
    }

    pub fn parse_json(ty: SignalType, json: &Value) -> Result<SignalData> {
        match ty {
            SignalType::Boolean => match json {
                Value::Bool(b) => Ok(Self::boolean(*b)),
                Value::Number(n) => Ok(Self::boolean(n.as_f64().unwrap_or(0.0) != 0.0)),
                _ => Err(Error::runtime("expected boolean")),
            },
            SignalType::Integer => json
                .as_i64()
                .map(Self::integer)
                .ok_or_else(|| Error::runtime("expected integer")),
            SignalType::Float => json
                .as_f64()
                .map(Self::float)
                .ok_or_else(|| Error::runtime("expected number")),
            SignalType::Complex => {
                let re = json.get("real").and_then(Value::as_f64);
                let im = json.get("imag").and_then(Value::as_f64);
                match (re, im) {
                    (Some(re), Some(im)) => Ok(Self::complex(re as f32, im as f32)),
                    _ => Err(Error::runtime("expected { real, imag } object")),
                }
            }
            SignalType::Invalid => Err(Error::runtime("cannot parse value of invalid type")),
        }
    }
}

impl std::fmt::Debug for SignalData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The type tag lives elsewhere; show the raw word.
        write!(f, "SignalData({:#018x})", unsafe { self.i })
    }
}
