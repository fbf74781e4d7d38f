use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::sample::{SampleFlags, SamplePtr};
use crate::signal::{SignalData, SignalList};
use crate::timing::Timespec;

/// Newline-framed JSON, one object per sample:
///
/// ```json
/// { "ts": [1000, 500], "sequence": 7, "values": [1.5, -2.0] }
/// ```
///
/// Decoding also accepts values under `"data"` keyed by signal name.
pub struct JsonFormat;

impl super::Format for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn pack(&self, buf: &mut Vec<u8>, smps: &[SamplePtr], signals: &SignalList) -> Result<usize> {
        for smp in smps {
            let values: Vec<Value> = smp
                .data()
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let ty = signals
                        .get(i)
                        .map(|s| s.ty)
                        .unwrap_or(crate::signal::SignalType::Float);
                    v.to_json(ty)
                })
                .collect();

            let mut obj = serde_json::Map::new();
            if smp.has(SampleFlags::HAS_TS_ORIGIN) {
                obj.insert("ts".into(), json!([smp.ts.origin.sec, smp.ts.origin.nsec]));
            }
            if smp.has(SampleFlags::HAS_SEQUENCE) {
                obj.insert("sequence".into(), json!(smp.sequence));
            }
            obj.insert("values".into(), Value::Array(values));

            serde_json::to_writer(&mut *buf, &Value::Object(obj))
                .map_err(|e| Error::runtime(format!("json encode: {e}")))?;
            buf.push(b'\n');
        }

        Ok(smps.len())
    }

    fn unpack(
        &self,
        buf: &[u8],
        pool: &Arc<Pool>,
        signals: &Arc<SignalList>,
        out: &mut Vec<SamplePtr>,
    ) -> Result<usize> {
        let mut off = 0;

        while let Some(nl) = buf[off..].iter().position(|&b| b == b'\n') {
            let line = &buf[off..off + nl];
            off += nl + 1;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let obj: Value = serde_json::from_slice(line)
                .map_err(|e| Error::runtime(format!("json decode: {e}")))?;

            let mut smp = pool.get_or_err()?;
            smp.flags = SampleFlags::HAS_DATA;
            smp.set_signals(Arc::downgrade(signals));

            if let Some(ts) = obj.get("ts").and_then(Value::as_array) {
                let sec = ts.first().and_then(Value::as_i64).unwrap_or(0);
                let nsec = ts.get(1).and_then(Value::as_i64).unwrap_or(0);
                smp.ts.origin = Timespec::new(sec, nsec);
                smp.flags |= SampleFlags::HAS_TS_ORIGIN;
            }

            if let Some(seq) = obj.get("sequence").and_then(Value::as_u64) {
                smp.sequence = seq;
                smp.flags |= SampleFlags::HAS_SEQUENCE;
            }

            let parsed = if let Some(values) = obj.get("values").and_then(Value::as_array) {
                self.parse_values(&mut smp, values, signals)
            } else if let Some(data) = obj.get("data").and_then(Value::as_object) {
                self.parse_named(&mut smp, data, signals)
            } else {
                Err(Error::runtime("sample object has neither values nor data"))
            };

            if let Err(e) = parsed {
                crate::sample::Sample::decref(smp);
                return Err(e);
            }

            out.push(smp);
        }

        Ok(off)
    }
}

impl JsonFormat {
    fn parse_values(
        &self,
        smp: &mut SamplePtr,
        values: &[Value],
        signals: &Arc<SignalList>,
    ) -> Result<()> {
        let n = values.len().min(smp.capacity());
        smp.length = n as u16;
        for i in 0..n {
            let ty = signals
                .get(i)
                .map(|s| s.ty)
                .unwrap_or(crate::signal::SignalType::Float);
            smp.data_mut()[i] = SignalData::parse_json(ty, &values[i])?;
        }
        Ok(())
    }

    fn parse_named(
        &self,
        smp: &mut SamplePtr,
        data: &serde_json::Map<String, Value>,
        signals: &Arc<SignalList>,
    ) -> Result<()> {
        smp.length = signals.len().min(smp.capacity()) as u16;
        for (name, value) in data {
            let Some(i) = signals.index_of(name) else {
                return Err(Error::runtime(format!("unknown signal '{name}'")));
            };
            if i >= smp.length as usize {
                continue;
            }
            let ty = signals.get(i).unwrap().ty;
            smp.data_mut()[i] = SignalData::parse_json(ty, value)?;
        }
        Ok(())
    }
}
