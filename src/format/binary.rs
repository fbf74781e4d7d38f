use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::sample::{SampleFlags, SamplePtr};
use crate::signal::{SignalList, SignalType};
use crate::timing::Timespec;

/// Wire version understood by this codec.
const VERSION: u8 = 2;
/// Record type for sample data; other types are reserved.
const TYPE_DATA: u8 = 0;

const HEADER_LEN: usize = 16;
const WORD_LEN: usize = 4;

/// Compact binary framing, 16-byte header plus one 32-bit word per value.
///
/// Header layout, network byte order:
///
/// ```text
/// u8  version:4, type:2, reserved:2
/// u8  source_index
/// u16 length       -- number of payload words
/// u32 sequence
/// u32 ts.sec
/// u32 ts.nsec
/// ```
///
/// Values are IEEE-754 single floats or unsigned words per the signal type.
/// Multi-sample streams concatenate records back to back.
pub struct BinaryFormat;

impl super::Format for BinaryFormat {
    fn name(&self) -> &'static str {
        "villas.binary"
    }

    fn pack(&self, buf: &mut Vec<u8>, smps: &[SamplePtr], signals: &SignalList) -> Result<usize> {
        for (n, smp) in smps.iter().enumerate() {
            // No record is started for samples the payload cannot carry.
            let representable = (0..smp.length as usize).all(|i| {
                !matches!(
                    signals.get(i).map(|s| s.ty),
                    Some(SignalType::Complex) | Some(SignalType::Invalid)
                )
            });
            if !representable {
                return Ok(n);
            }

            let mut record = [0u8; HEADER_LEN];
            record[0] = (VERSION << 4) | (TYPE_DATA << 2);
            record[1] = 0; // source_index, assigned by multiplexing transports
            record[2..4].copy_from_slice(&(smp.length).to_be_bytes());
            record[4..8].copy_from_slice(&(smp.sequence as u32).to_be_bytes());
            record[8..12].copy_from_slice(&(smp.ts.origin.sec as u32).to_be_bytes());
            record[12..16].copy_from_slice(&(smp.ts.origin.nsec as u32).to_be_bytes());
            buf.extend_from_slice(&record);

            for (i, val) in smp.data().iter().enumerate() {
                let ty = signals
                    .get(i)
                    .map(|s| s.ty)
                    .unwrap_or(SignalType::Float);
                let word: [u8; WORD_LEN] = match ty {
                    SignalType::Integer => (unsafe { val.i } as u32).to_be_bytes(),
                    SignalType::Boolean => (unsafe { val.b } as u32).to_be_bytes(),
                    _ => (val.as_f64(ty) as f32).to_be_bytes(),
                };
                buf.extend_from_slice(&word);
            }
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

        while buf.len() - off >= HEADER_LEN {
            let hdr = &buf[off..off + HEADER_LEN];

            let version = hdr[0] >> 4;
            let ty = (hdr[0] >> 2) & 0b11;
            if version != VERSION {
                return Err(Error::runtime(format!("unsupported wire version {version}")));
            }
            if ty != TYPE_DATA {
                return Err(Error::runtime(format!("unsupported record type {ty}")));
            }

            let length = u16::from_be_bytes([hdr[2], hdr[3]]) as usize;
            let payload = length * WORD_LEN;
            if buf.len() - off < HEADER_LEN + payload {
                break; // incomplete trailing record
            }

            let mut smp = pool.get_or_err()?;
            smp.sequence = u32::from_be_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]) as u64;
            smp.ts.origin = Timespec::new(
                u32::from_be_bytes([hdr[8], hdr[9], hdr[10], hdr[11]]) as i64,
                u32::from_be_bytes([hdr[12], hdr[13], hdr[14], hdr[15]]) as i64,
            );
            smp.length = length.min(smp.capacity()) as u16;
            smp.flags =
                SampleFlags::HAS_SEQUENCE | SampleFlags::HAS_TS_ORIGIN | SampleFlags::HAS_DATA;
            smp.set_signals(Arc::downgrade(signals));

            let words = &buf[off + HEADER_LEN..off + HEADER_LEN + payload];
            let n = smp.length as usize;
            for (i, slot) in smp.data_mut().iter_mut().enumerate().take(n) {
                let word = [
                    words[i * WORD_LEN],
                    words[i * WORD_LEN + 1],
                    words[i * WORD_LEN + 2],
                    words[i * WORD_LEN + 3],
                ];
                let ty = signals.get(i).map(|s| s.ty).unwrap_or(SignalType::Float);
                match ty {
                    SignalType::Float => {
                        slot.set(SignalType::Float, f32::from_be_bytes(word) as f64)
                    }
                    SignalType::Integer => {
                        *slot = crate::signal::SignalData::integer(u32::from_be_bytes(word) as i64)
                    }
                    SignalType::Boolean => {
                        *slot =
                            crate::signal::SignalData::boolean(u32::from_be_bytes(word) != 0)
                    }
                    _ => {
                        crate::sample::Sample::decref(smp);
                        return Err(Error::runtime("complex signals have no binary encoding"));
                    }
                }
            }

            out.push(smp);
            off += HEADER_LEN + payload;
        }

        Ok(off)
    }
}
