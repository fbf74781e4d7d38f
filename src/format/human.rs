use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::sample::{SampleFlags, SamplePtr};
use crate::signal::{SignalData, SignalList, SignalType};
use crate::timing::Timespec;

/// Whitespace-separated text columns, one line per sample:
///
/// ```text
/// 1000.000000500(7)	1.50000	-2.00000
/// ```
///
/// The first column carries the origin timestamp and, in parentheses, the
/// sequence number; both parts are optional on decode. Lines starting with
/// `#` are header comments and skipped.
pub struct HumanFormat {
    pub precision: usize,
}

impl Default for HumanFormat {
    fn default() -> Self {
        Self { precision: 5 }
    }
}

impl super::Format for HumanFormat {
    fn name(&self) -> &'static str {
        "villas.human"
    }

    fn pack(&self, buf: &mut Vec<u8>, smps: &[SamplePtr], signals: &SignalList) -> Result<usize> {
        use std::io::Write;

        for smp in smps {
            let mut line = String::new();

            if smp.has(SampleFlags::HAS_TS_ORIGIN) {
                line.push_str(&format!(
                    "{}.{:09}",
                    smp.ts.origin.sec, smp.ts.origin.nsec
                ));
            } else {
                line.push('0');
            }
            if smp.has(SampleFlags::HAS_SEQUENCE) {
                line.push_str(&format!("({})", smp.sequence));
            }

            for (i, val) in smp.data().iter().enumerate() {
                let ty = signals.get(i).map(|s| s.ty).unwrap_or(SignalType::Float);
                line.push('\t');
                line.push_str(&val.print_str(ty, self.precision));
            }
            line.push('\n');

            buf.write_all(line.as_bytes())
                .map_err(|e| Error::runtime(format!("write: {e}")))?;
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
            let line = std::str::from_utf8(&buf[off..off + nl])
                .map_err(|_| Error::runtime("line is not valid UTF-8"))?;
            off += nl + 1;

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut columns = line.split_whitespace();
            let head = columns.next().unwrap();

            let mut smp = pool.get_or_err()?;
            smp.flags = SampleFlags::HAS_DATA;
            smp.set_signals(Arc::downgrade(signals));

            if let Err(e) = parse_head(head, &mut smp) {
                crate::sample::Sample::decref(smp);
                return Err(e);
            }

            let mut n = 0;
            for col in columns {
                if n >= smp.capacity() {
                    break;
                }
                let ty = signals.get(n).map(|s| s.ty).unwrap_or(SignalType::Float);
                match SignalData::parse_str(ty, col) {
                    Ok(v) => {
                        smp.length = (n + 1) as u16;
                        smp.data_mut()[n] = v;
                        n += 1;
                    }
                    Err(e) => {
                        crate::sample::Sample::decref(smp);
                        return Err(e);
                    }
                }
            }

            out.push(smp);
        }

        Ok(off)
    }
}

// "<sec>.<nsec>" optionally followed by "(<seq>)".
fn parse_head(head: &str, smp: &mut SamplePtr) -> Result<()> {
    let bad = || Error::runtime(format!("malformed timestamp column '{head}'"));

    let (ts_part, seq_part) = match head.find('(') {
        Some(i) => {
            let seq = head[i + 1..].strip_suffix(')').ok_or_else(bad)?;
            (&head[..i], Some(seq))
        }
        None => (head, None),
    };

    if let Some(seq) = seq_part {
        smp.sequence = seq.parse().map_err(|_| bad())?;
        smp.flags |= SampleFlags::HAS_SEQUENCE;
    }

    match ts_part.split_once('.') {
        Some((sec, nsec)) => {
            smp.ts.origin = Timespec::new(
                sec.parse().map_err(|_| bad())?,
                nsec.parse().map_err(|_| bad())?,
            );
            smp.flags |= SampleFlags::HAS_TS_ORIGIN;
        }
        None => {
            let sec: i64 = ts_part.parse().map_err(|_| bad())?;
            if sec != 0 {
                smp.ts.origin = Timespec::new(sec, 0);
                smp.flags |= SampleFlags::HAS_TS_ORIGIN;
            }
        }
    }

    Ok(())
}
