use std::sync::Arc;

use crate::error::Result;
use crate::pool::Pool;
use crate::sample::SamplePtr;
use crate::signal::SignalList;

pub use binary::BinaryFormat;
pub use human::HumanFormat;
pub use json::JsonFormat;

mod binary;
mod human;
mod json;

#[cfg(test)]
mod test;

/// Serializer/deserializer between samples and a byte stream.
///
/// Implementations are stateless and registered by name in the plugin
/// registry; nodes hold one per direction. The signal list supplies the
/// per-channel types that decide how each value is encoded.
pub trait Format: Send + Sync {
    fn name(&self) -> &'static str;

    /// Append the wire form of `smps` to `buf`. Returns the sample count
    /// actually written; fewer than `smps.len()` means the rest was not
    /// representable.
    fn pack(&self, buf: &mut Vec<u8>, smps: &[SamplePtr], signals: &SignalList) -> Result<usize>;

    /// Parse as many complete samples as `buf` holds, drawing blocks from
    /// `pool`. Returns the number of bytes consumed; a partial trailing
    /// record is left unconsumed for the caller to retry with more data.
    fn unpack(
        &self,
        buf: &[u8],
        pool: &Arc<Pool>,
        signals: &Arc<SignalList>,
        out: &mut Vec<SamplePtr>,
    ) -> Result<usize>;
}
