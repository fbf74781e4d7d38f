use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::node::{Node, NodeList};
use crate::sample::Sample;
use crate::signal::{Signal, SignalData, SignalList, SignalType};
use crate::stats::{Metric, StatType};

#[cfg(test)]
mod test;

/// What a mapping entry selects from the source sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingKind {
    /// A range of data values, by index or signal name. `None` bounds mean
    /// "all values" resp. "single value".
    Data {
        first: Option<String>,
        last: Option<String>,
    },
    /// Origin or received timestamp; contributes two slots (sec, nsec).
    Timestamp(TimestampKind),
    /// A header field; one slot.
    Header(HeaderKind),
    /// An aggregate of one of the node's metrics; one slot.
    Stats { metric: Metric, ty: StatType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKind {
    Origin,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Sequence,
    Length,
}

/// One declarative selector: "from node N take X", resolved at prepare time
/// into a node reference, a contiguous source index range and an offset in
/// the muxed output sample.
#[derive(Clone)]
pub struct MappingEntry {
    pub node_name: String,
    pub kind: MappingKind,

    node: Option<Arc<Node>>,
    /// First selected data index after resolution.
    data_first: usize,
    /// Offset of this entry's slots in the muxed sample.
    offset: usize,
    /// Number of slots this entry contributes.
    length: usize,
}

impl MappingEntry {
    /// Parse the textual selector grammar:
    ///
    /// ```text
    /// <node>                         all data values
    /// <node>[<f>] <node>[<f>-<l>]    data range, by index or name
    /// <node>.data[<f>[-<l>]]         same
    /// <node>.data.<name>             single value by name
    /// <node>.<name>                  single value by name
    /// <node>.ts.origin|received      timestamp (sec, nsec)
    /// <node>.hdr.sequence|length     header field
    /// <node>.stats.<metric>.<type>   statistics aggregate
    /// ```
    pub fn parse_str(expr: &str) -> Result<Self> {
        let bad = |reason: &str| Error::config("path.in", format!("'{expr}': {reason}"));

        let expr = expr.trim();
        if expr.is_empty() {
            return Err(bad("empty mapping"));
        }

        // Node part ends at the first '.' or '['.
        let node_end = expr
            .find(|c| c == '.' || c == '[')
            .unwrap_or(expr.len());
        let node_name = &expr[..node_end];
        if node_name.is_empty() {
            return Err(bad("missing node name"));
        }
        let rest = &expr[node_end..];

        let kind = if rest.is_empty() {
            MappingKind::Data {
                first: None,
                last: None,
            }
        } else if let Some(range) = rest.strip_prefix('[') {
            Self::parse_range(range.strip_suffix(']').ok_or_else(|| bad("missing ']'"))?)?
        } else {
            // rest starts with '.'
            let sel = &rest[1..];
            match sel.split_once('.') {
                Some(("ts", which)) => MappingKind::Timestamp(match which {
                    "origin" => TimestampKind::Origin,
                    "received" => TimestampKind::Received,
                    _ => return Err(bad("timestamp is 'origin' or 'received'")),
                }),
                Some(("hdr", which)) => MappingKind::Header(match which {
                    "sequence" => HeaderKind::Sequence,
                    "length" => HeaderKind::Length,
                    _ => return Err(bad("header field is 'sequence' or 'length'")),
                }),
                Some(("stats", rest)) => {
                    let (metric, ty) = rest
                        .split_once('.')
                        .ok_or_else(|| bad("stats selector is stats.<metric>.<type>"))?;
                    MappingKind::Stats {
                        metric: Metric::from_str(metric)
                            .ok_or_else(|| bad("unknown stats metric"))?,
                        ty: StatType::from_str(ty)
                            .ok_or_else(|| bad("unknown stats aggregate"))?,
                    }
                }
                Some(("data", sel)) => {
                    if let Some(range) = sel.strip_prefix('[') {
                        Self::parse_range(
                            range.strip_suffix(']').ok_or_else(|| bad("missing ']'"))?,
                        )?
                    } else {
                        // data.<name>
                        MappingKind::Data {
                            first: Some(sel.to_string()),
                            last: None,
                        }
                    }
                }
                _ => {
                    if let Some(range) = sel.strip_prefix("data[") {
                        Self::parse_range(
                            range.strip_suffix(']').ok_or_else(|| bad("missing ']'"))?,
                        )?
                    } else {
                        // <node>.<signal_name>
                        MappingKind::Data {
                            first: Some(sel.to_string()),
                            last: None,
                        }
                    }
                }
            }
        };

        Ok(Self {
            node_name: node_name.to_string(),
            kind,
            node: None,
            data_first: 0,
            offset: 0,
            length: 0,
        })
    }

    fn parse_range(range: &str) -> Result<MappingKind> {
        let (first, last) = match range.split_once('-') {
            Some((f, l)) => (f, Some(l.to_string())),
            None => (range, None),
        };
        if first.is_empty() {
            return Err(Error::config("path.in", "empty range bound"));
        }
        Ok(MappingKind::Data {
            first: Some(first.to_string()),
            last,
        })
    }

    pub fn parse_json(json: &Value) -> Result<Self> {
        match json.as_str() {
            Some(s) => Self::parse_str(s),
            None => Err(Error::config("path.in", "mapping entry must be a string")),
        }
    }

    /// Resolve the node name and signal names, fixing this entry's length.
    pub fn prepare(&mut self, nodes: &NodeList) -> Result<()> {
        let node = nodes.by_name(&self.node_name).ok_or_else(|| {
            Error::config(
                "path.in",
                format!("unknown source node '{}'", self.node_name),
            )
        })?;
        self.node = Some(Arc::clone(node));

        let signals = node.input.signals();

        match &self.kind {
            MappingKind::Data { first, last } => {
                let resolve = |token: &String| -> Result<usize> {
                    if let Ok(idx) = token.parse::<usize>() {
                        return Ok(idx);
                    }
                    signals.index_of(token).ok_or_else(|| {
                        Error::config(
                            "path.in",
                            format!("node '{}' has no signal '{token}'", self.node_name),
                        )
                    })
                };

                match first {
                    None => {
                        self.data_first = 0;
                        self.length = signals.len();
                    }
                    Some(first) => {
                        let f = resolve(first)?;
                        let l = match last {
                            Some(last) => resolve(last)?,
                            None => f,
                        };
                        if l < f {
                            return Err(Error::config("path.in", "range end before start"));
                        }
                        self.data_first = f;
                        self.length = l - f + 1;
                    }
                }
            }
            MappingKind::Timestamp(_) => self.length = 2,
            MappingKind::Header(_) => self.length = 1,
            MappingKind::Stats { .. } => self.length = 1,
        }

        Ok(())
    }

    pub fn node(&self) -> &Arc<Node> {
        self.node.as_ref().expect("mapping not prepared")
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Copy this entry's selection from `original` into its slots of
    /// `remapped`. Pure in its inputs, so re-running it with the same sample
    /// is idempotent.
    pub fn remap(&self, remapped: &mut Sample, original: &Sample) {
        let end = self.offset + self.length;
        if remapped.capacity() < end {
            return;
        }
        if remapped.length < end as u16 {
            remapped.length = end as u16;
        }

        let out = &mut remapped.data_raw_mut()[self.offset..end];

        match &self.kind {
            MappingKind::Data { .. } => {
                let data = original.data();
                for (i, slot) in out.iter_mut().enumerate() {
                    let src = self.data_first + i;
                    if src < data.len() {
                        *slot = data[src];
                    }
                }
            }
            MappingKind::Timestamp(kind) => {
                let ts = match kind {
                    TimestampKind::Origin => original.ts.origin,
                    TimestampKind::Received => original.ts.received,
                };
                out[0] = SignalData::integer(ts.sec);
                out[1] = SignalData::integer(ts.nsec);
            }
            MappingKind::Header(kind) => {
                out[0] = match kind {
                    HeaderKind::Sequence => SignalData::integer(original.sequence as i64),
                    HeaderKind::Length => SignalData::integer(original.length as i64),
                };
            }
            MappingKind::Stats { metric, ty } => {
                out[0] = SignalData::float(self.node().stats().get(*metric, *ty));
            }
        }
    }

    /// Signal descriptor for slot `index` (relative to this entry) of the
    /// muxed output.
    pub fn to_signal(&self, index: usize) -> Signal {
        match &self.kind {
            MappingKind::Data { .. } => {
                let signals = self.node().input.signals();
                match signals.get(self.data_first + index) {
                    Some(sig) => sig.as_ref().clone(),
                    None => Signal::new(
                        format!("{}.data{}", self.node_name, self.data_first + index),
                        "",
                        SignalType::Float,
                    ),
                }
            }
            MappingKind::Timestamp(kind) => {
                let which = match kind {
                    TimestampKind::Origin => "origin",
                    TimestampKind::Received => "received",
                };
                let part = if index == 0 { "sec" } else { "nsec" };
                Signal::new(
                    format!("{}.ts.{which}.{part}", self.node_name),
                    "",
                    SignalType::Integer,
                )
            }
            MappingKind::Header(kind) => {
                let which = match kind {
                    HeaderKind::Sequence => "sequence",
                    HeaderKind::Length => "length",
                };
                Signal::new(
                    format!("{}.hdr.{which}", self.node_name),
                    "",
                    SignalType::Integer,
                )
            }
            MappingKind::Stats { metric, .. } => Signal::new(
                format!("{}.stats.{}", self.node_name, metric.as_str()),
                "",
                SignalType::Float,
            ),
        }
    }
}

/// The mapping entries of one path, with their assigned offsets.
#[derive(Clone, Default)]
pub struct MappingList(Vec<MappingEntry>);

impl MappingList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single selector string or an array of them.
    pub fn parse(json: &Value) -> Result<Self> {
        let mut list = Self::new();
        match json {
            Value::String(_) => list.0.push(MappingEntry::parse_json(json)?),
            Value::Array(entries) => {
                for entry in entries {
                    list.0.push(MappingEntry::parse_json(entry)?);
                }
            }
            _ => return Err(Error::config("path.in", "expected string or array")),
        }
        Ok(list)
    }

    /// Resolve all entries and assign contiguous offsets. Returns the total
    /// muxed sample length.
    pub fn prepare(&mut self, nodes: &NodeList) -> Result<usize> {
        let mut offset = 0;
        for entry in &mut self.0 {
            entry.prepare(nodes)?;
            entry.offset = offset;
            offset += entry.length;
        }
        Ok(offset)
    }

    /// Apply every entry whose source is `node` to the muxed sample.
    pub fn remap_node(&self, remapped: &mut Sample, original: &Sample, node: &Arc<Node>) {
        for entry in &self.0 {
            if Arc::ptr_eq(entry.node(), node) {
                entry.remap(remapped, original);
            }
        }
    }

    /// Total number of slots in the muxed sample.
    pub fn total_length(&self) -> usize {
        self.0.iter().map(|e| e.length).sum()
    }

    /// The signal list of the muxed output sample.
    pub fn to_signals(&self) -> SignalList {
        let mut signals = SignalList::new();
        for entry in &self.0 {
            for i in 0..entry.length {
                signals.push(entry.to_signal(i));
            }
        }
        signals
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Distinct source nodes referenced by this list, in first-use order.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes: Vec<Arc<Node>> = vec![];
        for entry in &self.0 {
            let node = entry.node();
            if !nodes.iter().any(|n| Arc::ptr_eq(n, node)) {
                nodes.push(Arc::clone(node));
            }
        }
        nodes
    }
}
