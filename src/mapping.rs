//! Projection of sample, statistics, header and timestamp fields into a
//! remapped sample.
//!
//! A mapping token selects one source:
//!
//! ```text
//! <node>?.<source>[.<subfield>[.<detail>]][<range>]
//! ```
//!
//! `stats.<id>.<agg>` reads a statistics aggregate, `hdr.<field>` a header
//! field, `ts.<id>` a timestamp as two integer slots (seconds, nanoseconds)
//! and `data[<a>-<b>]` an inclusive slot range of the original sample, with
//! `data[<a>]` as single-slot sugar and plain `data` taking the original's
//! full length. Every mapping entry is applied independently; entries never
//! bleed into one another.

use ahash::AHashMap;

use crate::node::NodeId;
use crate::sample::{Sample, Value, ValueFormat};
use crate::stats::{Aggregate, Metric, Stats};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("invalid mapping token {0:?}")]
    InvalidFormat(String),
    #[error("mapping refers to unknown node {0:?}")]
    UnknownNode(String),
    #[error("mapping of {len} slots at offset {offset} exceeds capacity {capacity}")]
    Overflow {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("mapping requires statistics which are not available")]
    MissingStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    Sequence,
    Length,
    Id,
    Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    Origin,
    Received,
    Sent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingSource {
    Stats { metric: Metric, agg: Aggregate },
    Header(HeaderField),
    Timestamp(TimestampField),
    /// Slots `[first, first + count)` of the original sample; `count` of
    /// `None` takes the original's full length.
    Data {
        first: usize,
        count: Option<usize>,
    },
}

/// One parsed mapping token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub node: Option<NodeId>,
    pub source: MappingSource,
}

impl MappingEntry {
    /// Parse a mapping token. When `nodes` is given the token must carry a
    /// `<node>.` prefix naming a registered node.
    pub fn parse(
        token: &str,
        nodes: Option<&AHashMap<String, NodeId>>,
    ) -> Result<Self, MappingError> {
        let invalid = || MappingError::InvalidFormat(token.to_string());

        let (node, rest) = match nodes {
            Some(registry) => {
                let (name, rest) = token.split_once('.').ok_or_else(invalid)?;
                let id = registry
                    .get(name)
                    .copied()
                    .ok_or_else(|| MappingError::UnknownNode(name.to_string()))?;
                (Some(id), rest)
            }
            None => (None, token),
        };

        let (body, range) = match rest.split_once('[') {
            Some((body, range)) => {
                let range = range.strip_suffix(']').ok_or_else(invalid)?;
                (body, Some(range))
            }
            None => (rest, None),
        };

        let mut parts = body.split('.');
        let source = match parts.next().ok_or_else(invalid)? {
            "stats" => {
                let metric: Metric = parts
                    .next()
                    .ok_or_else(invalid)?
                    .parse()
                    .map_err(|_| invalid())?;
                let agg: Aggregate = parts
                    .next()
                    .ok_or_else(invalid)?
                    .parse()
                    .map_err(|_| invalid())?;
                MappingSource::Stats { metric, agg }
            }
            "hdr" => {
                let field = match parts.next().ok_or_else(invalid)? {
                    "sequence" => HeaderField::Sequence,
                    "length" => HeaderField::Length,
                    "id" => HeaderField::Id,
                    "format" => HeaderField::Format,
                    _ => return Err(invalid()),
                };
                MappingSource::Header(field)
            }
            "ts" => {
                let field = match parts.next().ok_or_else(invalid)? {
                    "origin" => TimestampField::Origin,
                    "received" => TimestampField::Received,
                    "sent" => TimestampField::Sent,
                    _ => return Err(invalid()),
                };
                MappingSource::Timestamp(field)
            }
            "data" => match range {
                None => MappingSource::Data {
                    first: 0,
                    count: None,
                },
                Some(range) => {
                    let (first, last) = match range.split_once('-') {
                        Some((a, b)) => (a, b),
                        None => (range, range),
                    };
                    let first: usize = first.parse().map_err(|_| invalid())?;
                    let last: usize = last.parse().map_err(|_| invalid())?;
                    if last < first {
                        return Err(invalid());
                    }
                    MappingSource::Data {
                        first,
                        count: Some(last - first + 1),
                    }
                }
            },
            _ => return Err(invalid()),
        };

        // A range suffix is only meaningful on the data source.
        if range.is_some() && !matches!(source, MappingSource::Data { .. }) {
            return Err(invalid());
        }
        // No garbage after the token.
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self { node, source })
    }

    /// Number of remapped slots this entry writes for an original sample of
    /// length `original_len`.
    pub fn slot_count(&self, original_len: usize) -> usize {
        match &self.source {
            MappingSource::Stats { .. } | MappingSource::Header(_) => 1,
            MappingSource::Timestamp(_) => 2,
            MappingSource::Data { count, .. } => count.unwrap_or(original_len),
        }
    }

    /// Write this entry's slots at `offset`, returning the number written.
    pub fn apply(
        &self,
        offset: usize,
        remapped: &mut Sample,
        original: &Sample,
        stats: Option<&Stats>,
    ) -> Result<usize, MappingError> {
        let len = self.slot_count(original.len());
        if offset + len > remapped.capacity() {
            return Err(MappingError::Overflow {
                offset,
                len,
                capacity: remapped.capacity(),
            });
        }

        match &self.source {
            MappingSource::Stats { metric, agg } => {
                let stats = stats.ok_or(MappingError::MissingStats)?;
                let histogram = stats.histogram(*metric);
                match agg {
                    Aggregate::Total => remapped.set(
                        offset,
                        Value::integer(histogram.total() as i64),
                        ValueFormat::Integer,
                    ),
                    _ => remapped.set(
                        offset,
                        Value::float(histogram.aggregate(*agg)),
                        ValueFormat::Float,
                    ),
                }
            }
            MappingSource::Header(field) => {
                let value = match field {
                    HeaderField::Sequence => original.sequence as i64,
                    HeaderField::Length => original.len() as i64,
                    HeaderField::Id => original.source.map_or(0, |id| id.0 as i64),
                    HeaderField::Format => original.format_bitmap() as i64,
                };
                remapped.set(offset, Value::integer(value), ValueFormat::Integer);
            }
            MappingSource::Timestamp(field) => {
                let ts = match field {
                    TimestampField::Origin => original.ts_origin,
                    TimestampField::Received => original.ts_received,
                    TimestampField::Sent => original.ts_sent,
                };
                remapped.set(offset, Value::integer(ts.sec), ValueFormat::Integer);
                remapped.set(
                    offset + 1,
                    Value::integer(ts.nsec as i64),
                    ValueFormat::Integer,
                );
            }
            MappingSource::Data { first, .. } => {
                for (slot, index) in (*first..first + len).enumerate() {
                    match original.value(index) {
                        Some(value) => remapped.set(
                            offset + slot,
                            value,
                            original.slot_format(index),
                        ),
                        // Reads past the original's length yield float zero.
                        None => remapped.set(
                            offset + slot,
                            Value::float(0.0),
                            ValueFormat::Float,
                        ),
                    }
                }
            }
        }

        Ok(len)
    }
}

/// An ordered list of mapping entries writing consecutive slot spans.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingList {
    entries: Vec<MappingEntry>,
}

impl MappingList {
    pub fn parse(
        tokens: &[&str],
        nodes: Option<&AHashMap<String, NodeId>>,
    ) -> Result<Self, MappingError> {
        let entries = tokens
            .iter()
            .map(|token| MappingEntry::parse(token, nodes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild `remapped` from `original`: header fields are carried over,
    /// then every entry writes its span in order.
    pub fn remap(
        &self,
        remapped: &mut Sample,
        original: &Sample,
        stats: Option<&Stats>,
    ) -> Result<(), MappingError> {
        remapped.sequence = original.sequence;
        remapped.source = original.source;
        remapped.ts_origin = original.ts_origin;
        remapped.ts_received = original.ts_received;
        remapped.ts_sent = original.ts_sent;

        let mut offset = 0;
        for entry in &self.entries {
            offset += entry.apply(offset, remapped, original, stats)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;
    use crate::timing::Timestamp;

    fn original(pool: &Pool) -> crate::sample::SampleRef {
        let mut smp = pool.alloc_one().unwrap();
        let body = smp.get_mut().unwrap();
        body.sequence = 7;
        body.ts_origin = Timestamp::new(100, 250);
        body.ts_received = Timestamp::new(101, 500);
        for i in 0..4 {
            body.set(i, Value::float(i as f64 + 0.5), ValueFormat::Float);
        }
        body.set_format(2, ValueFormat::Integer);
        body.set_value(2, Value::integer(42));
        smp
    }

    #[test]
    fn test_parse_valid_tokens() {
        assert_eq!(
            MappingEntry::parse("data[2-5]", None).unwrap().source,
            MappingSource::Data {
                first: 2,
                count: Some(4)
            }
        );
        assert_eq!(
            MappingEntry::parse("data[3]", None).unwrap().source,
            MappingSource::Data {
                first: 3,
                count: Some(1)
            }
        );
        assert_eq!(
            MappingEntry::parse("data", None).unwrap().source,
            MappingSource::Data {
                first: 0,
                count: None
            }
        );
        assert_eq!(
            MappingEntry::parse("hdr.sequence", None).unwrap().source,
            MappingSource::Header(HeaderField::Sequence)
        );
        assert_eq!(
            MappingEntry::parse("ts.origin", None).unwrap().source,
            MappingSource::Timestamp(TimestampField::Origin)
        );
        assert_eq!(
            MappingEntry::parse("stats.owd.mean", None).unwrap().source,
            MappingSource::Stats {
                metric: Metric::OneWayDelay,
                agg: Aggregate::Mean
            }
        );
    }

    #[test]
    fn test_parse_node_prefix() {
        let mut registry = AHashMap::new();
        registry.insert("pmu1".to_string(), NodeId(3));

        let entry = MappingEntry::parse("pmu1.data[0]", Some(&registry)).unwrap();
        assert_eq!(entry.node, Some(NodeId(3)));

        let err = MappingEntry::parse("ghost.data", Some(&registry)).unwrap_err();
        assert_eq!(err, MappingError::UnknownNode("ghost".to_string()));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MappingEntry::parse("data[5-2]", None).is_err());
        assert!(MappingEntry::parse("data[x]", None).is_err());
        assert!(MappingEntry::parse("hdr.sequence.extra", None).is_err());
        assert!(MappingEntry::parse("ts.soon", None).is_err());
        assert!(MappingEntry::parse("stats.owd", None).is_err());
        assert!(MappingEntry::parse("stats.owd.median", None).is_err());
        assert!(MappingEntry::parse("hdr.sequence[0]", None).is_err());
        assert!(MappingEntry::parse("bogus", None).is_err());
    }

    #[test]
    fn test_data_range_and_zero_fill() {
        let pool = Pool::new(4, 8);
        let orig = original(&pool);
        let mut out = pool.alloc_one().unwrap();

        let list = MappingList::parse(&["data[2-5]"], None).unwrap();
        list.remap(out.get_mut().unwrap(), &orig, None).unwrap();

        assert_eq!(out.len(), 4);
        assert_eq!(out.value(0).unwrap().as_integer(), 42);
        assert_eq!(out.slot_format(0), ValueFormat::Integer);
        assert_eq!(out.value(1).unwrap().as_float(), 3.5);
        // Slots 4 and 5 lie past the original's length.
        assert_eq!(out.value(2).unwrap().as_float(), 0.0);
        assert_eq!(out.value(3).unwrap().as_float(), 0.0);
        assert_eq!(out.slot_format(3), ValueFormat::Float);
    }

    #[test]
    fn test_entries_are_independent() {
        let pool = Pool::new(4, 8);
        let orig = original(&pool);
        let mut out = pool.alloc_one().unwrap();

        let mut stats = Stats::default();
        stats.update(Metric::Gap, 1.0);
        stats.update(Metric::Gap, 3.0);

        let list =
            MappingList::parse(&["stats.gap.mean", "ts.origin", "hdr.sequence"], None).unwrap();
        list.remap(out.get_mut().unwrap(), &orig, Some(&stats))
            .unwrap();

        // One stats slot, two timestamp slots, one header slot; the stats
        // entry must not bleed into the timestamp span.
        assert_eq!(out.len(), 4);
        assert_eq!(out.value(0).unwrap().as_float(), 2.0);
        assert_eq!(out.value(1).unwrap().as_integer(), 100);
        assert_eq!(out.value(2).unwrap().as_integer(), 250);
        assert_eq!(out.value(3).unwrap().as_integer(), 7);
    }

    #[test]
    fn test_stats_total_is_integer_formatted() {
        let pool = Pool::new(4, 4);
        let orig = original(&pool);
        let mut out = pool.alloc_one().unwrap();

        let mut stats = Stats::default();
        stats.update(Metric::Skipped, 1.0);
        stats.update(Metric::Skipped, 1.0);

        let list = MappingList::parse(&["stats.skipped.total"], None).unwrap();
        list.remap(out.get_mut().unwrap(), &orig, Some(&stats))
            .unwrap();
        assert_eq!(out.slot_format(0), ValueFormat::Integer);
        assert_eq!(out.value(0).unwrap().as_integer(), 2);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let pool = Pool::new(4, 2);
        let orig = original(&pool);
        let mut out = pool.alloc_one().unwrap();

        let list = MappingList::parse(&["data[0-3]"], None).unwrap();
        let err = list
            .remap(out.get_mut().unwrap(), &orig, None)
            .unwrap_err();
        assert!(matches!(err, MappingError::Overflow { len: 4, .. }));
    }

    #[test]
    fn test_full_data_takes_original_length() {
        let pool = Pool::new(4, 8);
        let orig = original(&pool);
        let mut out = pool.alloc_one().unwrap();

        let list = MappingList::parse(&["data"], None).unwrap();
        list.remap(out.get_mut().unwrap(), &orig, None).unwrap();
        assert_eq!(out.len(), orig.len());
        assert_eq!(out.value(3).unwrap().as_float(), 3.5);
    }
}
