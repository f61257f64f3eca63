//! Bounded in-memory node backed by lock-free rings.
//!
//! The node reads records some other thread injected through its
//! [`MemoryHandle`] and parks everything it is asked to write where the
//! handle can drain it. Closing the handle wakes a blocked reader with
//! [`TransportError::Closed`], which is how tests and loopback setups shut
//! a path down without cancelling threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::Backoff;

use crate::node::{Direction, Node, NodeId, TransportError};
use crate::sample::{Sample, SampleRef, Value, ValueFormat};
use crate::signal::SignalList;
use crate::timing::Timestamp;

static NEXT_NODE_ID: AtomicUsize = AtomicUsize::new(1);

/// One record exchanged with a memory node: the payload of a sample without
/// the pool bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// Producer-assigned sequence number; `None` lets the node number the
    /// record itself.
    pub sequence: Option<u64>,
    pub ts_origin: Timestamp,
    pub values: Vec<(Value, ValueFormat)>,
}

impl Record {
    /// A float-only record, the common case in tests.
    pub fn floats(sequence: u64, values: &[f64]) -> Self {
        Self {
            sequence: Some(sequence),
            ts_origin: Timestamp::now(),
            values: values
                .iter()
                .map(|&v| (Value::float(v), ValueFormat::Float))
                .collect(),
        }
    }

    fn from_sample(sample: &Sample) -> Self {
        Self {
            sequence: Some(sample.sequence),
            ts_origin: sample.ts_origin,
            values: (0..sample.len())
                .map(|i| (sample.value(i).unwrap_or_default(), sample.slot_format(i)))
                .collect(),
        }
    }
}

struct Shared {
    inbox: ArrayQueue<Record>,
    outbox: ArrayQueue<Record>,
    closed: AtomicBool,
}

/// External side of a [`MemoryNode`]: inject records for the node to read,
/// drain what it wrote, close it.
#[derive(Clone)]
pub struct MemoryHandle {
    shared: Arc<Shared>,
}

impl MemoryHandle {
    /// Queue a record for the node's next read. Fails when the ring is full.
    pub fn inject(&self, record: Record) -> Result<(), Record> {
        self.shared.inbox.push(record)
    }

    /// Remove everything the node has written so far.
    pub fn drain(&self) -> Vec<Record> {
        let mut out = Vec::new();
        while let Some(record) = self.shared.outbox.pop() {
            out.push(record);
        }
        out
    }

    pub fn written_count(&self) -> usize {
        self.shared.outbox.len()
    }

    /// Wake blocked readers with `Closed` once the inbox drains.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// In-memory transport for loopback paths and tests.
pub struct MemoryNode {
    name: String,
    id: NodeId,
    signals: SignalList,
    sequence: u64,
    shared: Arc<Shared>,
}

impl MemoryNode {
    /// Create a node whose inbox and outbox each hold `capacity` records,
    /// along with the external handle feeding and draining it.
    pub fn with_capacity(
        name: impl Into<String>,
        signals: SignalList,
        capacity: usize,
    ) -> (Self, MemoryHandle) {
        let shared = Arc::new(Shared {
            inbox: ArrayQueue::new(capacity),
            outbox: ArrayQueue::new(capacity),
            closed: AtomicBool::new(false),
        });
        let node = Self {
            name: name.into(),
            id: NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)),
            signals,
            sequence: 0,
            shared: shared.clone(),
        };
        (node, MemoryHandle { shared })
    }

    fn fill(&mut self, sample: &mut SampleRef, record: Record) {
        let body = sample
            .get_mut()
            .expect("read buffer sample not uniquely owned");
        body.reset();
        body.sequence = record.sequence.unwrap_or(self.sequence);
        self.sequence = body.sequence.wrapping_add(1);
        body.source = Some(self.id);
        body.ts_origin = if record.ts_origin.is_zero() {
            Timestamp::now()
        } else {
            record.ts_origin
        };
        body.ts_received = Timestamp::now();
        for (index, (value, fmt)) in record.values.iter().enumerate() {
            if index >= body.capacity() {
                break;
            }
            body.set(index, *value, *fmt);
        }
    }
}

impl Node for MemoryNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> NodeId {
        self.id
    }

    fn signals(&self, _direction: Direction) -> &SignalList {
        &self.signals
    }

    fn read(&mut self, samples: &mut [SampleRef]) -> Result<usize, TransportError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let backoff = Backoff::new();
        let first = loop {
            match self.shared.inbox.pop() {
                Some(record) => break record,
                None if self.shared.closed.load(Ordering::Acquire) => {
                    return Err(TransportError::Closed);
                }
                None => backoff.snooze(),
            }
        };

        self.fill(&mut samples[0], first);
        let mut filled = 1;
        while filled < samples.len() {
            match self.shared.inbox.pop() {
                Some(record) => {
                    self.fill(&mut samples[filled], record);
                    filled += 1;
                }
                None => break,
            }
        }
        Ok(filled)
    }

    fn write(&mut self, samples: &[SampleRef]) -> Result<usize, TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut written = 0;
        for sample in samples {
            if self.shared.outbox.push(Record::from_sample(sample)).is_err() {
                break;
            }
            written += 1;
        }
        Ok(written)
    }

    fn reverse(&mut self) -> Result<(), TransportError> {
        // Both rings live in the shared block, so swapping roles means
        // exchanging their contents.
        let drained_in = {
            let mut v = Vec::new();
            while let Some(r) = self.shared.inbox.pop() {
                v.push(r);
            }
            v
        };
        let drained_out = {
            let mut v = Vec::new();
            while let Some(r) = self.shared.outbox.pop() {
                v.push(r);
            }
            v
        };
        for record in drained_out {
            self.shared.inbox.push(record).ok();
        }
        for record in drained_in {
            self.shared.outbox.push(record).ok();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;

    #[test]
    fn test_read_fills_from_inbox() {
        let pool = Pool::new(8, 4);
        let (mut node, handle) =
            MemoryNode::with_capacity("mem", SignalList::floats(2), 16);

        handle.inject(Record::floats(10, &[1.0, 2.0])).unwrap();
        handle.inject(Record::floats(11, &[3.0, 4.0])).unwrap();

        let mut samples = pool.alloc_many(4);
        let read = node.read(&mut samples).unwrap();
        assert_eq!(read, 2);
        assert_eq!(samples[0].sequence, 10);
        assert_eq!(samples[1].value(1).unwrap().as_float(), 4.0);
        assert_eq!(samples[0].source, Some(node.id()));
        assert!(!samples[0].ts_received.is_zero());
    }

    #[test]
    fn test_read_after_close_reports_closed() {
        let pool = Pool::new(2, 1);
        let (mut node, handle) =
            MemoryNode::with_capacity("mem", SignalList::floats(1), 4);
        handle.inject(Record::floats(0, &[9.0])).unwrap();
        handle.close();

        let mut samples = pool.alloc_many(1);
        assert_eq!(node.read(&mut samples).unwrap(), 1);
        let err = node.read(&mut samples).unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn test_write_round_trips_values() {
        let pool = Pool::new(2, 2);
        let (mut node, handle) =
            MemoryNode::with_capacity("mem", SignalList::floats(2), 4);

        let mut smp = pool.alloc_one().unwrap();
        {
            let body = smp.get_mut().unwrap();
            body.sequence = 5;
            body.set(0, Value::float(1.5), ValueFormat::Float);
            body.set(1, Value::integer(2), ValueFormat::Integer);
        }

        assert_eq!(node.write(std::slice::from_ref(&smp)).unwrap(), 1);
        let records = handle.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, Some(5));
        assert_eq!(records[0].values[1].0.as_integer(), 2);
        assert_eq!(records[0].values[1].1, ValueFormat::Integer);
    }

    #[test]
    fn test_numbering_without_producer_sequence() {
        let pool = Pool::new(4, 1);
        let (mut node, handle) =
            MemoryNode::with_capacity("mem", SignalList::floats(1), 4);
        handle
            .inject(Record {
                sequence: None,
                ts_origin: Timestamp::default(),
                values: vec![(Value::float(0.0), ValueFormat::Float)],
            })
            .unwrap();
        handle
            .inject(Record {
                sequence: None,
                ts_origin: Timestamp::default(),
                values: vec![(Value::float(0.0), ValueFormat::Float)],
            })
            .unwrap();

        let mut samples = pool.alloc_many(2);
        node.read(&mut samples).unwrap();
        assert_eq!(samples[0].sequence, 0);
        assert_eq!(samples[1].sequence, 1);
        assert!(!samples[0].ts_origin.is_zero());
    }

    #[test]
    fn test_reverse_swaps_queues() {
        let pool = Pool::new(2, 1);
        let (mut node, handle) =
            MemoryNode::with_capacity("mem", SignalList::floats(1), 4);

        let mut smp = pool.alloc_one().unwrap();
        smp.get_mut().unwrap().set(0, Value::float(7.0), ValueFormat::Float);
        node.write(std::slice::from_ref(&smp)).unwrap();

        node.reverse().unwrap();

        // What was written is now readable.
        let mut samples = pool.alloc_many(1);
        assert_eq!(node.read(&mut samples).unwrap(), 1);
        assert_eq!(samples[0].value(0).unwrap().as_float(), 7.0);
        let _ = handle;
    }
}
