//! Single-producer, multi-reader ring buffer of sample references.
//!
//! The producer publishes samples at a shared `head` cursor; every reader
//! owns a registered cursor trailing it. A slot keeps one queue-owned
//! reference until the last reader has pulled past it, at which point
//! [`MultiQueue::pull_many`] hands the released sample back to the caller
//! for recycling. The producer never waits on a slow reader: a push that
//! would overrun the slowest cursor returns short and the caller deals with
//! the backpressure.
//!
//! Cursor publication follows a plain acquire/release discipline: a
//! reader's release-store of its cursor makes all of its slot traffic
//! visible to the producer's acquire-loads during the slowest-reader scan.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::sample::SampleRef;

/// Handle to a registered reader cursor. Cursors live inside the queue;
/// readers address them by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderId(usize);

struct QueueSlot {
    /// Readers that have not yet pulled past this slot. Zero means the
    /// queue's reference has been handed out and the slot is reusable.
    remaining: AtomicUsize,
    value: UnsafeCell<Option<SampleRef>>,
}

// Slot values are only written by the single producer into released slots
// and only taken by the one reader whose countdown reaches zero.
unsafe impl Sync for QueueSlot {}

/// Single-producer, multi-reader ring of sample references.
///
/// Exactly one thread may push; any number of pre-registered readers may
/// peek and pull concurrently. Reader registration is a construction-time
/// operation (`&mut self`) and not supported while the queue is in use.
pub struct MultiQueue {
    slots: Box<[QueueSlot]>,
    mask: u64,
    head: CachePadded<AtomicU64>,
    readers: Vec<CachePadded<AtomicU64>>,
}

impl MultiQueue {
    /// Create a ring with at least `capacity` slots, rounded up to the next
    /// power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue must hold at least one slot");
        let capacity = capacity.next_power_of_two();
        let slots: Box<[QueueSlot]> = (0..capacity)
            .map(|_| QueueSlot {
                remaining: AtomicUsize::new(0),
                value: UnsafeCell::new(None),
            })
            .collect();
        Self {
            slots,
            mask: capacity as u64 - 1,
            head: CachePadded::new(AtomicU64::new(0)),
            readers: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Absolute producer cursor: the index the next push will occupy.
    pub fn head(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    pub fn reader_cursor(&self, reader: ReaderId) -> u64 {
        self.readers[reader.0].load(Ordering::Acquire)
    }

    /// Register a new reader starting at absolute index `starting_at`.
    ///
    /// Must happen before the producer writes beyond `starting_at`; taking
    /// `&mut self` rules out concurrent operation.
    pub fn reader_add(&mut self, starting_at: u64) -> ReaderId {
        debug_assert!(
            starting_at >= self.head.load(Ordering::Relaxed).saturating_sub(self.mask + 1),
            "reader registered behind the ring window"
        );
        self.readers
            .push(CachePadded::new(AtomicU64::new(starting_at)));
        ReaderId(self.readers.len() - 1)
    }

    fn slowest_reader(&self, head: u64) -> u64 {
        self.readers
            .iter()
            .map(|cursor| cursor.load(Ordering::Acquire))
            .min()
            .unwrap_or(head)
    }

    /// Push the leading items of `items` into the ring, advancing the
    /// producer cursor by the number accepted and draining them from the
    /// vector. The rejected tail stays in `items`.
    ///
    /// Only the owning producer thread may call this.
    pub fn push_many(&self, items: &mut Vec<SampleRef>) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let slowest = self.slowest_reader(head);
        let free = self.capacity() - (head - slowest) as usize;
        let accept = items.len().min(free);
        if accept == 0 {
            return 0;
        }

        for (i, item) in items.drain(..accept).enumerate() {
            let slot = &self.slots[((head + i as u64) & self.mask) as usize];
            debug_assert_eq!(
                slot.remaining.load(Ordering::Relaxed),
                0,
                "producer overwrote an unreleased slot"
            );
            // The slot was fully released; no reader can touch it before
            // the head advances past it.
            unsafe { *slot.value.get() = Some(item) };
            slot.remaining
                .store(self.readers.len(), Ordering::Relaxed);
        }

        self.head.store(head + accept as u64, Ordering::Release);
        accept
    }

    /// Non-destructive peek of up to `n` samples starting at absolute
    /// index `base`. Returns cloned references.
    ///
    /// `base` must not lie behind the calling reader's own cursor; slots
    /// the caller has already pulled past may be gone.
    pub fn get_many(&self, n: usize, base: u64) -> Vec<SampleRef> {
        let head = self.head.load(Ordering::Acquire);
        let available = head.saturating_sub(base).min(n as u64);
        debug_assert!(
            available == 0 || head - base <= self.mask + 1,
            "peek outside the ring window"
        );

        let mut out = Vec::with_capacity(available as usize);
        for index in base..base + available {
            let slot = &self.slots[(index & self.mask) as usize];
            let value = unsafe { (*slot.value.get()).as_ref() };
            out.push(
                value
                    .expect("peeked a released queue slot")
                    .clone(),
            );
        }
        out
    }

    /// Advance the reader's cursor by up to `n`, returning the samples
    /// whose last reader has now passed. The caller owns the returned
    /// references; dropping them recycles the samples.
    ///
    /// Each cursor must be advanced from a single thread at a time.
    pub fn pull_many(&self, reader: ReaderId, n: usize) -> Vec<SampleRef> {
        let cursor = self.readers[reader.0].load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let advance = head.saturating_sub(cursor).min(n as u64);

        let mut released = Vec::new();
        for index in cursor..cursor + advance {
            let slot = &self.slots[(index & self.mask) as usize];
            if slot.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                // Last reader past this slot: take the queue's reference.
                let value = unsafe { (*slot.value.get()).take() };
                released.push(value.expect("released slot was empty"));
            }
        }

        self.readers[reader.0].store(cursor + advance, Ordering::Release);
        released
    }
}

impl std::fmt::Debug for MultiQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiQueue")
            .field("capacity", &self.capacity())
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("readers", &self.readers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;
    use std::sync::Arc;
    use std::thread;

    fn numbered(pool: &Pool, n: usize, start: u64) -> Vec<SampleRef> {
        let mut smps = pool.alloc_many(n);
        assert_eq!(smps.len(), n);
        for (i, smp) in smps.iter_mut().enumerate() {
            smp.get_mut().unwrap().sequence = start + i as u64;
        }
        smps
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(MultiQueue::new(5).capacity(), 8);
        assert_eq!(MultiQueue::new(8).capacity(), 8);
    }

    #[test]
    fn test_push_peek_pull_single_reader() {
        let pool = Pool::new(16, 1);
        let mut queue = MultiQueue::new(8);
        let reader = queue.reader_add(0);

        let mut batch = numbered(&pool, 4, 0);
        assert_eq!(queue.push_many(&mut batch), 4);
        assert!(batch.is_empty());
        assert_eq!(queue.head(), 4);

        let peeked = queue.get_many(4, 0);
        assert_eq!(peeked.len(), 4);
        assert_eq!(peeked[2].sequence, 2);

        // Peeking does not advance anything.
        assert_eq!(queue.reader_cursor(reader), 0);
        drop(peeked);

        let released = queue.pull_many(reader, 4);
        assert_eq!(released.len(), 4);
        assert_eq!(queue.reader_cursor(reader), 4);
        drop(released);
        assert_eq!(pool.free_count(), 16);
    }

    #[test]
    fn test_backpressure_stalled_reader() {
        let pool = Pool::new(32, 1);
        let mut queue = MultiQueue::new(8);
        let _reader = queue.reader_add(0);

        let mut pushed = 0;
        loop {
            let mut batch = numbered(&pool, 1, pushed);
            let accepted = queue.push_many(&mut batch);
            if accepted == 0 {
                break;
            }
            pushed += 1;
        }
        // A reader that never advances caps the ring at its capacity.
        assert_eq!(pushed, 8);
    }

    #[test]
    fn test_release_waits_for_all_readers() {
        let pool = Pool::new(16, 1);
        let mut queue = MultiQueue::new(8);
        let fast = queue.reader_add(0);
        let slow = queue.reader_add(0);

        let mut batch = numbered(&pool, 3, 0);
        queue.push_many(&mut batch);

        let released = queue.pull_many(fast, 3);
        assert!(released.is_empty());
        assert_eq!(pool.in_flight(), 3);

        let released = queue.pull_many(slow, 3);
        assert_eq!(released.len(), 3);
        drop(released);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_reader_order_matches_producer_order() {
        let pool = Pool::new(64, 1);
        let mut queue = MultiQueue::new(16);
        let reader = queue.reader_add(0);
        let queue = Arc::new(queue);
        let total = 1000u64;

        let producer = {
            let queue = queue.clone();
            let pool = pool.clone();
            thread::spawn(move || {
                let mut next = 0u64;
                while next < total {
                    let mut batch = numbered(&pool, 1, next);
                    if queue.push_many(&mut batch) == 1 {
                        next += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut seen = 0u64;
        while seen < total {
            let peeked = queue.get_many(4, seen);
            for smp in &peeked {
                assert_eq!(smp.sequence, seen);
                seen += 1;
            }
            let count = peeked.len();
            drop(peeked);
            drop(queue.pull_many(reader, count));
            if count == 0 {
                thread::yield_now();
            }
        }

        producer.join().unwrap();
        assert_eq!(pool.free_count(), 64);
    }

    #[test]
    fn test_drop_recycles_queued_samples() {
        let pool = Pool::new(8, 1);
        let mut queue = MultiQueue::new(8);
        let _reader = queue.reader_add(0);

        let mut batch = numbered(&pool, 5, 0);
        queue.push_many(&mut batch);
        assert_eq!(pool.in_flight(), 5);

        drop(queue);
        assert_eq!(pool.in_flight(), 0);
    }
}
