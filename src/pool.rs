//! Fixed-capacity arena of reference-counted samples.
//!
//! The pool owns every sample it ever hands out; a sample slot cycles
//! between the lock-free free list and live [`SampleRef`] handles and is
//! reclaimed exactly once per allocation. Allocation never blocks: on
//! underrun the caller receives fewer samples than requested and is expected
//! to proceed with the partial vector.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::CachePadded;

use crate::sample::{Sample, SampleRef};

pub(crate) struct PoolSlot {
    pub(crate) refcnt: CachePadded<AtomicUsize>,
    pub(crate) sample: UnsafeCell<Sample>,
}

// Slots are shared across threads but accessed under the refcount protocol:
// the sample body is only touched mutably by a unique handle or by the
// allocator while the slot sits on the free list.
unsafe impl Sync for PoolSlot {}

pub(crate) struct PoolInner {
    pub(crate) slots: Box<[PoolSlot]>,
    free: ArrayQueue<usize>,
}

impl PoolInner {
    pub(crate) fn recycle(&self, index: usize) {
        debug_assert_eq!(
            self.slots[index].refcnt.load(Ordering::Relaxed),
            0,
            "recycling a live sample"
        );
        let pushed = self.free.push(index).is_ok();
        debug_assert!(pushed, "pool free list overflow");
    }
}

/// A fixed arena of equal-sized sample slots with a lock-free free list.
///
/// Cloning the pool clones a handle to the same arena; the arena lives
/// until the last handle and the last in-flight sample are gone.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool of `count` samples, each with `capacity` value slots.
    pub fn new(count: usize, capacity: usize) -> Self {
        assert!(count > 0, "pool must hold at least one sample");
        let slots: Box<[PoolSlot]> = (0..count)
            .map(|_| PoolSlot {
                refcnt: CachePadded::new(AtomicUsize::new(0)),
                sample: UnsafeCell::new(Sample::with_capacity(capacity)),
            })
            .collect();
        let free = ArrayQueue::new(count);
        for index in 0..count {
            free.push(index).ok();
        }
        Self {
            inner: Arc::new(PoolInner { slots, free }),
        }
    }

    /// Total number of sample slots.
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Samples currently sitting on the free list.
    pub fn free_count(&self) -> usize {
        self.inner.free.len()
    }

    /// Samples currently held by live handles.
    pub fn in_flight(&self) -> usize {
        self.capacity() - self.free_count()
    }

    /// Draw up to `n` fresh samples, each with a reference count of one.
    ///
    /// Returns fewer than `n` on underrun, possibly none. Never blocks.
    pub fn alloc_many(&self, n: usize) -> Vec<SampleRef> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match self.inner.free.pop() {
                Some(index) => {
                    let slot = &self.inner.slots[index];
                    // The slot is unreachable from any handle while on the
                    // free list, so this reset cannot race.
                    unsafe { (*slot.sample.get()).reset() };
                    slot.refcnt.store(1, Ordering::Release);
                    out.push(SampleRef {
                        pool: self.inner.clone(),
                        index,
                    });
                }
                None => break,
            }
        }
        out
    }

    pub fn alloc_one(&self) -> Option<SampleRef> {
        self.alloc_many(1).pop()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity())
            .field("free", &self.free_count())
            .finish()
    }
}
