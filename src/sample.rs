//! Time-stamped vectors of typed values, the unit of data flowing through a
//! path.
//!
//! Samples are created by a [`Pool`](crate::pool::Pool) and never directly.
//! [`SampleRef`] is the owning handle: cloning increments the reference
//! count, dropping decrements it, and the last drop recycles the slot into
//! its pool. While at least one handle exists the record stays alive; a
//! handle that is provably unique (`ref_count() == 1`) grants mutable
//! access, mirroring the `Arc::get_mut` contract.

use std::ops::Deref;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use crate::node::NodeId;
use crate::pool::PoolInner;
use crate::timing::Timestamp;

/// Number representation of one value slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueFormat {
    #[default]
    Float,
    Integer,
}

/// One untyped value slot. The interpretation lives in the sample's format
/// bitmap, parallel to the value array.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Value(u64);

impl Value {
    pub fn float(v: f64) -> Self {
        Self(v.to_bits())
    }

    pub const fn integer(v: i64) -> Self {
        Self(v as u64)
    }

    pub fn as_float(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub const fn as_integer(self) -> i64 {
        self.0 as i64
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Value({:#018x})", self.0)
    }
}

/// A sample record.
///
/// `length` counts the valid leading slots and never exceeds the immutable
/// `capacity`. The format bitmap tags the first 64 slots; slots beyond that
/// are implicitly float.
#[derive(Debug)]
pub struct Sample {
    pub sequence: u64,
    pub source: Option<NodeId>,
    pub ts_origin: Timestamp,
    pub ts_received: Timestamp,
    pub ts_sent: Timestamp,
    length: usize,
    format: u64,
    values: Box<[Value]>,
}

impl Sample {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            sequence: 0,
            source: None,
            ts_origin: Timestamp::default(),
            ts_received: Timestamp::default(),
            ts_sent: Timestamp::default(),
            length: 0,
            format: 0,
            values: vec![Value::default(); capacity].into_boxed_slice(),
        }
    }

    /// Reset all mutable state for reuse. Capacity is preserved.
    pub(crate) fn reset(&mut self) {
        self.sequence = 0;
        self.source = None;
        self.ts_origin = Timestamp::default();
        self.ts_received = Timestamp::default();
        self.ts_sent = Timestamp::default();
        self.length = 0;
        self.format = 0;
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    pub const fn len(&self) -> usize {
        self.length
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Raw format bitmap; bit i set means slot i holds an integer.
    pub const fn format_bitmap(&self) -> u64 {
        self.format
    }

    /// Grow `length` to at least `len`. Shrinking is not possible here;
    /// `truncate` exists for hooks that drop trailing slots.
    pub fn widen(&mut self, len: usize) {
        assert!(len <= self.capacity(), "sample length exceeds capacity");
        if len > self.length {
            self.length = len;
        }
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.length {
            self.length = len;
        }
    }

    pub fn value(&self, index: usize) -> Option<Value> {
        (index < self.length).then(|| self.values[index])
    }

    pub fn values(&self) -> &[Value] {
        &self.values[..self.length]
    }

    pub fn set_value(&mut self, index: usize, value: Value) {
        assert!(index < self.capacity(), "sample slot out of range");
        self.values[index] = value;
        self.widen(index + 1);
    }

    pub fn slot_format(&self, index: usize) -> ValueFormat {
        if index < 64 && self.format & (1 << index) != 0 {
            ValueFormat::Integer
        } else {
            ValueFormat::Float
        }
    }

    /// Tag the representation of one slot, widening `length` monotonically.
    pub fn set_format(&mut self, index: usize, fmt: ValueFormat) {
        assert!(index < self.capacity(), "sample slot out of range");
        if index < 64 {
            match fmt {
                ValueFormat::Integer => self.format |= 1 << index,
                ValueFormat::Float => self.format &= !(1 << index),
            }
        }
        self.widen(index + 1);
    }

    /// Write a tagged value into one slot.
    pub fn set(&mut self, index: usize, value: Value, fmt: ValueFormat) {
        self.set_value(index, value);
        self.set_format(index, fmt);
    }

    /// Deep copy of every field, including the typed value slots.
    ///
    /// The destination keeps its own capacity; the source length must fit.
    pub fn copy_from(&mut self, src: &Sample) {
        assert!(
            src.length <= self.capacity(),
            "copy source longer than destination capacity"
        );
        self.sequence = src.sequence;
        self.source = src.source;
        self.ts_origin = src.ts_origin;
        self.ts_received = src.ts_received;
        self.ts_sent = src.ts_sent;
        self.format = src.format;
        self.length = src.length;
        self.values[..src.length].copy_from_slice(&src.values[..src.length]);
    }
}

/// Owning, reference-counted handle to a pooled sample.
pub struct SampleRef {
    pub(crate) pool: Arc<PoolInner>,
    pub(crate) index: usize,
}

// The handle only touches its slot through the refcount protocol below;
// the arena itself is Sync.
unsafe impl Send for SampleRef {}
unsafe impl Sync for SampleRef {}

impl SampleRef {
    pub fn ref_count(&self) -> usize {
        self.pool.slots[self.index].refcnt.load(Ordering::Acquire)
    }

    /// Mutable access, available only while this is the sole handle.
    pub fn get_mut(&mut self) -> Option<&mut Sample> {
        if self.pool.slots[self.index].refcnt.load(Ordering::Acquire) == 1 {
            // Sole owner: no other handle can read or write this slot.
            Some(unsafe { &mut *self.pool.slots[self.index].sample.get() })
        } else {
            None
        }
    }
}

impl Deref for SampleRef {
    type Target = Sample;

    fn deref(&self) -> &Sample {
        // A live handle keeps the slot out of the free list, and mutation
        // requires unique ownership, so shared reads are safe.
        unsafe { &*self.pool.slots[self.index].sample.get() }
    }
}

impl Clone for SampleRef {
    fn clone(&self) -> Self {
        self.pool.slots[self.index]
            .refcnt
            .fetch_add(1, Ordering::Relaxed);
        Self {
            pool: self.pool.clone(),
            index: self.index,
        }
    }
}

impl Drop for SampleRef {
    fn drop(&mut self) {
        if self.pool.slots[self.index]
            .refcnt
            .fetch_sub(1, Ordering::Release)
            == 1
        {
            fence(Ordering::Acquire);
            self.pool.recycle(self.index);
        }
    }
}

impl std::fmt::Debug for SampleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRef")
            .field("index", &self.index)
            .field("sequence", &self.sequence)
            .field("length", &self.len())
            .finish()
    }
}

/// Deep-copy `src` samples into the matching `dst` handles.
///
/// Destinations that are not uniquely owned are skipped. Returns the number
/// of samples copied.
pub fn copy_many(dst: &mut [SampleRef], src: &[SampleRef]) -> usize {
    let mut copied = 0;
    for (d, s) in dst.iter_mut().zip(src) {
        if let Some(body) = d.get_mut() {
            body.copy_from(s);
            copied += 1;
        }
    }
    copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;

    #[test]
    fn test_value_roundtrip() {
        assert_eq!(Value::float(1.5).as_float(), 1.5);
        assert_eq!(Value::integer(-7).as_integer(), -7);
        assert_eq!(Value::default().as_float(), 0.0);
    }

    #[test]
    fn test_format_bitmap_widens_length() {
        let pool = Pool::new(4, 8);
        let mut smp = pool.alloc_one().unwrap();
        let body = smp.get_mut().unwrap();

        assert_eq!(body.len(), 0);
        body.set_format(3, ValueFormat::Integer);
        assert_eq!(body.len(), 4);
        assert_eq!(body.slot_format(3), ValueFormat::Integer);
        assert_eq!(body.slot_format(2), ValueFormat::Float);

        // Widening is monotonic: tagging an earlier slot keeps the length.
        body.set_format(0, ValueFormat::Integer);
        assert_eq!(body.len(), 4);

        body.set_format(3, ValueFormat::Float);
        assert_eq!(body.slot_format(3), ValueFormat::Float);
    }

    #[test]
    fn test_deep_copy() {
        let pool = Pool::new(4, 8);
        let mut a = pool.alloc_one().unwrap();
        let mut b = pool.alloc_one().unwrap();

        {
            let body = a.get_mut().unwrap();
            body.sequence = 42;
            body.set(0, Value::float(1.25), ValueFormat::Float);
            body.set(1, Value::integer(9), ValueFormat::Integer);
        }

        b.get_mut().unwrap().copy_from(&a);
        assert_eq!(b.sequence, 42);
        assert_eq!(b.len(), 2);
        assert_eq!(b.value(0).unwrap().as_float(), 1.25);
        assert_eq!(b.value(1).unwrap().as_integer(), 9);
        assert_eq!(b.slot_format(1), ValueFormat::Integer);
    }

    #[test]
    fn test_get_mut_requires_unique_handle() {
        let pool = Pool::new(4, 8);
        let mut smp = pool.alloc_one().unwrap();
        assert!(smp.get_mut().is_some());

        let other = smp.clone();
        assert_eq!(smp.ref_count(), 2);
        assert!(smp.get_mut().is_none());

        drop(other);
        assert!(smp.get_mut().is_some());
    }

    #[test]
    fn test_copy_many_skips_shared_destinations() {
        let pool = Pool::new(8, 4);
        let src = pool.alloc_many(2);
        let mut dst = pool.alloc_many(2);
        let hold = dst[1].clone();

        assert_eq!(copy_many(&mut dst, &src), 1);
        drop(hold);
    }
}
