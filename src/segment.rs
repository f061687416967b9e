/*
 * Created on Thu Jan 18 2024
 *
 * This file is part of cuckoo-map.
 * cuckoo-map is a concurrent, resizable hash table built on bucketized
 * cuckoo hashing with lock striping, online resize, and an exclusive
 * locked-table iteration mode, aimed at workloads that need low-latency
 * point operations under heavy concurrent read/write access.
 *
 * Copyright (c) 2024, the cuckoo-map authors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! A lazily-allocated segmented array: a fixed virtual size, but the backing
//! segments are only allocated once an index inside them is actually needed.
//! This is the backing store for the stripe array -- a table with a small
//! bucket count shouldn't have to pay for (say) 65536 stripes up front.

use core::mem;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::ptr;

use parking_lot::Mutex;

const ORD_ACQ: Ordering = Ordering::Acquire;
const ORD_REL: Ordering = Ordering::Release;
const ORD_RLX: Ordering = Ordering::Relaxed;

/// One segment slot: null until allocated, and never freed or replaced once set
/// (other than by [`LazySegmentedArray::clear`], which requires exclusive access).
struct Segment<T> {
    ptr: AtomicPtr<T>,
}

impl<T> Segment<T> {
    const fn empty() -> Self {
        Segment {
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// A fixed-capacity array of `2^(offset_bits + segment_bits)` slots, addressed
/// by a single scheme regardless of how much of it has actually been backed by
/// memory. `offset_bits` controls the size of each segment (`2^offset_bits`
/// elements); `segment_bits` controls how many segments there are.
pub(crate) struct LazySegmentedArray<T> {
    offset_bits: u32,
    offset_mask: usize,
    segments: Box<[Segment<T>]>,
    /// Monotonic count of segments known to be allocated, from segment 0
    /// onward. Used only for `allocated_size`; allocation itself is decided by
    /// checking each segment's pointer directly.
    allocated_segments: AtomicUsize,
    alloc_lock: Mutex<()>,
}

impl<T> LazySegmentedArray<T> {
    pub(crate) fn new(offset_bits: u32, segment_bits: u32) -> Self {
        let num_segments = 1usize << segment_bits;
        let segments = (0..num_segments).map(|_| Segment::empty()).collect();
        LazySegmentedArray {
            offset_bits,
            offset_mask: (1usize << offset_bits) - 1,
            segments,
            allocated_segments: AtomicUsize::new(0),
            alloc_lock: Mutex::new(()),
        }
    }

    /// The full virtual capacity, regardless of what has been allocated.
    pub(crate) fn capacity(&self) -> usize {
        self.segments.len() << self.offset_bits
    }

    /// The number of elements that are backed by allocated memory, counted as
    /// a contiguous prefix starting from index 0.
    pub(crate) fn allocated_size(&self) -> usize {
        self.allocated_segments.load(ORD_RLX) << self.offset_bits
    }

    /// Ensures the first `n` elements are backed by memory, allocating whole
    /// segments as needed. `factory` is called once per newly-allocated slot.
    pub(crate) fn allocate(&self, n: usize, factory: impl Fn() -> T) {
        if n == 0 {
            return;
        }
        let needed_segments = ((n - 1) >> self.offset_bits) + 1;
        let needed_segments = needed_segments.min(self.segments.len());
        if self.allocated_segments.load(ORD_ACQ) >= needed_segments {
            return;
        }
        let _guard = self.alloc_lock.lock();
        // re-check: another thread may have finished allocating while we
        // waited for the lock.
        let already = self.allocated_segments.load(ORD_RLX);
        if already >= needed_segments {
            return;
        }
        let segment_len = 1usize << self.offset_bits;
        for seg in &self.segments[already..needed_segments] {
            if seg.ptr.load(ORD_RLX).is_null() {
                let mut data: Vec<T> = Vec::with_capacity(segment_len);
                for _ in 0..segment_len {
                    data.push(factory());
                }
                let boxed = data.into_boxed_slice();
                let raw = Box::into_raw(boxed) as *mut T;
                seg.ptr.store(raw, ORD_REL);
            }
        }
        self.allocated_segments.store(needed_segments, ORD_REL);
    }

    /// Returns a reference to the element at `index`. The caller must have
    /// previously called `allocate` covering this index -- this is unchecked
    /// in the sense that an un-allocated segment yields a dangling reference.
    pub(crate) fn get(&self, index: usize) -> &T {
        let segment_idx = index >> self.offset_bits;
        let offset = index & self.offset_mask;
        let ptr = self.segments[segment_idx].ptr.load(ORD_ACQ);
        debug_assert!(!ptr.is_null(), "index {index} read before its segment was allocated");
        unsafe { &*ptr.add(offset) }
    }

    /// Destroys every allocated segment. Requires exclusive access through
    /// `&mut self` because in-flight readers may be holding references into a
    /// segment.
    pub(crate) fn clear(&mut self) {
        let segment_len = 1usize << self.offset_bits;
        for seg in self.segments.iter_mut() {
            let raw = mem::replace(seg.ptr.get_mut(), ptr::null_mut());
            if !raw.is_null() {
                let slice_ptr = ptr::slice_from_raw_parts_mut(raw, segment_len);
                unsafe {
                    drop(Box::from_raw(slice_ptr));
                }
            }
        }
        self.allocated_segments.store(0, ORD_RLX);
    }
}

impl<T> Drop for LazySegmentedArray<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

// SAFETY: a `LazySegmentedArray<T>` behaves like a `Box<[T]>` of the same
// length once allocated -- access is through `&T`, never moved out, so the
// same bounds that make `Box<[T]>: Send + Sync` apply here.
unsafe impl<T: Send> Send for LazySegmentedArray<T> {}
unsafe impl<T: Sync> Sync for LazySegmentedArray<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize as Counter;
    use std::sync::Arc;

    #[test]
    fn allocate_rounds_up_to_whole_segments() {
        let arr: LazySegmentedArray<u32> = LazySegmentedArray::new(4, 8); // segments of 16
        arr.allocate(5, || 0);
        assert_eq!(arr.allocated_size(), 16);
        arr.allocate(20, || 0);
        assert_eq!(arr.allocated_size(), 32);
    }

    #[test]
    fn get_returns_factory_produced_values() {
        let arr: LazySegmentedArray<u32> = LazySegmentedArray::new(2, 4);
        arr.allocate(4, || 7);
        for i in 0..4 {
            assert_eq!(*arr.get(i), 7);
        }
    }

    #[test]
    fn allocate_is_idempotent_and_does_not_reallocate() {
        let calls = Arc::new(Counter::new(0));
        let arr: LazySegmentedArray<u32> = LazySegmentedArray::new(2, 4);
        let c = calls.clone();
        arr.allocate(4, move || {
            c.fetch_add(1, Ordering::Relaxed);
            0
        });
        let first = calls.load(Ordering::Relaxed);
        assert_eq!(first, 4);
        let c = calls.clone();
        arr.allocate(4, move || {
            c.fetch_add(1, Ordering::Relaxed);
            0
        });
        assert_eq!(calls.load(Ordering::Relaxed), first, "re-allocating an already-covered prefix must be a no-op");
    }

    #[test]
    fn capacity_is_virtual_size() {
        let arr: LazySegmentedArray<u8> = LazySegmentedArray::new(4, 4);
        assert_eq!(arr.capacity(), 1 << 8);
        assert_eq!(arr.allocated_size(), 0);
    }
}
