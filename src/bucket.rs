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

//! A bucket: `SLOTS` fixed positions, each holding an optional `(K, V)` pair
//! in-place (no per-element heap allocation) plus its occupied flag and
//! partial-key tag. A bucket has no lock of its own -- the stripe it maps to
//! is what serializes access to it.

use core::mem::MaybeUninit;

/// `SLOTS` is expected to be <= 8 so the occupied set fits in one byte; the
/// default of 4 matches the source spec's `slot_per_bucket`.
pub(crate) struct Bucket<K, V, const SLOTS: usize> {
    tags: [u8; SLOTS],
    occupied: u8,
    slots: [MaybeUninit<(K, V)>; SLOTS],
}

impl<K, V, const SLOTS: usize> Bucket<K, V, SLOTS> {
    const _SLOTS_FIT_IN_BITMASK: () = assert!(SLOTS <= 8, "SLOTS must fit in an 8-bit occupied mask");

    pub(crate) fn empty() -> Self {
        let _ = Self::_SLOTS_FIT_IN_BITMASK;
        Bucket {
            tags: [0u8; SLOTS],
            occupied: 0,
            // SAFETY: an array of `MaybeUninit<T>` needs no initialization of
            // its elements -- only the array's own (trivial) layout.
            slots: unsafe { MaybeUninit::uninit().assume_init() },
        }
    }

    #[inline]
    pub(crate) fn occupied(&self, i: usize) -> bool {
        self.occupied & (1 << i) != 0
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        let full_mask = ((1u16 << SLOTS) - 1) as u8;
        self.occupied == full_mask
    }

    #[inline]
    pub(crate) fn first_empty(&self) -> Option<usize> {
        (0..SLOTS).find(|&i| !self.occupied(i))
    }

    #[inline]
    pub(crate) fn partial(&self, i: usize) -> u8 {
        self.tags[i]
    }

    #[inline]
    pub(crate) fn key(&self, i: usize) -> &K {
        debug_assert!(self.occupied(i));
        unsafe { &(*self.slots[i].as_ptr()).0 }
    }

    #[inline]
    pub(crate) fn val(&self, i: usize) -> &V {
        debug_assert!(self.occupied(i));
        unsafe { &(*self.slots[i].as_ptr()).1 }
    }

    #[inline]
    pub(crate) fn val_mut(&mut self, i: usize) -> &mut V {
        debug_assert!(self.occupied(i));
        unsafe { &mut (*self.slots[i].as_mut_ptr()).1 }
    }

    /// Constructs a new slot in place. The slot must currently be empty.
    pub(crate) fn set(&mut self, i: usize, tag: u8, key: K, val: V) {
        debug_assert!(!self.occupied(i));
        self.slots[i].write((key, val));
        self.tags[i] = tag;
        self.occupied |= 1 << i;
    }

    /// Destroys slot `i` in place and returns the pair that was there. The
    /// slot must currently be occupied.
    pub(crate) fn erase(&mut self, i: usize) -> (K, V) {
        debug_assert!(self.occupied(i));
        self.occupied &= !(1 << i);
        // SAFETY: slot was occupied, so it holds a valid, owned (K, V); we
        // just cleared the occupied bit so it won't be dropped again.
        unsafe { self.slots[i].assume_init_read() }
    }

    /// Move-constructs `other[j]` from `self[i]`, then destroys `self[i]`.
    /// `self` and `other` must be distinct buckets -- use [`Self::move_within`]
    /// when an eviction chain's alt bucket happens to swing back to its own
    /// bucket. Caller must hold the stripe lock(s) covering both.
    pub(crate) fn move_to(&mut self, i: usize, other: &mut Bucket<K, V, SLOTS>, j: usize) {
        debug_assert!(self.occupied(i));
        debug_assert!(!other.occupied(j));
        let tag = self.tags[i];
        self.occupied &= !(1 << i);
        let pair = unsafe { self.slots[i].assume_init_read() };
        other.slots[j].write(pair);
        other.tags[j] = tag;
        other.occupied |= 1 << j;
    }

    /// Like [`Self::move_to`], but for moving a slot to another slot of the
    /// *same* bucket -- the rare case where `alt()` swings back to its own
    /// bucket. `i` and `j` must be distinct.
    pub(crate) fn move_within(&mut self, i: usize, j: usize) {
        debug_assert_ne!(i, j);
        debug_assert!(self.occupied(i));
        debug_assert!(!self.occupied(j));
        let tag = self.tags[i];
        self.occupied &= !(1 << i);
        let pair = unsafe { self.slots[i].assume_init_read() };
        self.slots[j].write(pair);
        self.tags[j] = tag;
        self.occupied |= 1 << j;
    }
}

impl<K, V, const SLOTS: usize> Drop for Bucket<K, V, SLOTS> {
    fn drop(&mut self) {
        for i in 0..SLOTS {
            if self.occupied(i) {
                unsafe {
                    self.slots[i].assume_init_drop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_erase_round_trip() {
        let mut b: Bucket<String, u32, 4> = Bucket::empty();
        assert!(!b.occupied(0));
        b.set(0, 0xAB, "hello".to_string(), 42);
        assert!(b.occupied(0));
        assert_eq!(b.partial(0), 0xAB);
        assert_eq!(b.key(0), "hello");
        assert_eq!(*b.val(0), 42);
        let (k, v) = b.erase(0);
        assert_eq!(k, "hello");
        assert_eq!(v, 42);
        assert!(!b.occupied(0));
    }

    #[test]
    fn first_empty_and_is_full() {
        let mut b: Bucket<u32, u32, 4> = Bucket::empty();
        assert_eq!(b.first_empty(), Some(0));
        for i in 0..4 {
            b.set(i, 0, i as u32, i as u32);
        }
        assert_eq!(b.first_empty(), None);
        assert!(b.is_full());
    }

    #[test]
    fn move_to_transfers_ownership() {
        let mut a: Bucket<String, u32, 4> = Bucket::empty();
        let mut c: Bucket<String, u32, 4> = Bucket::empty();
        a.set(1, 0x7, "moved".to_string(), 99);
        a.move_to(1, &mut c, 2);
        assert!(!a.occupied(1));
        assert!(c.occupied(2));
        assert_eq!(c.key(2), "moved");
        assert_eq!(*c.val(2), 99);
        assert_eq!(c.partial(2), 0x7);
    }

    #[test]
    fn move_within_transfers_ownership_inside_one_bucket() {
        let mut a: Bucket<String, u32, 4> = Bucket::empty();
        a.set(0, 0x3, "same-bucket".to_string(), 7);
        a.move_within(0, 1);
        assert!(!a.occupied(0));
        assert!(a.occupied(1));
        assert_eq!(a.key(1), "same-bucket");
        assert_eq!(*a.val(1), 7);
        assert_eq!(a.partial(1), 0x3);
    }

    #[test]
    fn drop_destroys_only_occupied_slots() {
        use std::rc::Rc;
        let counter = Rc::new(());
        {
            let mut b: Bucket<Rc<()>, (), 4> = Bucket::empty();
            b.set(0, 0, counter.clone(), ());
            b.set(2, 0, counter.clone(), ());
            assert_eq!(Rc::strong_count(&counter), 3);
        }
        assert_eq!(Rc::strong_count(&counter), 1);
    }
}
