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

//! Exclusive mode: a handle that holds every stripe and unlocks iteration
//! over the table's actual contents, which point operations don't otherwise
//! allow (there is no "iterate everything" operation that takes only a
//! couple of stripes -- that would mean observing a torn snapshot).
//!
//! The handle can be released early with [`LockedTable::unlock`] while an
//! [`Iter`]/[`IterMut`] borrowed from it is still alive -- the iterator just
//! stops yielding anything the moment that happens, rather than the borrow
//! checker statically forbidding the release. That's what the `Mutex<Option<..>>`
//! guard field buys over holding the guard directly: releasing only needs a
//! shared borrow of the handle, which an outstanding iterator (itself holding
//! only a shared borrow) doesn't exclude.

use parking_lot::Mutex;
use std::hash::{BuildHasher, Hash};

use crate::error::{CuckooResult, Error};
use crate::stripe::MultiWriteGuard;
use crate::table::CuckooMap;

/// A handle returned by [`CuckooMap::lock_table`]. While active, every stripe
/// is held exclusively, so every other operation on the table blocks. Drop it
/// (or call [`Self::unlock`]) to let the table resume normal operation.
pub struct LockedTable<'a, K, V, H, const SLOTS: usize> {
    map: &'a CuckooMap<K, V, H, SLOTS>,
    guard: Mutex<Option<MultiWriteGuard<'a>>>,
}

impl<'a, K, V, H, const SLOTS: usize> LockedTable<'a, K, V, H, SLOTS>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    pub(crate) fn new(map: &'a CuckooMap<K, V, H, SLOTS>, guard: MultiWriteGuard<'a>) -> Self {
        LockedTable { map, guard: Mutex::new(Some(guard)) }
    }

    /// Whether this handle still holds the table's stripes. Goes permanently
    /// false once [`Self::unlock`] has been called (directly, or via a prior
    /// call racing a concurrent one -- idempotent either way).
    pub fn is_active(&self) -> bool {
        self.guard.lock().is_some()
    }

    /// The exact element count. Unlike [`CuckooMap::len`], this is never
    /// stale while the handle is active. Returns [`Error::TableInvalidated`]
    /// if [`Self::unlock`] was already called.
    pub fn len(&self) -> CuckooResult<usize> {
        if !self.is_active() {
            return Err(Error::TableInvalidated);
        }
        let count = self.map.bucket_count();
        Ok((0..count)
            .map(|b| (0..SLOTS).filter(|&i| self.map.bucket(b).occupied(i)).count())
            .sum())
    }

    /// Like [`Self::len`], but just the emptiness check.
    pub fn is_empty(&self) -> CuckooResult<bool> {
        Ok(self.len()? == 0)
    }

    /// A forward-and-backward iterator over every occupied `(&K, &V)` pair.
    /// Stops yielding (rather than panicking or reading freed state) if
    /// [`Self::unlock`] is called while the iterator is still alive.
    pub fn iter(&self) -> Iter<'_, 'a, K, V, H, SLOTS> {
        Iter::new(self)
    }

    /// Like [`Self::iter`], but yields `(&K, &mut V)`.
    pub fn iter_mut(&mut self) -> IterMut<'_, 'a, K, V, H, SLOTS> {
        IterMut::new(self)
    }

    /// Releases every stripe, letting the table resume normal operation.
    /// Idempotent -- calling this more than once (including concurrently
    /// from another thread holding the same `&LockedTable`) is a no-op after
    /// the first call. Any [`Iter`]/[`IterMut`] borrowed from this handle
    /// simply stops yielding items from the moment this returns.
    pub fn unlock(&self) {
        self.guard.lock().take();
    }
}

impl<'b, 'a: 'b, K, V, H, const SLOTS: usize> IntoIterator for &'b LockedTable<'a, K, V, H, SLOTS>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'b, 'a, K, V, H, SLOTS>;

    fn into_iter(self) -> Self::IntoIter {
        Iter::new(self)
    }
}

/// Linear index into the conceptual `bucket_count * SLOTS` flattened slot
/// space, used to drive both ends of the double-ended walk.
fn advance_to_occupied<K, V, H, const SLOTS: usize>(
    map: &CuckooMap<K, V, H, SLOTS>,
    mut idx: usize,
    end: usize,
) -> usize
where
    K: Hash + Eq,
    H: BuildHasher,
{
    while idx < end {
        let (b, s) = (idx / SLOTS, idx % SLOTS);
        if map.bucket(b).occupied(s) {
            break;
        }
        idx += 1;
    }
    idx
}

fn retreat_to_occupied<K, V, H, const SLOTS: usize>(
    map: &CuckooMap<K, V, H, SLOTS>,
    mut idx: usize,
    start: usize,
) -> usize
where
    K: Hash + Eq,
    H: BuildHasher,
{
    while idx > start {
        let (b, s) = ((idx - 1) / SLOTS, (idx - 1) % SLOTS);
        if map.bucket(b).occupied(s) {
            break;
        }
        idx -= 1;
    }
    idx
}

/// Forward-and-backward iterator over every occupied slot, borrowed from a
/// [`LockedTable`] rather than the table directly -- `'b` is however long the
/// caller holds the `&LockedTable`, which can be shorter than the table's own
/// `'a`, while `Item` still yields references that live for `'a`. Every call
/// to [`Iterator::next`]/[`DoubleEndedIterator::next_back`] checks
/// [`LockedTable::is_active`] first, so a concurrent [`LockedTable::unlock`]
/// just ends the iteration instead of reading a table that's no longer
/// exclusively held.
pub struct Iter<'b, 'a: 'b, K, V, H, const SLOTS: usize> {
    locked: &'b LockedTable<'a, K, V, H, SLOTS>,
    front: usize,
    back: usize,
}

impl<'b, 'a: 'b, K, V, H, const SLOTS: usize> Iter<'b, 'a, K, V, H, SLOTS>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    fn new(locked: &'b LockedTable<'a, K, V, H, SLOTS>) -> Self {
        let map = locked.map;
        let end = map.bucket_count() * SLOTS;
        let front = advance_to_occupied(map, 0, end);
        let back = retreat_to_occupied(map, end, front);
        Iter { locked, front, back }
    }
}

impl<'b, 'a: 'b, K, V, H, const SLOTS: usize> Iterator for Iter<'b, 'a, K, V, H, SLOTS>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.locked.is_active() || self.front >= self.back {
            return None;
        }
        let map = self.locked.map;
        let (b, s) = (self.front / SLOTS, self.front % SLOTS);
        let item = (map.bucket(b).key(s), map.bucket(b).val(s));
        self.front = advance_to_occupied(map, self.front + 1, self.back);
        Some(item)
    }
}

impl<'b, 'a: 'b, K, V, H, const SLOTS: usize> DoubleEndedIterator for Iter<'b, 'a, K, V, H, SLOTS>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        if !self.locked.is_active() || self.front >= self.back {
            return None;
        }
        let map = self.locked.map;
        let last = self.back - 1;
        let (b, s) = (last / SLOTS, last % SLOTS);
        let item = (map.bucket(b).key(s), map.bucket(b).val(s));
        self.back = retreat_to_occupied(map, last, self.front);
        Some(item)
    }
}

/// Like [`Iter`], but yields `(&K, &mut V)`. Safe because every slot in the
/// flattened range `[front, back)` is visited at most once across the
/// lifetime of the iterator, so no two `&mut V` ever alias; built from only a
/// shared borrow of the [`LockedTable`] since [`CuckooMap::bucket_mut`] itself
/// only requires `&self`.
pub struct IterMut<'b, 'a: 'b, K, V, H, const SLOTS: usize> {
    locked: &'b LockedTable<'a, K, V, H, SLOTS>,
    front: usize,
    back: usize,
}

impl<'b, 'a: 'b, K, V, H, const SLOTS: usize> IterMut<'b, 'a, K, V, H, SLOTS>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    fn new(locked: &'b LockedTable<'a, K, V, H, SLOTS>) -> Self {
        let map = locked.map;
        let end = map.bucket_count() * SLOTS;
        let front = advance_to_occupied(map, 0, end);
        let back = retreat_to_occupied(map, end, front);
        IterMut { locked, front, back }
    }
}

impl<'b, 'a: 'b, K, V, H, const SLOTS: usize> Iterator for IterMut<'b, 'a, K, V, H, SLOTS>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.locked.is_active() || self.front >= self.back {
            return None;
        }
        let map = self.locked.map;
        let (b, s) = (self.front / SLOTS, self.front % SLOTS);
        let key = map.bucket(b).key(s) as *const K;
        let val = map.bucket_mut(b).val_mut(s) as *mut V;
        // SAFETY: `front` only ever visits each flattened slot index once
        // across this iterator's lifetime, so this is the only `&mut V`
        // handed out for this slot while the iterator is alive.
        let item = unsafe { (&*key, &mut *val) };
        self.front = advance_to_occupied(map, self.front + 1, self.back);
        Some(item)
    }
}

impl<'b, 'a: 'b, K, V, H, const SLOTS: usize> DoubleEndedIterator for IterMut<'b, 'a, K, V, H, SLOTS>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        if !self.locked.is_active() || self.front >= self.back {
            return None;
        }
        let map = self.locked.map;
        let last = self.back - 1;
        let (b, s) = (last / SLOTS, last % SLOTS);
        let key = map.bucket(b).key(s) as *const K;
        let val = map.bucket_mut(b).val_mut(s) as *mut V;
        // SAFETY: see `next`.
        let item = unsafe { (&*key, &mut *val) };
        self.back = retreat_to_occupied(map, last, self.front);
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::RandomState;

    #[test]
    fn iterates_every_inserted_pair_exactly_once() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(64);
        for i in 0..40u32 {
            map.insert(i, i * i);
        }
        let locked = map.lock_table();
        assert_eq!(locked.len().unwrap(), 40);
        let mut seen: Vec<u32> = locked.iter().map(|(k, _)| *k).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 40);
    }

    #[test]
    fn backward_iteration_matches_forward_reversed() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(32);
        for i in 0..20u32 {
            map.insert(i, i);
        }
        let locked = map.lock_table();
        let forward: Vec<u32> = locked.iter().map(|(k, _)| *k).collect();
        let mut backward: Vec<u32> = locked.iter().rev().map(|(k, _)| *k).collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn iter_mut_allows_in_place_updates() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(32);
        for i in 0..10u32 {
            map.insert(i, 0);
        }
        {
            let mut locked = map.lock_table();
            for (_, v) in locked.iter_mut() {
                *v += 1;
            }
        }
        for i in 0..10u32 {
            assert_eq!(map.find(&i), Some(1));
        }
    }

    #[test]
    fn locked_table_blocks_other_operations_until_released() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let map: Arc<CuckooMap<u32, u32, RandomState, 4>> = Arc::new(CuckooMap::with_capacity(64));
        let locked = map.lock_table();
        let map2 = map.clone();
        let handle = thread::spawn(move || {
            map2.insert(1, 1);
        });
        thread::sleep(Duration::from_millis(50));
        assert_eq!(map.len(), 0, "insert must still be blocked while the table is locked");
        drop(locked);
        handle.join().unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn unlock_is_idempotent_and_invalidates_non_iterator_accessors() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(16);
        map.insert(1, 1);
        let locked = map.lock_table();
        assert!(locked.is_active());
        assert_eq!(locked.len().unwrap(), 1);

        locked.unlock();
        assert!(!locked.is_active());
        assert!(matches!(locked.len(), Err(Error::TableInvalidated)));
        assert!(matches!(locked.is_empty(), Err(Error::TableInvalidated)));

        // calling it again is a harmless no-op, not a double-release panic.
        locked.unlock();
        assert!(!locked.is_active());
    }

    #[test]
    fn iterator_stops_yielding_once_unlocked_mid_iteration() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(16);
        for i in 0..5u32 {
            map.insert(i, i);
        }
        let locked = map.lock_table();
        let mut it = locked.iter();
        assert!(it.next().is_some());
        locked.unlock();
        assert_eq!(it.next(), None, "iterator must stop yielding once its table is released");
    }
}
