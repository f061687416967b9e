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

//! The table itself: construction, the lock-acquisition protocol shared by
//! every operation, and the point operations (`find`, `insert`, `erase`,
//! `update`, `upsert`) that don't need a full table lock.

use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::bucket::Bucket;
use crate::cuckoo;
use crate::error::{CuckooResult, Error, Retry};
use crate::hash::{alt, primary, KeyHash};
use crate::resize;
use crate::segment::LazySegmentedArray;
use crate::stripe::{MultiReadGuard, MultiWriteGuard, Stripe};

/// Number of stripes, fixed for the table's lifetime. `stripe_of(b) = b & (L -
/// 1)`; once the bucket count exceeds `L` multiple buckets alias onto the
/// same stripe, trading a little concurrency for a lock array that doesn't
/// have to grow.
const DEFAULT_NUM_STRIPES: usize = 1 << 16;
/// `LazySegmentedArray` geometry for the stripe array: 64 stripes per segment,
/// 1024 segments, so a freshly-constructed small table only pays for one 64-
/// stripe segment (4 KiB) instead of the full 64 Ki up front.
const STRIPE_SEGMENT_OFFSET_BITS: u32 = 6;
const STRIPE_SEGMENT_BITS: u32 = 10;

const ORD_ACQ: Ordering = Ordering::Acquire;
const ORD_REL: Ordering = Ordering::Release;

/// A concurrent, resizable hash table backed by bucketized cuckoo hashing with
/// lock striping. Up to `SLOTS` entries share a bucket; every key has exactly
/// two candidate buckets (primary and alt), found in expected *O*(1) even
/// while other threads are reading, writing, or growing the table.
///
/// `SLOTS` defaults to 4, matching the source design's `slot_per_bucket`.
pub struct CuckooMap<K, V, H = RandomState, const SLOTS: usize = 4> {
    pub(crate) hashpower: AtomicU32,
    pub(crate) buckets: AtomicPtr<Bucket<K, V, SLOTS>>,
    pub(crate) stripes: LazySegmentedArray<Stripe>,
    pub(crate) num_stripes: usize,
    pub(crate) hasher: H,
    min_load_factor_bits: AtomicU32,
    max_hashpower: AtomicU32,
    /// Serializes resize attempts; held only around the decision of *whether*
    /// and *how* to grow, never around an entire point operation.
    pub(crate) resize_lock: Mutex<()>,
}

// SAFETY: all interior mutability (`buckets`, `stripes`, the atomics) is
// guarded by the stripe-locking protocol that every access path in this
// crate goes through; there is no thread-local or `!Send` state.
unsafe impl<K: Send, V: Send, H: Send, const SLOTS: usize> Send for CuckooMap<K, V, H, SLOTS> {}
unsafe impl<K: Send + Sync, V: Send + Sync, H: Sync, const SLOTS: usize> Sync
    for CuckooMap<K, V, H, SLOTS>
{
}

impl<K, V, const SLOTS: usize> CuckooMap<K, V, RandomState, SLOTS>
where
    K: Hash + Eq,
{
    /// Creates a table sized to hold at least `capacity` entries, using the
    /// default hasher.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<K, V, H, const SLOTS: usize> CuckooMap<K, V, H, SLOTS>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    /// The number of slots in each bucket.
    pub const SLOTS_PER_BUCKET: usize = SLOTS;

    /// Creates a table sized to hold at least `initial_capacity` entries,
    /// using the given hasher. Use [`Self::with_capacity`] instead when
    /// [`RandomState`] is good enough.
    pub fn new(initial_capacity: usize, hasher: H) -> Self {
        Self::with_capacity_and_hasher(initial_capacity, hasher)
    }

    /// The hasher this table was built with.
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    pub(crate) fn with_capacity_and_hasher(capacity: usize, hasher: H) -> Self {
        let hashpower = hashpower_for_capacity(capacity, SLOTS);
        Self::new_with_hashpower(hashpower, hasher)
    }

    pub(crate) fn new_with_hashpower(hashpower: u32, hasher: H) -> Self {
        let bucket_count = 1usize << hashpower;
        let buckets = alloc_buckets::<K, V, SLOTS>(bucket_count);
        let stripes = LazySegmentedArray::new(STRIPE_SEGMENT_OFFSET_BITS, STRIPE_SEGMENT_BITS);
        let num_stripes = DEFAULT_NUM_STRIPES;
        stripes.allocate(bucket_count.min(num_stripes), Stripe::default);
        debug!("new table: hashpower={hashpower} buckets={bucket_count} slots_per_bucket={SLOTS}");
        CuckooMap {
            hashpower: AtomicU32::new(hashpower),
            buckets: AtomicPtr::new(buckets),
            stripes,
            num_stripes,
            hasher,
            min_load_factor_bits: AtomicU32::new(0.0f32.to_bits()),
            max_hashpower: AtomicU32::new(0),
            resize_lock: Mutex::new(()),
        }
    }

    // -- inspection -----------------------------------------------------

    /// Current bucket count, `2^hashpower`.
    pub fn bucket_count(&self) -> usize {
        1usize << self.hashpower.load(ORD_ACQ)
    }

    /// Current hashpower.
    pub fn hashpower(&self) -> u32 {
        self.hashpower.load(ORD_ACQ)
    }

    /// Total slot capacity: `bucket_count() * SLOTS`.
    pub fn capacity(&self) -> usize {
        self.bucket_count() * SLOTS
    }

    /// Approximate element count: the sum of every stripe's counter, read
    /// without taking any locks. Concurrent writers can make this stale the
    /// instant it returns; call [`Self::lock_table`] for an exact count.
    pub fn len(&self) -> usize {
        let relevant = self.bucket_count().min(self.num_stripes);
        (0..relevant).map(|i| self.stripe(i).elems()).sum()
    }

    /// Approximately empty, with the same staleness caveat as [`Self::len`].
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate load factor: `len() as f64 / capacity() as f64`.
    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }

    /// The minimum load factor automatic growth will leave the table at.
    /// Growth that would undershoot this returns [`Error::LoadFactorTooLow`].
    pub fn minimum_load_factor(&self) -> f32 {
        f32::from_bits(self.min_load_factor_bits.load(ORD_ACQ))
    }

    /// Sets the minimum load factor automatic growth will leave the table at.
    /// Must be in `[0.0, 1.0]`.
    pub fn set_minimum_load_factor(&self, lf: f32) -> CuckooResult<()> {
        if !(0.0..=1.0).contains(&lf) {
            return Err(Error::InvalidArgument("minimum_load_factor must be in [0.0, 1.0]"));
        }
        self.min_load_factor_bits.store(lf.to_bits(), ORD_REL);
        Ok(())
    }

    /// The hashpower automatic growth will never exceed, or `None` if
    /// unbounded.
    pub fn maximum_hashpower(&self) -> Option<u32> {
        match self.max_hashpower.load(ORD_ACQ) {
            0 => None,
            p => Some(p),
        }
    }

    /// Sets the hashpower automatic growth will never exceed, or `None` to
    /// leave it unbounded.
    pub fn set_maximum_hashpower(&self, max: Option<u32>) -> CuckooResult<()> {
        let encoded = max.unwrap_or(0);
        if encoded != 0 && encoded < self.hashpower() {
            return Err(Error::InvalidArgument(
                "maximum_hashpower must not be below the current hashpower",
            ));
        }
        self.max_hashpower.store(encoded, ORD_REL);
        Ok(())
    }

    // -- stripe plumbing --------------------------------------------------

    #[inline]
    pub(crate) fn stripe_of(&self, bucket: usize) -> usize {
        bucket & (self.num_stripes - 1)
    }

    #[inline]
    pub(crate) fn stripe(&self, idx: usize) -> &Stripe {
        self.stripes.get(idx)
    }

    pub(crate) fn ensure_stripes_allocated(&self, up_to_bucket_count: usize) {
        let need = up_to_bucket_count.min(self.num_stripes);
        self.stripes.allocate(need, Stripe::default);
    }

    /// Locks the given stripe indices for exclusive access, in ascending
    /// order with duplicates collapsed, so two concurrent callers that need
    /// an overlapping set of stripes can never deadlock against each other.
    pub(crate) fn lock_stripes_write(&self, indices: &[usize]) -> MultiWriteGuard<'_> {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let guards = sorted.iter().map(|&i| self.stripe(i).write()).collect();
        MultiWriteGuard::new(guards)
    }

    pub(crate) fn lock_stripes_read(&self, indices: &[usize]) -> MultiReadGuard<'_> {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let guards = sorted.iter().map(|&i| self.stripe(i).read()).collect();
        MultiReadGuard::new(guards)
    }

    #[inline]
    pub(crate) fn bucket(&self, idx: usize) -> &Bucket<K, V, SLOTS> {
        // SAFETY: `idx` is always a bucket index produced by `primary`/`alt`
        // under the current hashpower, which the caller has just confirmed
        // is still current while holding this bucket's stripe lock.
        unsafe { &*self.buckets.load(ORD_ACQ).add(idx) }
    }

    #[inline]
    pub(crate) fn bucket_mut(&self, idx: usize) -> &mut Bucket<K, V, SLOTS> {
        // SAFETY: see `bucket`; exclusive access is additionally guaranteed
        // by the caller holding this bucket's stripe as a write lock.
        unsafe { &mut *self.buckets.load(ORD_ACQ).add(idx) }
    }

    /// Snapshots the hashpower, computes both candidate buckets for `kh`,
    /// takes their stripes for shared access, and re-checks the hashpower
    /// didn't change underneath the snapshot -- retrying from scratch if it
    /// did, since a resize invalidates the bucket indices entirely.
    fn snapshot_and_lock_read(&self, kh: KeyHash) -> (u32, usize, usize, MultiReadGuard<'_>) {
        loop {
            let p = self.hashpower.load(ORD_ACQ);
            let b1 = primary(kh.hash, p);
            let b2 = alt(b1, kh.tag, p);
            let guard = self.lock_stripes_read(&[self.stripe_of(b1), self.stripe_of(b2)]);
            if self.hashpower.load(ORD_ACQ) == p {
                return (p, b1, b2, guard);
            }
            drop(guard);
            trace!("snapshot_and_lock_read: hashpower changed mid-acquisition, retrying");
        }
    }

    fn snapshot_and_lock_write(&self, kh: KeyHash) -> (u32, usize, usize, MultiWriteGuard<'_>) {
        loop {
            let p = self.hashpower.load(ORD_ACQ);
            let b1 = primary(kh.hash, p);
            let b2 = alt(b1, kh.tag, p);
            let guard = self.lock_stripes_write(&[self.stripe_of(b1), self.stripe_of(b2)]);
            if self.hashpower.load(ORD_ACQ) == p {
                return (p, b1, b2, guard);
            }
            drop(guard);
            trace!("snapshot_and_lock_write: hashpower changed mid-acquisition, retrying");
        }
    }

    /// Scans `b1` and `b2` for `key`. Checks each occupied slot's tag before
    /// its key -- a tag mismatch rules a slot out without ever comparing the
    /// full key, which matters when `K::eq` isn't cheap.
    fn find_slot(&self, b1: usize, b2: usize, tag: u8, key: &K) -> Option<(usize, usize)> {
        for b in [b1, b2] {
            let bucket = self.bucket(b);
            for i in 0..SLOTS {
                if bucket.occupied(i) && bucket.partial(i) == tag && bucket.key(i) == key {
                    return Some((b, i));
                }
            }
        }
        None
    }

    // -- point operations: lookup -----------------------------------------

    /// Looks up `key` and applies `f` to its value without cloning it,
    /// returning `None` if the key isn't present. Holds only a shared lock on
    /// the two stripes covering `key`'s candidate buckets.
    pub fn find_with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        let kh = KeyHash::new(key, &self.hasher);
        let (_p, b1, b2, _guard) = self.snapshot_and_lock_read(kh);
        let (b, i) = self.find_slot(b1, b2, kh.tag, key)?;
        Some(f(self.bucket(b).val(i)))
    }

    /// Looks up `key`, cloning its value out. Prefer [`Self::find_with`] to
    /// avoid the clone when the value is large or not `Clone`.
    pub fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.find_with(key, |v| v.clone())
    }

    /// Like [`Self::find`], but returns [`Error::NotFound`] instead of `None`
    /// for callers that want `?` to propagate absence as an error.
    pub fn try_find(&self, key: &K) -> CuckooResult<V>
    where
        V: Clone,
    {
        self.find(key).ok_or(Error::NotFound)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.find_with(key, |_| ()).is_some()
    }

    // -- point operations: mutation ----------------------------------------

    /// Removes `key`, returning whether it was present.
    pub fn erase(&self, key: &K) -> bool {
        let kh = KeyHash::new(key, &self.hasher);
        let (_p, b1, b2, _guard) = self.snapshot_and_lock_write(kh);
        match self.find_slot(b1, b2, kh.tag, key) {
            Some((b, i)) => {
                self.bucket_mut(b).erase(i);
                self.stripe(self.stripe_of(b)).dec();
                true
            }
            None => false,
        }
    }

    /// Replaces the value for `key` if present, returning whether it was.
    /// Does not insert.
    pub fn update(&self, key: &K, val: V) -> bool {
        self.update_fn(key, |slot| *slot = val)
    }

    /// Applies `f` to the value for `key` in place if present, returning
    /// whether it was.
    pub fn update_fn(&self, key: &K, f: impl FnOnce(&mut V)) -> bool {
        let kh = KeyHash::new(key, &self.hasher);
        let (_p, b1, b2, _guard) = self.snapshot_and_lock_write(kh);
        match self.find_slot(b1, b2, kh.tag, key) {
            Some((b, i)) => {
                f(self.bucket_mut(b).val_mut(i));
                true
            }
            None => false,
        }
    }

    /// Inserts `(key, val)` if `key` is absent, returning whether it was
    /// inserted. Does not overwrite an existing value -- use [`Self::upsert`]
    /// for that.
    pub fn insert(&self, key: K, val: V) -> bool {
        self.insert_or_upsert(key, val, None).is_ok()
    }

    // -- exclusive mode -----------------------------------------------------

    /// Locks every stripe and returns a handle that blocks every other
    /// operation on this table until it's dropped (or [`LockedTable::unlock`]
    /// is called explicitly). The only way to get an exact element count or
    /// iterate the table's contents.
    pub fn lock_table(&self) -> crate::locked::LockedTable<'_, K, V, H, SLOTS> {
        loop {
            let p = self.hashpower.load(ORD_ACQ);
            let count = self.bucket_count().min(self.num_stripes);
            let indices: Vec<usize> = (0..count).collect();
            let guard = self.lock_stripes_write(&indices);
            if self.hashpower.load(ORD_ACQ) == p {
                return crate::locked::LockedTable::new(self, guard);
            }
            drop(guard);
        }
    }

    // -- bulk operations --------------------------------------------------

    /// Removes every entry, without shrinking the bucket array.
    pub fn clear(&self) {
        let count = self.bucket_count();
        let relevant = count.min(self.num_stripes);
        let indices: Vec<usize> = (0..relevant).collect();
        let _all = self.lock_stripes_write(&indices);
        for b in 0..count {
            let bucket = self.bucket_mut(b);
            for i in 0..SLOTS {
                if bucket.occupied(i) {
                    bucket.erase(i);
                }
            }
        }
        for idx in 0..relevant {
            self.stripe(idx).reset_to(0);
        }
    }

    /// Rebuilds the table at exactly `new_hashpower`, growing or shrinking as
    /// needed. Returns whether anything changed -- a no-op (including calling
    /// this with the table's current hashpower) returns `false`.
    pub fn rehash(&self, new_hashpower: u32) -> bool {
        if new_hashpower == self.hashpower() {
            return false;
        }
        resize::rebuild_copy(self, new_hashpower).is_ok()
    }

    /// Ensures the table can hold `len() + additional` entries without
    /// growing again, rebuilding at the smallest sufficient hashpower.
    /// `reserve(0)` shrinks the table to the smallest hashpower that still
    /// fits its current contents. Returns whether anything changed.
    pub fn reserve(&self, additional: usize) -> bool {
        let target = hashpower_for_capacity(self.len() + additional, SLOTS);
        self.rehash(target)
    }

    /// If `key` is present, applies `f` to its value in place; otherwise
    /// inserts `val`. `f` may run and then be discarded in the rare case
    /// where a concurrent insert wins the race for the same key -- `f` is
    /// then re-applied to the winning entry, so it always runs exactly once
    /// against whatever value ends up live for `key`.
    pub fn upsert(&self, key: K, f: impl FnMut(&mut V), val: V) {
        self.insert_or_upsert(key, val, Some(f))
            .expect("upsert always succeeds: either the insert or the fallback update runs");
    }

    /// Shared engine for `insert` and `upsert`. `on_duplicate` is `None` for a
    /// plain insert (which just reports failure on duplicate) and `Some(f)`
    /// for upsert (which applies `f` to the existing or concurrently-won
    /// entry instead).
    fn insert_or_upsert(&self, key: K, val: V, mut on_duplicate: Option<impl FnMut(&mut V)>) -> Result<(), ()> {
        loop {
            let kh = KeyHash::new(&key, &self.hasher);
            let (p, b1, b2, guard) = self.snapshot_and_lock_write(kh);

            if let Some((b, i)) = self.find_slot(b1, b2, kh.tag, &key) {
                return match &mut on_duplicate {
                    Some(f) => {
                        f(self.bucket_mut(b).val_mut(i));
                        Ok(())
                    }
                    None => Err(()),
                };
            }

            if let Some(slot) = self.bucket(b1).first_empty() {
                self.bucket_mut(b1).set(slot, kh.tag, key, val);
                self.stripe(self.stripe_of(b1)).inc();
                return Ok(());
            }
            if let Some(slot) = self.bucket(b2).first_empty() {
                self.bucket_mut(b2).set(slot, kh.tag, key, val);
                self.stripe(self.stripe_of(b2)).inc();
                return Ok(());
            }

            drop(guard);

            match cuckoo::search(self, b1, b2, p) {
                Err(Retry) => {
                    trace!("insert: hashpower changed during cuckoo search, retrying");
                    continue;
                }
                Ok(None) => {
                    // both starting buckets, and everywhere reachable from
                    // them within the depth bound, are full. try to grow.
                    debug!("insert: cuckoo search exhausted at hashpower {p}, attempting growth");
                    match resize::grow_to_fit(self, p + 1) {
                        Ok(()) => continue,
                        Err(e) => {
                            warn!("insert failed: table full and growth was rejected: {e}");
                            // key/val were never consumed on this branch.
                            let _ = (key, val);
                            return Err(());
                        }
                    }
                }
                Ok(Some(path)) => match cuckoo::replay(self, &path, p, b1, b2) {
                    Err(Retry) => {
                        trace!("insert: hashpower changed during replay, retrying");
                        continue;
                    }
                    Ok(None) => {
                        debug!("cuckoo path went stale during replay, retrying insert");
                        continue;
                    }
                    Ok(Some(_final_guard)) => {
                        let origin = path.origin_bucket(b1, b2);
                        // the replay left exactly one free slot behind in
                        // `origin`; re-check for a duplicate that raced in
                        // while we searched and replayed, since both
                        // starting buckets are locked again here.
                        if let Some((b, i)) = self.find_slot(b1, b2, kh.tag, &key) {
                            return match &mut on_duplicate {
                                Some(f) => {
                                    f(self.bucket_mut(b).val_mut(i));
                                    Ok(())
                                }
                                None => Err(()),
                            };
                        }
                        let slot = self
                            .bucket(origin)
                            .first_empty()
                            .expect("replay always frees exactly one slot in the origin bucket");
                        let tag = kh.tag;
                        self.bucket_mut(origin).set(slot, tag, key, val);
                        self.stripe(self.stripe_of(origin)).inc();
                        return Ok(());
                    }
                },
            }
        }
    }
}

/// Smallest hashpower `p` such that `(1 << p) * slots >= capacity`, at least 1.
pub(crate) fn hashpower_for_capacity(capacity: usize, slots: usize) -> u32 {
    let needed_buckets = capacity.div_ceil(slots.max(1)).max(1);
    let mut p = 1u32;
    while (1usize << p) < needed_buckets {
        p += 1;
    }
    p
}

pub(crate) fn alloc_buckets<K, V, const SLOTS: usize>(count: usize) -> *mut Bucket<K, V, SLOTS> {
    let mut v = Vec::with_capacity(count);
    v.resize_with(count, Bucket::empty);
    Box::into_raw(v.into_boxed_slice()) as *mut Bucket<K, V, SLOTS>
}

impl<K, V, H, const SLOTS: usize> Drop for CuckooMap<K, V, H, SLOTS> {
    fn drop(&mut self) {
        let count = 1usize << self.hashpower.load(ORD_ACQ);
        let ptr = *self.buckets.get_mut();
        // SAFETY: this is the only remaining reference to the table (we're in
        // `Drop`), and `ptr` was built from a `Vec<Bucket<..>>` of exactly
        // `count` elements in `alloc_buckets`.
        unsafe {
            drop(Box::from_raw(core::ptr::slice_from_raw_parts_mut(ptr, count)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashpower_rounds_up_to_cover_capacity() {
        assert_eq!(hashpower_for_capacity(1, 4), 1);
        assert_eq!(hashpower_for_capacity(4, 4), 1);
        assert_eq!(hashpower_for_capacity(5, 4), 2);
        assert_eq!(hashpower_for_capacity(1000, 4), 8);
    }

    #[test]
    fn insert_find_erase_round_trip() {
        let map: CuckooMap<String, u32, RandomState, 4> = CuckooMap::with_capacity(16);
        assert!(map.insert("a".to_string(), 1));
        assert!(!map.insert("a".to_string(), 2), "duplicate insert must fail");
        assert_eq!(map.find(&"a".to_string()), Some(1));
        assert!(map.update(&"a".to_string(), 5));
        assert_eq!(map.find(&"a".to_string()), Some(5));
        assert!(map.erase(&"a".to_string()));
        assert!(!map.erase(&"a".to_string()));
        assert_eq!(map.find(&"a".to_string()), None);
    }

    #[test]
    fn upsert_increments_without_double_counting() {
        let map: CuckooMap<&str, u32, RandomState, 4> = CuckooMap::with_capacity(16);
        for _ in 0..10 {
            map.upsert("hits", |v| *v += 1, 1);
        }
        assert_eq!(map.find(&"hits"), Some(10));
    }

    #[test]
    fn len_tracks_inserts_and_erases() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(64);
        for i in 0..20 {
            assert!(map.insert(i, i));
        }
        assert_eq!(map.len(), 20);
        for i in 0..10 {
            assert!(map.erase(&i));
        }
        assert_eq!(map.len(), 10);
    }

    #[test]
    fn new_and_hasher_are_public() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::new(8, RandomState::new());
        let _h = map.hasher();
        assert!(map.insert(1, 1));
        assert_eq!(map.find(&1), Some(1));
    }

    #[test]
    fn load_factor_and_hashpower_setters_are_public() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(8);
        map.set_minimum_load_factor(0.1).unwrap();
        assert_eq!(map.minimum_load_factor(), 0.1);
        let p = map.hashpower();
        map.set_maximum_hashpower(Some(p + 4)).unwrap();
        assert_eq!(map.maximum_hashpower(), Some(p + 4));
        assert!(matches!(
            map.set_maximum_hashpower(Some(p.saturating_sub(1))),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn insert_past_bucket_capacity_triggers_growth() {
        // hashpower 1 => 2 buckets * 4 slots = 8 direct slots; inserting well
        // past that forces cuckoo eviction and eventually automatic growth.
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(8);
        for i in 0..200u32 {
            assert!(map.insert(i, i), "insert {i} failed");
        }
        for i in 0..200u32 {
            assert_eq!(map.find(&i), Some(i));
        }
        assert_eq!(map.len(), 200);
    }
}
