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

//! Online resize: growing the table in response to a full insert
//! (`grow_to_fit`, one hashpower at a time) and the explicit, arbitrary-target
//! rebuild used by [`crate::CuckooMap::rehash`] and [`crate::CuckooMap::reserve`]
//! (`rebuild_copy`). Both hold every relevant stripe for their duration, so no
//! point operation can observe a half-migrated table.
//!
//! `grow_to_fit` doubles the table in place: every slot already owns its key,
//! so a doubling step recomputes each occupant's full hash and can tell
//! directly whether its new home at the wider hashpower is its old bucket `b`
//! or `b + old_count` -- it never needs to search for a free slot, since the
//! source bucket and its mirror at `b + old_count` are the only two buckets
//! that can ever receive an item that used to live at `b`.
//!
//! `rebuild_copy` has no such shortcut (the target hashpower can be anything,
//! including a shrink), so it falls back to the ordinary bounded cuckoo
//! search -- but it plans the entire rebuild against lightweight shadow
//! metadata first, and only moves real keys and values once every existing
//! entry has a confirmed new home. A plan that can't place everything leaves
//! the live table completely untouched.

use core::sync::atomic::Ordering;
use std::collections::VecDeque;
use std::hash::{BuildHasher, Hash};

use log::debug;

use crate::bucket::Bucket;
use crate::cuckoo::{MAX_DEPTH, QUEUE_CAP};
use crate::error::{CuckooResult, Error};
use crate::hash::{alt, primary, KeyHash};
use crate::stripe::Stripe;
use crate::table::CuckooMap;

const ORD_ACQ: Ordering = Ordering::Acquire;
const ORD_REL: Ordering = Ordering::Release;

/// Automatic on-demand growth, called from the insert path when both
/// candidate buckets, and everything reachable from them within the cuckoo
/// search bound, are full. Doubles the hashpower one step at a time until
/// `target_p` is reached (in practice the insert path only ever asks for
/// `current + 1`).
pub(crate) fn grow_to_fit<K, V, H, const SLOTS: usize>(
    map: &CuckooMap<K, V, H, SLOTS>,
    target_p: u32,
) -> CuckooResult<()>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    let _resize_guard = map.resize_lock.lock();
    let mut current_p = map.hashpower.load(ORD_ACQ);
    if current_p >= target_p {
        // someone else already grew past what we needed.
        return Ok(());
    }
    check_policy(map, target_p)?;

    let new_capacity = (1usize << target_p) * SLOTS;
    let min_lf = map.minimum_load_factor();
    if min_lf > 0.0 && (map.len() as f64) / (new_capacity as f64) < min_lf as f64 {
        return Err(Error::LoadFactorTooLow);
    }

    while current_p < target_p {
        debug!("double_in_place: growing hashpower {current_p} -> {}", current_p + 1);
        double_in_place(map);
        current_p = map.hashpower.load(ORD_ACQ);
    }
    Ok(())
}

/// Explicit, arbitrary-direction rebuild used by `rehash`/`reserve`. Unlike
/// [`grow_to_fit`], this never checks `minimum_load_factor` -- a caller
/// asking to shrink or resize to a specific hashpower is making that
/// trade-off on purpose. Plans the whole rebuild before moving anything: if
/// the plan can't place every existing entry, the table is returned
/// unchanged and `Error::RebuildExhausted` is reported.
pub(crate) fn rebuild_copy<K, V, H, const SLOTS: usize>(
    map: &CuckooMap<K, V, H, SLOTS>,
    target_p: u32,
) -> CuckooResult<()>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    let _resize_guard = map.resize_lock.lock();
    let current_p = map.hashpower.load(ORD_ACQ);
    if current_p == target_p {
        return Ok(());
    }
    if target_p > current_p {
        check_policy(map, target_p)?;
    }

    let old_count = 1usize << current_p;
    let new_count = 1usize << target_p;
    map.ensure_stripes_allocated(old_count.max(new_count));
    let relevant = old_count.max(new_count).min(map.num_stripes);
    let lock_indices: Vec<usize> = (0..relevant).collect();
    let _all = map.lock_stripes_write(&lock_indices);

    debug!("rebuild_copy: planning rebuild at hashpower {current_p} -> {target_p}");
    let shadow = plan_rebuild(map, target_p)?;
    debug!("rebuild_copy: plan succeeded, moving entries {current_p} -> {target_p}");
    rebuild_into(map, target_p, shadow);
    Ok(())
}

fn check_policy<K, V, H, const SLOTS: usize>(
    map: &CuckooMap<K, V, H, SLOTS>,
    target_p: u32,
) -> CuckooResult<()> {
    if let Some(max) = map.maximum_hashpower() {
        if target_p > max {
            return Err(Error::MaxHashpowerExceeded { attempted: target_p, max });
        }
    }
    Ok(())
}

fn recompute_stripe_counts<K, V, H, const SLOTS: usize>(
    map: &CuckooMap<K, V, H, SLOTS>,
    relevant_stripes: usize,
) {
    let mut counts = vec![0usize; relevant_stripes];
    let new_count = map.bucket_count();
    for b in 0..new_count {
        let occupied = (0..SLOTS).filter(|&i| map.bucket(b).occupied(i)).count();
        counts[map.stripe_of(b)] += occupied;
    }
    for (idx, count) in counts.into_iter().enumerate() {
        map.stripe(idx).set_count(count);
    }
}

/// Doubles the bucket array in place: bit-relocates the old array into the
/// new array's matching-index prefix, fills the new half with empty buckets,
/// then walks the old half and moves each occupant that no longer belongs
/// there into its mirror bucket `b + old_count`. No eviction search is
/// needed -- the doubling invariant guarantees every occupant's new home is
/// one of exactly two buckets.
fn double_in_place<K, V, H, const SLOTS: usize>(map: &CuckooMap<K, V, H, SLOTS>)
where
    K: Hash + Eq,
    H: BuildHasher,
{
    let old_p = map.hashpower.load(ORD_ACQ);
    let new_p = old_p + 1;
    let old_count = 1usize << old_p;
    let new_count = 1usize << new_p;

    map.ensure_stripes_allocated(new_count);
    let relevant = new_count.min(map.num_stripes);
    let lock_indices: Vec<usize> = (0..relevant).collect();
    let _all = map.lock_stripes_write(&lock_indices);

    let old_ptr = map.buckets.load(ORD_ACQ);

    let mut new_buckets: Vec<Bucket<K, V, SLOTS>> = Vec::with_capacity(new_count);
    // SAFETY: `old_ptr` has `old_count` initialized `Bucket`s, every stripe
    // covering them is held exclusively by `_all`, and `new_buckets` was just
    // allocated with room for `new_count >= old_count` elements. This bit-
    // copies the old buckets (occupied mask, tags, and the `(K, V)` payloads)
    // into the new array's matching-index prefix without running `Clone`.
    unsafe {
        core::ptr::copy_nonoverlapping(old_ptr, new_buckets.as_mut_ptr(), old_count);
        new_buckets.set_len(old_count);
    }
    new_buckets.resize_with(new_count, Bucket::empty);

    // SAFETY: every element at `old_ptr` was just bit-relocated into
    // `new_buckets` above, so freeing through a zero-length `Vec` releases
    // the backing allocation without running `Bucket`'s `Drop` a second time.
    unsafe {
        drop(Vec::from_raw_parts(old_ptr, 0, old_count));
    }

    let (lo, hi) = new_buckets.split_at_mut(old_count);
    for b in 0..old_count {
        let mut i = 0;
        while i < SLOTS {
            if lo[b].occupied(i) {
                let tag = lo[b].partial(i);
                let hash = KeyHash::new(lo[b].key(i), &map.hasher).hash;
                let np1 = primary(hash, new_p);
                let np2 = alt(np1, tag, new_p);
                let stays = np1 == b || np2 == b;
                let moves = np1 == b + old_count || np2 == b + old_count;
                debug_assert!(
                    stays || moves,
                    "doubling must leave an occupant at its old bucket or old_bucket + old_count"
                );
                if !stays && moves {
                    let dest_slot = hi[b].first_empty().expect(
                        "at most SLOTS occupants of one old bucket can target its mirror bucket",
                    );
                    lo[b].move_to(i, &mut hi[b], dest_slot);
                    continue;
                }
            }
            i += 1;
        }
    }

    let new_raw = Box::into_raw(new_buckets.into_boxed_slice()) as *mut Bucket<K, V, SLOTS>;
    map.buckets.store(new_raw, ORD_REL);
    map.hashpower.store(new_p, ORD_REL);

    recompute_stripe_counts(map, new_count.min(map.num_stripes));
}

/// Lightweight per-slot metadata used to plan a [`rebuild_copy`] rebuild
/// without touching any real key or value: just enough to run the same
/// direct-placement/eviction-search logic as the live table, and to remember,
/// for every planned destination slot, which `(old_bucket, old_slot)` it came
/// from.
#[derive(Clone, Copy)]
struct ShadowBucket<const SLOTS: usize> {
    occupied: u8,
    tags: [u8; SLOTS],
    origin: [(usize, usize); SLOTS],
}

impl<const SLOTS: usize> ShadowBucket<SLOTS> {
    fn empty() -> Self {
        ShadowBucket { occupied: 0, tags: [0; SLOTS], origin: [(0, 0); SLOTS] }
    }

    fn occupied_slot(&self, i: usize) -> bool {
        self.occupied & (1 << i) != 0
    }

    fn first_empty(&self) -> Option<usize> {
        (0..SLOTS).find(|&i| !self.occupied_slot(i))
    }

    fn set(&mut self, i: usize, tag: u8, origin: (usize, usize)) {
        self.tags[i] = tag;
        self.origin[i] = origin;
        self.occupied |= 1 << i;
    }

    fn clear(&mut self, i: usize) {
        self.occupied &= !(1 << i);
    }
}

/// Simulates placing every existing entry into a `target_p`-sized array,
/// without moving any real data. Returns the completed shadow layout, or
/// `Error::RebuildExhausted` the moment any entry's placement search is
/// exhausted -- at which point nothing in the live table has been touched.
fn plan_rebuild<K, V, H, const SLOTS: usize>(
    map: &CuckooMap<K, V, H, SLOTS>,
    target_p: u32,
) -> CuckooResult<Vec<ShadowBucket<SLOTS>>>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    let old_count = map.bucket_count();
    let new_count = 1usize << target_p;
    let mut shadow: Vec<ShadowBucket<SLOTS>> = vec![ShadowBucket::empty(); new_count];

    for b in 0..old_count {
        let bucket = map.bucket(b);
        for i in 0..SLOTS {
            if bucket.occupied(i) {
                let kh = KeyHash::new(bucket.key(i), &map.hasher);
                let b1 = primary(kh.hash, target_p);
                let b2 = alt(b1, kh.tag, target_p);
                if shadow_place(&mut shadow, target_p, b1, b2, kh.tag, (b, i)).is_err() {
                    debug!("rebuild_copy: planning exhausted at hashpower {target_p}");
                    return Err(Error::RebuildExhausted);
                }
            }
        }
    }
    Ok(shadow)
}

fn shadow_place<const SLOTS: usize>(
    shadow: &mut [ShadowBucket<SLOTS>],
    p: u32,
    b1: usize,
    b2: usize,
    tag: u8,
    origin: (usize, usize),
) -> Result<(), ()> {
    if let Some(slot) = shadow[b1].first_empty() {
        shadow[b1].set(slot, tag, origin);
        return Ok(());
    }
    if let Some(slot) = shadow[b2].first_empty() {
        shadow[b2].set(slot, tag, origin);
        return Ok(());
    }
    let (chain, slots, empty_slot) = shadow_bfs(shadow, b1, b2, p).ok_or(())?;
    shadow_apply(shadow, &chain, &slots, empty_slot, tag, origin);
    Ok(())
}

#[allow(clippy::type_complexity)]
fn shadow_bfs<const SLOTS: usize>(
    shadow: &[ShadowBucket<SLOTS>],
    b1: usize,
    b2: usize,
    p: u32,
) -> Option<(Vec<usize>, Vec<usize>, usize)> {
    struct Node {
        bucket: usize,
        chain: Vec<usize>,
        slots: Vec<usize>,
    }

    let mut queue: VecDeque<Node> = VecDeque::new();
    queue.push_back(Node { bucket: b1, chain: vec![b1], slots: Vec::new() });
    if b2 != b1 {
        queue.push_back(Node { bucket: b2, chain: vec![b2], slots: Vec::new() });
    }

    let mut visited = 0usize;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        if visited > QUEUE_CAP {
            return None;
        }
        let bucket_ref = &shadow[node.bucket];
        if let Some(empty) = bucket_ref.first_empty() {
            return Some((node.chain, node.slots, empty));
        }
        let depth = node.chain.len() - 1;
        if depth + 1 >= MAX_DEPTH {
            continue;
        }
        for slot in 0..SLOTS {
            if queue.len() >= QUEUE_CAP {
                return None;
            }
            let tag = bucket_ref.tags[slot];
            let next = alt(node.bucket, tag, p);
            let mut chain = node.chain.clone();
            chain.push(next);
            let mut slots = node.slots.clone();
            slots.push(slot);
            queue.push_back(Node { bucket: next, chain, slots });
        }
    }
    None
}

fn shadow_apply<const SLOTS: usize>(
    shadow: &mut [ShadowBucket<SLOTS>],
    chain: &[usize],
    slots: &[usize],
    empty_slot: usize,
    tag: u8,
    origin: (usize, usize),
) {
    let n = chain.len();
    let mut to_slot = empty_slot;
    for i in (0..n - 1).rev() {
        let from = chain[i];
        let to = chain[i + 1];
        let from_slot = slots[i];
        let moved_tag = shadow[from].tags[from_slot];
        let moved_origin = shadow[from].origin[from_slot];
        shadow[from].clear(from_slot);
        shadow[to].set(to_slot, moved_tag, moved_origin);
        to_slot = from_slot;
    }
    shadow[chain[0]].set(to_slot, tag, origin);
}

/// Carries out a completed [`plan_rebuild`] plan: allocates the real
/// `target_p`-sized array and moves each existing key/value from its planned
/// origin slot into its planned destination, then publishes the new array
/// and frees the old one.
fn rebuild_into<K, V, H, const SLOTS: usize>(
    map: &CuckooMap<K, V, H, SLOTS>,
    target_p: u32,
    shadow: Vec<ShadowBucket<SLOTS>>,
) where
    K: Hash + Eq,
    H: BuildHasher,
{
    let old_count = map.bucket_count();
    let new_count = 1usize << target_p;

    let mut dest_of: Vec<Option<(usize, usize, u8)>> = vec![None; old_count * SLOTS];
    for (new_b, sb) in shadow.iter().enumerate() {
        for slot in 0..SLOTS {
            if sb.occupied_slot(slot) {
                let (old_b, old_i) = sb.origin[slot];
                dest_of[old_b * SLOTS + old_i] = Some((new_b, slot, sb.tags[slot]));
            }
        }
    }

    let mut new_buckets: Vec<Bucket<K, V, SLOTS>> = Vec::with_capacity(new_count);
    new_buckets.resize_with(new_count, Bucket::empty);

    let old_ptr = map.buckets.load(ORD_ACQ);
    for b in 0..old_count {
        // SAFETY: every stripe covering the old bucket range is held
        // exclusively by the caller (`rebuild_copy`'s `_all`).
        let old_bucket = unsafe { &mut *old_ptr.add(b) };
        for i in 0..SLOTS {
            if old_bucket.occupied(i) {
                let (new_b, new_slot, tag) = dest_of[b * SLOTS + i]
                    .expect("plan_rebuild placed every occupied slot before rebuild_into ran");
                let (k, v) = old_bucket.erase(i);
                new_buckets[new_b].set(new_slot, tag, k, v);
            }
        }
    }

    let new_raw = Box::into_raw(new_buckets.into_boxed_slice()) as *mut Bucket<K, V, SLOTS>;
    map.buckets.store(new_raw, ORD_REL);
    map.hashpower.store(target_p, ORD_REL);

    // SAFETY: `old_ptr` is the unique remaining pointer to the old array --
    // we just replaced `map.buckets` and still hold every stripe that could
    // let another thread observe it -- and every slot was drained above.
    unsafe {
        drop(Box::from_raw(core::ptr::slice_from_raw_parts_mut(old_ptr, old_count)));
    }

    recompute_stripe_counts(map, new_count.min(map.num_stripes));
}

impl Stripe {
    /// Bulk-sets this stripe's counter, used after a resize recomputes every
    /// stripe's true occupancy by scanning the rebuilt array.
    pub(crate) fn set_count(&self, n: usize) {
        self.reset_to(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::RandomState;

    #[test]
    fn grow_preserves_every_key() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(8);
        for i in 0..64u32 {
            assert!(map.insert(i, i * 2));
        }
        for i in 0..64u32 {
            assert_eq!(map.find(&i), Some(i * 2));
        }
        assert!(map.hashpower() > 1);
    }

    #[test]
    fn rehash_to_same_hashpower_is_a_no_op() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(16);
        map.insert(1, 1);
        let p = map.hashpower();
        assert!(!map.rehash(p));
        assert_eq!(map.hashpower(), p);
        assert_eq!(map.find(&1), Some(1));
    }

    #[test]
    fn reserve_zero_shrinks_to_fit_current_size() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(1024);
        for i in 0..4u32 {
            map.insert(i, i);
        }
        let before = map.hashpower();
        map.reserve(0);
        assert!(map.hashpower() <= before);
        for i in 0..4u32 {
            assert_eq!(map.find(&i), Some(i));
        }
    }

    fn locate<K, V, H, const SLOTS: usize>(map: &CuckooMap<K, V, H, SLOTS>, key: &K) -> usize
    where
        K: PartialEq,
    {
        for b in 0..map.bucket_count() {
            let bucket = map.bucket(b);
            for i in 0..SLOTS {
                if bucket.occupied(i) && bucket.key(i) == key {
                    return b;
                }
            }
        }
        panic!("key not present in any bucket");
    }

    /// After a doubling, invariant I4 requires every entry to end up either
    /// at its pre-doubling bucket or at `bucket + old_count` -- nowhere else.
    #[test]
    fn double_in_place_respects_bucket_invariant() {
        let map: CuckooMap<u32, u32, RandomState, 4> = CuckooMap::with_capacity(16);
        for i in 0..40u32 {
            assert!(map.insert(i, i));
        }
        let old_p = map.hashpower();
        let old_count = 1usize << old_p;
        let before: Vec<(u32, usize)> = (0..40u32).map(|k| (k, locate(&map, &k))).collect();

        grow_to_fit(&map, old_p + 1).unwrap();

        assert_eq!(map.hashpower(), old_p + 1);
        for (k, old_b) in before {
            let new_b = locate(&map, &k);
            assert!(
                new_b == old_b || new_b == old_b + old_count,
                "key {k} moved from bucket {old_b} to {new_b}, expected {old_b} or {}",
                old_b + old_count
            );
            assert_eq!(map.find(&k), Some(k));
        }
    }

    #[test]
    fn rebuild_exhaustion_leaves_table_untouched() {
        // A hasher whose `Hasher` ignores every byte written to it collapses
        // every key to the same hash, so at a target hashpower of 0 -- a
        // single bucket, mask 0 -- every entry's candidate buckets are both
        // bucket 0. Eight entries fit the live table's normal hashpower fine
        // (four direct slots each side of a real alt bucket) but can never
        // all fit in one bucket's four slots, so planning the rebuild must
        // fail without moving anything.
        struct ConstantHasher;
        struct ConstantHasherState;
        impl BuildHasher for ConstantHasher {
            type Hasher = ConstantHasherState;
            fn build_hasher(&self) -> Self::Hasher {
                ConstantHasherState
            }
        }
        impl std::hash::Hasher for ConstantHasherState {
            fn write(&mut self, _bytes: &[u8]) {}
            fn finish(&self) -> u64 {
                0
            }
        }

        let map: CuckooMap<u32, u32, ConstantHasher, 4> =
            CuckooMap::with_capacity_and_hasher(64, ConstantHasher);
        for i in 0..8u32 {
            assert!(map.insert(i, i));
        }
        let before = map.hashpower();
        match rebuild_copy(&map, 0) {
            Err(Error::RebuildExhausted) => {}
            other => panic!("expected RebuildExhausted, got {other:?}"),
        }
        assert_eq!(map.hashpower(), before, "a failed plan must leave the hashpower untouched");
        for i in 0..8u32 {
            assert_eq!(map.find(&i), Some(i), "a failed rebuild must leave every entry in place");
        }
    }
}
