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

//! The cuckoo-path engine: a bounded BFS that finds a chain of evictions
//! leading to a free slot when both of a key's candidate buckets are full,
//! and the replay that carries the eviction out bucket by bucket while
//! re-validating every step against concurrent mutation.

use core::sync::atomic::Ordering;
use std::collections::VecDeque;

use log::trace;

use crate::error::{Retry, RetryResult};
use crate::hash::alt;
use crate::table::CuckooMap;

/// Hard cap on how many BFS nodes we're willing to visit before giving up and
/// reporting the table full. Matches the source spec's queue capacity.
pub(crate) const QUEUE_CAP: usize = 512;

/// Hard cap on eviction-chain length.
pub(crate) const MAX_DEPTH: usize = 5;

struct SearchNode {
    bucket: usize,
    chain: Vec<usize>,
    slots: Vec<usize>,
    tags: Vec<u8>,
}

/// A validated (at search time) chain of evictions ending in a bucket that had
/// a free slot. `chain[0]` is one of the two starting buckets; `chain[i+1] ==
/// alt(chain[i], tags[i], p)`; `slots[i]` is the slot in `chain[i]` that must
/// move into `chain[i+1]`; `empty_slot` is the free slot in `chain.last()`.
pub(crate) struct CuckooPath {
    chain: Vec<usize>,
    slots: Vec<usize>,
    tags: Vec<u8>,
    empty_slot: usize,
    /// 0 if the path originates at the op's primary bucket, 1 if at the alt.
    origin: u8,
}

/// Breadth-first search for a free slot reachable from `b1` or `b2` by a bounded
/// chain of evictions. Returns `Ok(None)` if the search space was exhausted
/// without finding one (the table is considered full for this insert), and
/// `Err(Retry)` if a resize was observed mid-search and the caller must start
/// over from a fresh snapshot.
pub(crate) fn search<K, V, H, const SLOTS: usize>(
    map: &CuckooMap<K, V, H, SLOTS>,
    b1: usize,
    b2: usize,
    p: u32,
) -> RetryResult<Option<CuckooPath>> {
    let mut queue: VecDeque<SearchNode> = VecDeque::new();
    queue.push_back(SearchNode {
        bucket: b1,
        chain: vec![b1],
        slots: Vec::new(),
        tags: Vec::new(),
    });
    if b2 != b1 {
        queue.push_back(SearchNode {
            bucket: b2,
            chain: vec![b2],
            slots: Vec::new(),
            tags: Vec::new(),
        });
    }

    let mut visited = 0usize;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        if visited > QUEUE_CAP {
            return Ok(None);
        }

        let stripe_idx = map.stripe_of(node.bucket);
        trace!("cuckoo search: locking stripe {stripe_idx} (bucket {})", node.bucket);
        let stripe_guard = map.stripe(stripe_idx).read();
        if map.hashpower.load(Ordering::Acquire) != p {
            drop(stripe_guard);
            trace!("cuckoo search: unlocking stripe {stripe_idx} (hashpower changed)");
            return Err(Retry);
        }

        let bucket_ref = map.bucket(node.bucket);
        if let Some(empty) = bucket_ref.first_empty() {
            let origin = if node.chain[0] == b1 { 0 } else { 1 };
            drop(stripe_guard);
            trace!("cuckoo search: unlocking stripe {stripe_idx} (found free slot)");
            return Ok(Some(CuckooPath {
                chain: node.chain,
                slots: node.slots,
                tags: node.tags,
                empty_slot: empty,
                origin,
            }));
        }

        let depth = node.chain.len() - 1;
        if depth + 1 >= MAX_DEPTH {
            drop(stripe_guard);
            trace!("cuckoo search: unlocking stripe {stripe_idx} (depth bound reached)");
            continue;
        }
        for slot in 0..SLOTS {
            if queue.len() >= QUEUE_CAP {
                drop(stripe_guard);
                trace!("cuckoo search: unlocking stripe {stripe_idx} (queue capacity reached)");
                return Ok(None);
            }
            let tag = bucket_ref.partial(slot);
            let next = alt(node.bucket, tag, p);
            let mut chain = node.chain.clone();
            chain.push(next);
            let mut slots = node.slots.clone();
            slots.push(slot);
            let mut tags = node.tags.clone();
            tags.push(tag);
            queue.push_back(SearchNode { bucket: next, chain, slots, tags });
        }
        drop(stripe_guard);
        trace!("cuckoo search: unlocking stripe {stripe_idx}");
    }
    Ok(None)
}

/// Carries out the eviction chain found by [`search`], one hop at a time,
/// walking backward from the free slot toward the starting bucket. Each hop
/// re-locks just the stripes it touches and re-checks that the slot being
/// evicted still holds a key with the tag observed during the search (a
/// proxy for "same hash", since the tag is exactly the hash's fold and a
/// mismatch here is always safe to treat as staleness).
///
/// On success, returns the write guard covering the final hop -- which
/// includes both of the operation's starting buckets -- for the caller to
/// reuse when placing the new entry. Returns `Ok(None)` if any hop's
/// revalidation fails (the path went stale; the caller should restart the
/// whole insert attempt).
pub(crate) fn replay<'a, K, V, H, const SLOTS: usize>(
    map: &'a CuckooMap<K, V, H, SLOTS>,
    path: &CuckooPath,
    p: u32,
    b1: usize,
    b2: usize,
) -> RetryResult<Option<crate::stripe::MultiWriteGuard<'a>>> {
    let n = path.chain.len();
    debug_assert!(n >= 2, "a path always has at least one hop");
    let mut to_slot = path.empty_slot;

    for i in (0..n - 1).rev() {
        let from = path.chain[i];
        let to = path.chain[i + 1];
        let from_slot = path.slots[i];
        let is_final = i == 0;
        let other_start = if path.origin == 0 { b2 } else { b1 };

        let mut idxs = vec![map.stripe_of(from), map.stripe_of(to)];
        if is_final {
            idxs.push(map.stripe_of(other_start));
        }
        idxs.sort_unstable();
        idxs.dedup();
        trace!("cuckoo replay: locking stripes {idxs:?} (hop {from} -> {to})");
        let guard = map.lock_stripes_write(&idxs);

        if map.hashpower.load(Ordering::Acquire) != p {
            drop(guard);
            trace!("cuckoo replay: unlocking stripes {idxs:?} (hashpower changed)");
            return Err(Retry);
        }

        let from_ok = {
            let from_b = map.bucket(from);
            from_b.occupied(from_slot) && from_b.partial(from_slot) == path.tags[i]
        };
        if !from_ok {
            drop(guard);
            trace!("cuckoo replay: unlocking stripes {idxs:?} (source slot went stale)");
            return Ok(None);
        }
        if map.bucket(to).occupied(to_slot) {
            drop(guard);
            trace!("cuckoo replay: unlocking stripes {idxs:?} (destination slot went stale)");
            return Ok(None);
        }

        if from == to {
            // `alt()` swung back to the same bucket it started from (rare,
            // but not excluded by the tag's 8-bit domain). `from_slot` and
            // `to_slot` are still guaranteed distinct: `to_slot` was either
            // the bucket's empty slot found by `search`, or another
            // occupied slot's position from a later hop -- never the one
            // `search` picked as `from_slot` for this hop.
            // SAFETY: single mutable borrow of one bucket; stripe covering
            // it is held exclusively by `guard`.
            unsafe {
                let base = map.buckets.load(Ordering::Acquire);
                (*base.add(from)).move_within(from_slot, to_slot);
            }
        } else {
            // SAFETY: `from` and `to` are distinct indices into the same
            // bucket array, derived directly from the raw base pointer
            // rather than through an intermediate shared reference, so
            // taking a disjoint mutable view of each is sound. Both stripes
            // covering them are held exclusively by `guard`.
            unsafe {
                let base = map.buckets.load(Ordering::Acquire);
                let fb = &mut *base.add(from);
                let tb = &mut *base.add(to);
                fb.move_to(from_slot, tb, to_slot);
            }
        }
        if map.stripe_of(from) != map.stripe_of(to) {
            map.stripe(map.stripe_of(from)).dec();
            map.stripe(map.stripe_of(to)).inc();
        }

        if is_final {
            return Ok(Some(guard));
        }
        to_slot = from_slot;
    }
    unreachable!("loop always returns on the i == 0 iteration")
}

impl CuckooPath {
    /// The bucket where replay frees a slot for the new entry: one of the
    /// operation's two starting buckets.
    pub(crate) fn origin_bucket(&self, b1: usize, b2: usize) -> usize {
        if self.origin == 0 {
            b1
        } else {
            b2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::RandomState;

    #[test]
    fn search_finds_immediate_empty_slot() {
        let map: CuckooMap<u64, u64, RandomState, 4> = CuckooMap::with_capacity(16);
        let p = map.hashpower.load(Ordering::Acquire);
        let path = search(&map, 0, 1, p).unwrap();
        let path = path.expect("an empty table always has room in its starting buckets");
        assert_eq!(path.chain.len(), 1, "no eviction should be needed in an empty table");
    }
}
