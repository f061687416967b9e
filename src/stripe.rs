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

//! One element of the lock-stripe array. A stripe owns no buckets itself --
//! it's a critical section that a bucket index maps into via `stripe(b) = b
//! mod L` -- plus a per-stripe running count of occupied slots so the global
//! size can be read without ever taking every lock at once.

use core::sync::atomic::{AtomicIsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const ORD_RLX: Ordering = Ordering::Relaxed;

/// Padded to a cache line so that adjacent stripes don't false-share under
/// high fan-in contention -- the whole point of striping is that threads
/// working on disjoint stripes never touch each other's cache lines.
#[repr(align(64))]
pub(crate) struct Stripe {
    lock: RwLock<()>,
    elems: AtomicIsize,
}

impl Default for Stripe {
    fn default() -> Self {
        Stripe {
            lock: RwLock::new(()),
            elems: AtomicIsize::new(0),
        }
    }
}

pub(crate) type StripeReadGuard<'a> = RwLockReadGuard<'a, ()>;
pub(crate) type StripeWriteGuard<'a> = RwLockWriteGuard<'a, ()>;

impl Stripe {
    /// Shared access: used by pure readers (`find`, `contains`) that never
    /// mutate a slot or the counter.
    pub(crate) fn read(&self) -> StripeReadGuard<'_> {
        self.lock.read()
    }

    /// Exclusive access: used by anything that can mutate a bucket this
    /// stripe covers, or that needs to read-then-mutate the counter.
    pub(crate) fn write(&self) -> StripeWriteGuard<'_> {
        self.lock.write()
    }

    pub(crate) fn try_write(&self) -> Option<StripeWriteGuard<'_>> {
        self.lock.try_write()
    }

    /// Approximate element count owned by this stripe. Only meaningful to add
    /// up across every stripe while none of them are held (the usual case) or
    /// while all of them are held (the exact case, used by locked-table mode).
    pub(crate) fn elems(&self) -> usize {
        self.elems.load(ORD_RLX).max(0) as usize
    }

    /// Must only be called while this stripe is held exclusively.
    pub(crate) fn inc(&self) {
        self.elems.fetch_add(1, ORD_RLX);
    }

    /// Must only be called while this stripe is held exclusively.
    pub(crate) fn dec(&self) {
        self.elems.fetch_sub(1, ORD_RLX);
    }

    /// Overwrites the counter outright. Used after a resize recomputes every
    /// stripe's true occupancy from scratch; must only be called while this
    /// stripe is held exclusively.
    pub(crate) fn reset_to(&self, n: usize) {
        self.elems.store(n as isize, ORD_RLX);
    }
}

/// Holds every write lock acquired for a single multi-stripe critical section
/// (two stripes for an ordinary point op, up to three for a cuckoo-path
/// replay step). Locks are taken in ascending stripe-index order by the
/// caller before this is constructed, and released in reverse order on drop.
pub(crate) struct MultiWriteGuard<'a> {
    _guards: Vec<StripeWriteGuard<'a>>,
}

impl<'a> MultiWriteGuard<'a> {
    pub(crate) fn new(guards: Vec<StripeWriteGuard<'a>>) -> Self {
        MultiWriteGuard { _guards: guards }
    }
}

/// The shared-lock counterpart, used by read-only point ops (`find`,
/// `contains`) so that independent readers never block each other.
pub(crate) struct MultiReadGuard<'a> {
    _guards: Vec<StripeReadGuard<'a>>,
}

impl<'a> MultiReadGuard<'a> {
    pub(crate) fn new(guards: Vec<StripeReadGuard<'a>>) -> Self {
        MultiReadGuard { _guards: guards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_starts_at_zero() {
        let s = Stripe::default();
        assert_eq!(s.elems(), 0);
    }

    #[test]
    fn inc_dec_round_trip() {
        let s = Stripe::default();
        {
            let _g = s.write();
            s.inc();
            s.inc();
            s.dec();
        }
        assert_eq!(s.elems(), 1);
    }

    #[test]
    fn readers_do_not_block_each_other() {
        let s = Stripe::default();
        let g1 = s.read();
        let g2 = s.read();
        drop(g1);
        drop(g2);
    }

    #[test]
    fn writer_excludes_other_writers() {
        let s = Stripe::default();
        let g = s.try_write();
        assert!(g.is_some());
        let g2 = s.try_write();
        assert!(g2.is_none(), "a second exclusive lock must not be grantable while the first is held");
    }

    #[test]
    fn is_cache_line_aligned() {
        assert_eq!(core::mem::align_of::<Stripe>(), 64);
    }
}
