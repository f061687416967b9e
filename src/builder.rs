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

//! Builder for [`CuckooMap`], collecting the policy knobs (initial capacity,
//! load-factor floor, hashpower ceiling, hasher) that the table itself only
//! exposes as atomics once constructed.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

use crate::error::{CuckooResult, Error};
use crate::table::CuckooMap;

/// Builds a [`CuckooMap`] with explicit policy, instead of relying on
/// [`CuckooMap::with_capacity`]'s defaults (no load-factor floor, no
/// hashpower ceiling, [`RandomState`]).
pub struct CuckooMapBuilder<K, V, H = RandomState, const SLOTS: usize = 4> {
    initial_capacity: usize,
    minimum_load_factor: f32,
    maximum_hashpower: Option<u32>,
    hasher: H,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, const SLOTS: usize> Default for CuckooMapBuilder<K, V, RandomState, SLOTS> {
    fn default() -> Self {
        CuckooMapBuilder {
            initial_capacity: 0,
            minimum_load_factor: 0.0,
            maximum_hashpower: None,
            hasher: RandomState::new(),
            _marker: PhantomData,
        }
    }
}

impl<K, V, const SLOTS: usize> CuckooMapBuilder<K, V, RandomState, SLOTS> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, V, const SLOTS: usize> CuckooMapBuilder<K, V, RandomState, SLOTS>
where
    K: Hash + Eq,
{
    /// Swaps in a custom hasher, consuming the default [`RandomState`] one.
    pub fn hasher<H2: BuildHasher>(self, hasher: H2) -> CuckooMapBuilder<K, V, H2, SLOTS> {
        CuckooMapBuilder {
            initial_capacity: self.initial_capacity,
            minimum_load_factor: self.minimum_load_factor,
            maximum_hashpower: self.maximum_hashpower,
            hasher,
            _marker: PhantomData,
        }
    }
}

impl<K, V, H, const SLOTS: usize> CuckooMapBuilder<K, V, H, SLOTS>
where
    K: Hash + Eq,
    H: BuildHasher,
{
    /// At least this many entries will fit without triggering a resize.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Automatic growth refuses to leave the table below this load factor.
    /// Must be in `[0.0, 1.0]`; `0.0` (the default) disables the check
    /// entirely, so only capacity limits can fail an insert.
    pub fn minimum_load_factor(mut self, lf: f32) -> Self {
        self.minimum_load_factor = lf;
        self
    }

    /// Automatic growth never exceeds this hashpower. `None` (the default)
    /// leaves growth unbounded.
    pub fn maximum_hashpower(mut self, max: Option<u32>) -> Self {
        self.maximum_hashpower = max;
        self
    }

    /// Validates the collected policy and constructs the table.
    pub fn build(self) -> CuckooResult<CuckooMap<K, V, H, SLOTS>> {
        if !(0.0..=1.0).contains(&self.minimum_load_factor) {
            return Err(Error::InvalidArgument("minimum_load_factor must be in [0.0, 1.0]"));
        }
        let map = CuckooMap::with_capacity_and_hasher(self.initial_capacity, self.hasher);
        map.set_minimum_load_factor(self.minimum_load_factor)?;
        if let Some(max) = self.maximum_hashpower {
            if max < map.hashpower() {
                return Err(Error::InvalidArgument(
                    "maximum_hashpower must not be below the hashpower implied by initial_capacity",
                ));
            }
        }
        map.set_maximum_hashpower(self.maximum_hashpower)?;
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_builder_builds_a_usable_table() {
        let map: CuckooMap<u32, u32, RandomState, 4> =
            CuckooMapBuilder::new().initial_capacity(32).build().unwrap();
        assert!(map.insert(1, 1));
        assert_eq!(map.find(&1), Some(1));
    }

    #[test]
    fn rejects_out_of_range_load_factor() {
        let result: CuckooResult<CuckooMap<u32, u32, RandomState, 4>> =
            CuckooMapBuilder::new().minimum_load_factor(1.5).build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn rejects_hashpower_ceiling_below_initial_capacity() {
        let result: CuckooResult<CuckooMap<u32, u32, RandomState, 4>> = CuckooMapBuilder::new()
            .initial_capacity(10_000)
            .maximum_hashpower(Some(2))
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
