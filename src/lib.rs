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

//! A concurrent, resizable hash table using bucketized cuckoo hashing with
//! lock striping.
//!
//! Every key has exactly two candidate buckets -- its primary bucket and an
//! alternate derived from a one-byte partial-key tag -- so a lookup never
//! has to search more than two short, fixed-size buckets. Concurrent access
//! is serialized at the granularity of a fixed array of lock "stripes" that
//! bucket indices map onto, not at the granularity of the whole table, so
//! unrelated keys rarely contend. The table grows online: an insert that
//! finds both of its candidate buckets full triggers a bounded
//! cuckoo-eviction search, and if that search is also exhausted, an
//! automatic resize.
//!
//! ```
//! use cuckoo_map::CuckooMap;
//!
//! let map: CuckooMap<&str, u32> = CuckooMap::with_capacity(16);
//! map.insert("a", 1);
//! assert_eq!(map.find(&"a"), Some(1));
//! map.upsert("hits", |v| *v += 1, 1);
//! assert_eq!(map.find(&"hits"), Some(1));
//! ```
//!
//! For a consistent, exact-size view of every entry, use
//! [`CuckooMap::lock_table`], which holds the whole table exclusively for as
//! long as the returned [`LockedTable`] is alive.

mod bucket;
mod builder;
mod cuckoo;
mod error;
mod hash;
mod locked;
mod resize;
mod segment;
mod stripe;
mod table;

pub use builder::CuckooMapBuilder;
pub use error::{CuckooResult, Error};
pub use locked::{Iter, IterMut, LockedTable};
pub use table::CuckooMap;
