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

use core::fmt;

/// The result type returned by the fallible operations on [`crate::CuckooMap`].
pub type CuckooResult<T> = Result<T, Error>;

/// The error kinds this crate can surface. Most point operations (`insert`, `erase`,
/// `update`) signal absence/duplication as a plain `bool` instead of one of these
/// variants -- see each method's docs. `Error` is reserved for the handful of cases
/// that don't fit a boolean: a throwing lookup, policy misconfiguration, capacity
/// exhaustion, and locked-table iterator misuse.
#[derive(Debug)]
pub enum Error {
    /// `try_find` was called for a key that isn't present.
    NotFound,
    /// A policy setter was given a value outside its domain (e.g. a load factor
    /// outside `[0.0, 1.0]`, or a maximum hashpower below the current one).
    InvalidArgument(&'static str),
    /// Automatic growth was required to satisfy an insert, but the resulting load
    /// factor would fall below `minimum_load_factor`.
    LoadFactorTooLow,
    /// Growth was required but would exceed the configured `maximum_hashpower`.
    MaxHashpowerExceeded {
        /// the hashpower that would have been required
        attempted: u32,
        /// the configured ceiling
        max: u32,
    },
    /// The parent [`crate::LockedTable`] was released (via
    /// [`crate::LockedTable::unlock`]) before one of its non-`Iterator`
    /// accessors (e.g. `len`) was called.
    TableInvalidated,
    /// A `rehash`/`reserve` rebuild could not find a placement for every
    /// existing entry at the target hashpower within the bounded cuckoo
    /// search. The table is left completely untouched -- the rebuild is
    /// planned in full before anything is moved, so a planning failure never
    /// mutates the live array.
    RebuildExhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::InvalidArgument(why) => write!(f, "invalid argument: {why}"),
            Self::LoadFactorTooLow => write!(
                f,
                "insert would require growth below the minimum load factor"
            ),
            Self::MaxHashpowerExceeded { attempted, max } => write!(
                f,
                "growth to hashpower {attempted} exceeds the configured maximum of {max}"
            ),
            Self::TableInvalidated => {
                write!(f, "locked table was released while still in use")
            }
            Self::RebuildExhausted => write!(
                f,
                "rebuild could not place every existing entry at the target size; table left unchanged"
            ),
        }
    }
}

impl std::error::Error for Error {}

/// Internal signal meaning "the hashpower changed out from under this operation,
/// start over". Never escapes the crate: every public entry point that can observe
/// it loops internally until it either succeeds or fails with a public [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Retry;

pub(crate) type RetryResult<T> = Result<T, Retry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_non_empty() {
        let errs = [
            Error::NotFound,
            Error::InvalidArgument("min_load_factor out of range"),
            Error::LoadFactorTooLow,
            Error::MaxHashpowerExceeded { attempted: 10, max: 8 },
            Error::TableInvalidated,
            Error::RebuildExhausted,
        ];
        for e in errs {
            assert!(!e.to_string().is_empty());
        }
    }
}
