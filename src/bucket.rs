//! HashBucket and probe search.
//!
//! A bucket is one physical slot of a circular table whose capacity is a
//! power of two, so wraparound is a mask rather than a modulo. Probing is
//! first-fit linear: start at the ideal bucket and walk successors until the
//! key or a vacant bucket turns up.

use crate::bitmap::BitMap;
use core::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashBucket {
    offset: usize,
    capacity: usize,
}

impl HashBucket {
    /// Panics unless `capacity` is a power of two and `offset < capacity`.
    #[inline]
    pub fn new(offset: usize, capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "bucket capacity {} is not a power of two",
            capacity
        );
        assert!(
            offset < capacity,
            "bucket offset {} out of range for capacity {}",
            offset,
            capacity
        );
        HashBucket { offset, capacity }
    }

    #[inline]
    pub fn offset(self) -> usize {
        self.offset
    }

    #[inline]
    pub fn capacity(self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn successor(self) -> Self {
        HashBucket {
            offset: self.offset.wrapping_add(1) & (self.capacity - 1),
            capacity: self.capacity,
        }
    }

    #[inline]
    pub fn predecessor(self) -> Self {
        HashBucket {
            offset: self.offset.wrapping_sub(1) & (self.capacity - 1),
            capacity: self.capacity,
        }
    }

    /// Whether `self` lies on the circular arc that starts at `start` and
    /// ends at `end`, both inclusive.
    #[inline]
    pub fn is_within(self, start: HashBucket, end: HashBucket) -> bool {
        if start <= end {
            start <= self && self <= end
        } else {
            start <= self || self <= end
        }
    }
}

impl fmt::Display for HashBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.offset)
    }
}

/// Outcome of a probe: where the key lives, or where it would go.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Probe {
    Occupied(HashBucket),
    Vacant(HashBucket),
}

impl Probe {
    #[inline]
    pub fn bucket(self) -> HashBucket {
        match self {
            Probe::Occupied(b) | Probe::Vacant(b) => b,
        }
    }

    #[inline]
    pub fn is_found(self) -> bool {
        matches!(self, Probe::Occupied(_))
    }
}

/// The bucket a hash maps to when there are no collisions.
#[inline]
pub fn ideal_bucket(hash: u64, capacity: usize) -> HashBucket {
    HashBucket::new(hash as usize & capacity.wrapping_sub(1), capacity)
}

/// Walk the probe sequence for `hash`.
///
/// `matches` is only called for occupied buckets. Requires at least one
/// vacant bucket; a full wrap around the table panics.
pub fn find_bucket<W, F>(hash: u64, capacity: usize, occupancy: &BitMap<W>, mut matches: F) -> Probe
where
    W: AsRef<[usize]>,
    F: FnMut(HashBucket) -> bool,
{
    let start = ideal_bucket(hash, capacity);
    let mut bucket = start;
    loop {
        if !occupancy.get(bucket.offset()) {
            return Probe::Vacant(bucket);
        }
        if matches(bucket) {
            return Probe::Occupied(bucket);
        }
        bucket = bucket.successor();
        if bucket == start {
            panic!("failed to locate a vacant bucket in a table of {} buckets", capacity);
        }
    }
}
