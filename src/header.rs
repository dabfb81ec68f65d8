//! HashedStorageHeader: the bookkeeping record at the front of every slab.
//!
//! The header is written once when the slab is allocated and records where
//! each region lives. Only `count` changes afterwards.

use crate::bitmap;
use crate::bucket_map;
use crate::error::Error;
use core::alloc::Layout;

/// A typed run of elements inside the slab.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// Byte offset from the start of the slab.
    pub offset: usize,
    /// Number of elements.
    pub len: usize,
    /// Bytes consumed, alignment padding in front of the region included.
    pub bytes: usize,
}

#[derive(Clone, Debug)]
pub struct HashedStorageHeader {
    count: usize,
    capacity: usize,
    layout: Layout,
    initialized_buckets: Region,
    bucket_map: Region,
    hashes: Region,
    keys: Region,
    values: Region,
}

/// Append an array of `len` values of `T` to `layout`.
fn append_region<T>(layout: Layout, len: usize) -> Result<(Layout, Region), Error> {
    let array = Layout::array::<T>(len).map_err(|_| Error::CapacityOverflow)?;
    let (next, offset) = layout.extend(array).map_err(|_| Error::CapacityOverflow)?;
    let region = Region {
        offset,
        len,
        bytes: next.size() - layout.size(),
    };
    Ok((next, region))
}

impl HashedStorageHeader {
    /// Compute the slab layout for `capacity` buckets of `K` keys and `V`
    /// values. The header itself occupies the first bytes.
    pub fn layout_for<K, V>(capacity: usize) -> Result<Self, Error> {
        if !capacity.is_power_of_two() || capacity > isize::MAX as usize / 2 {
            return Err(Error::CapacityOverflow);
        }
        let layout = Layout::new::<HashedStorageHeader>();
        let (layout, initialized_buckets) =
            append_region::<usize>(layout, bitmap::words_for(capacity))?;
        let (layout, bucket_map) = append_region::<usize>(layout, bucket_map::words_for(capacity))?;
        let (layout, hashes) = append_region::<u64>(layout, capacity)?;
        let (layout, keys) = append_region::<K>(layout, capacity)?;
        let (layout, values) = append_region::<V>(layout, capacity)?;
        Ok(HashedStorageHeader {
            count: 0,
            capacity,
            layout: layout.pad_to_align(),
            initialized_buckets,
            bucket_map,
            hashes,
            keys,
            values,
        })
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub(crate) fn set_count(&mut self, count: usize) {
        self.count = count;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Total size of the slab.
    pub fn bytes_allocated(&self) -> usize {
        self.layout.size()
    }

    pub fn initialized_buckets(&self) -> Region {
        self.initialized_buckets
    }

    pub fn bucket_map(&self) -> Region {
        self.bucket_map
    }

    /// Hash of the key in each occupied bucket, recorded on insertion.
    pub fn hashes(&self) -> Region {
        self.hashes
    }

    pub fn keys(&self) -> Region {
        self.keys
    }

    pub fn values(&self) -> Region {
        self.values
    }

    pub fn bytes_for_initialized_buckets(&self) -> usize {
        self.initialized_buckets.bytes
    }

    pub fn bytes_for_bucket_map(&self) -> usize {
        self.bucket_map.bytes
    }

    pub fn bytes_for_hashes(&self) -> usize {
        self.hashes.bytes
    }

    pub fn bytes_for_keys(&self) -> usize {
        self.keys.bytes
    }

    pub fn bytes_for_values(&self) -> usize {
        self.values.bytes
    }
}
