//! hashed-storage: insertion-ordered hash collections whose elements,
//! occupancy bits and position index all live in one heap slab.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: an ordered set (and, by the same machinery, an ordered map)
//!   with O(1) average lookup by value and O(1) access by position, built
//!   in small layers that can each be checked on their own.
//! - Layers:
//!   - BitMap: fixed-size bit vector over borrowed words; one bit per
//!     bucket, set while the bucket holds an element.
//!   - HashBucket / find_bucket: power-of-two bucket arithmetic and
//!     first-fit linear probing without tombstones.
//!   - HashBucketMap: two dense arrays mapping positions to buckets and
//!     back, plus the number of positions in use.
//!   - HashedStorage: the slab. A header records where each region lives;
//!     typed views are derived from it on demand. Each occupied bucket
//!     carries the hash of its key next to the key itself.
//!   - HashedBuffer<K, V, S>: lookup, append, destroy with hole patching,
//!     replace and range replace, growth and copy-on-write.
//!   - OrderedSet<T, S> / OrderedMap<K, V, S>: public wrappers that make
//!     storage unique and large enough before every mutation.
//!
//! Constraints
//! - Single-threaded: storage is shared through `Rc`, so nothing here is
//!   `Send` or `Sync`.
//! - One allocation per storage; growth allocates a new slab and moves
//!   every element across in position order.
//! - Capacity is a power of two and the load factor stays at or below
//!   0.75, so a probe always meets a vacant bucket.
//! - Occupancy count, header count and bucket-map length agree after
//!   every public operation.
//!
//! Panic safety
//! - User code runs through `K: Hash`, `K: Eq`, `Clone` and `Drop`.
//!   Elements are unlinked (bit cleared, position removed, count updated)
//!   before they are handed back or dropped, so a panic in user code never
//!   leaves a bucket marked occupied without an element.
//! - `K: Hash` runs only on incoming keys and lookups, before anything is
//!   rearranged. Hole patching and growth place elements by their stored
//!   hash, so removal and rebuild run no user code until an element is
//!   handed back.
//! - Range replacement splices its new buckets into the position index
//!   from a drop guard, so the index and counts are restored even if a
//!   hash or equality check unwinds midway.
//!
//! Copy-on-write
//! - Cloning a collection shares the slab and registers a clone routine
//!   on it. The first mutation through either handle deep-clones the
//!   elements at the same capacity; the mutating paths themselves carry
//!   no `Clone` bounds.
//!
//! Encapsulation
//! - The slab layers (BitMap, HashBucketMap, HashedStorage) are
//!   implementation details. Storage, header and bucket map are readable
//!   from outside, but the mutable views over a slab never leave the crate.
//!
//! Notes and non-goals
//! - No thread-safe variant, no persistence, no custom allocators.
//! - `capacity()` reports buckets, not elements.
//! - Storage never shrinks.

pub mod bitmap;
pub mod bucket;
mod bucket_map;
pub mod buffer;
mod buffer_proptest;
mod error;
mod header;
pub mod ordered_map;
pub mod ordered_set;
mod storage;

// Public surface
pub use bucket_map::HashBucketMap;
pub use buffer::{minimum_capacity_for_count, HashedBuffer, MAX_LOAD_FACTOR};
pub use error::Error;
pub use header::{HashedStorageHeader, Region};
pub use ordered_map::OrderedMap;
pub use ordered_set::OrderedSet;
pub use storage::{CloneHook, HashedStorage, OrderedDictionaryStorage, OrderedSetStorage};
