//! HashedBuffer: the mutation engine over a shared [`HashedStorage`].
//!
//! A buffer pairs an `Rc` to a storage slab with the hasher used to place
//! keys. Lookups are pure. Mutating operations require the storage to be
//! uniquely referenced and panic otherwise; callers make it unique first
//! through [`HashedBuffer::ensure_unique`] or
//! [`HashedBuffer::ensure_unique_with_capacity`], which clone or regrow the
//! slab as needed.
//!
//! Deletion never leaves tombstones. After an element is removed, later
//! elements of the same probe run that would become unreachable are moved
//! back into the hole, one at a time, until the run is repaired.
//!
//! A key is hashed once, when it enters the buffer, and the hash is stored
//! beside it. Hole patching, growth and dumps read the stored hash, so
//! `K: Hash` never runs while a probe run is being rearranged.

use crate::bucket::{find_bucket, ideal_bucket, HashBucket, Probe};
use crate::error::Error;
use crate::storage::{HashedStorage, StorageParts};
use core::borrow::Borrow;
use core::fmt::{self, Write as _};
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::mem;
use core::ops::Range;
use std::rc::Rc;

/// Fraction of buckets that may be occupied before the buffer grows.
pub const MAX_LOAD_FACTOR: f64 = 0.75;

/// Smallest bucket count that holds `count` elements within
/// [`MAX_LOAD_FACTOR`] while leaving at least one bucket vacant.
///
/// Storage creation rounds the result up to a power of two.
#[inline]
pub const fn minimum_capacity_for_count(count: usize) -> usize {
    let scaled = count.saturating_add(count / 3);
    let at_least = count.saturating_add(1);
    if scaled > at_least {
        scaled
    } else {
        at_least
    }
}

/// What [`HashedBuffer::ensure_unique_with_capacity`] had to do.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Reallocation {
    /// A new slab now backs the buffer.
    pub reallocated: bool,
    /// The new slab has a different capacity.
    pub capacity_changed: bool,
}

/// An insertion-ordered hash table over a copy-on-write slab.
///
/// Elements are reachable by key (hashing with `S`) and by position. The
/// buffer is the layer both [`OrderedSet`](crate::OrderedSet) and
/// [`OrderedMap`](crate::OrderedMap) are built on; it checks its
/// preconditions but leaves growth and uniqueness to the caller, so every
/// mutating method expects a unique storage with room for the result.
///
/// Cloning is O(1): clones share the slab until one of them calls
/// [`ensure_unique`](Self::ensure_unique) or grows.
pub struct HashedBuffer<K, V, S> {
    storage: Rc<HashedStorage<K, V>>,
    hasher: S,
}

/// Probe through mutable parts; used while the storage is borrowed for
/// writing.
fn probe_parts<K, V, Q>(hash: u64, parts: &StorageParts<'_, K, V>, key: &Q) -> Probe
where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
{
    find_bucket(hash, parts.capacity(), &parts.initialized_buckets, |b| {
        parts.key(b).borrow() == key
    })
}

#[inline]
fn ideal_bucket_of<K, V>(parts: &StorageParts<'_, K, V>, bucket: HashBucket) -> HashBucket {
    ideal_bucket(parts.hash(bucket), parts.capacity())
}

/// Repair the probe run around a freshly vacated `hole`.
///
/// `ideal` is the ideal bucket of the element that was removed from `hole`.
/// Elements later in the run whose ideal bucket lies on the arc from the
/// start of the run to the hole are moved back, latest first, each move
/// opening a new hole further along.
fn patch_hole<K, V>(
    parts: &mut StorageParts<'_, K, V>,
    mut hole: HashBucket,
    ideal: HashBucket,
) {
    let mut start = ideal;
    while parts.is_occupied(start.predecessor()) {
        start = start.predecessor();
    }

    let mut last_in_chain = hole;
    let mut bucket = hole.successor();
    while parts.is_occupied(bucket) {
        last_in_chain = bucket;
        bucket = bucket.successor();
    }

    while hole != last_in_chain {
        let mut candidate = last_in_chain;
        while candidate != hole {
            if ideal_bucket_of(parts, candidate).is_within(start, hole) {
                break;
            }
            candidate = candidate.predecessor();
        }
        if candidate == hole {
            break;
        }
        parts.move_bucket(candidate, hole);
        hole = candidate;
    }
}

/// Splices the buckets gathered by a range replacement into the bucket map
/// when dropped, so the map and count agree with the occupancy bits even if
/// user code unwinds part way through.
struct PendingSplice<'a, K, V> {
    parts: StorageParts<'a, K, V>,
    position: usize,
    buckets: Vec<HashBucket>,
}

impl<K, V> Drop for PendingSplice<'_, K, V> {
    fn drop(&mut self) {
        self.parts.bucket_map.insert_at(self.position, &self.buckets);
        let len = self.parts.bucket_map.len();
        self.parts.header.set_count(len);
    }
}

impl<K, V, S> HashedBuffer<K, V, S> {
    /// A buffer able to hold `count` elements without growing.
    pub fn with_capacity_and_hasher(count: usize, hasher: S) -> Self {
        HashedBuffer {
            storage: Rc::new(HashedStorage::create(minimum_capacity_for_count(count))),
            hasher,
        }
    }

    /// Number of buckets in the current slab.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    pub fn storage(&self) -> &HashedStorage<K, V> {
        &self.storage
    }

    /// Whether no other buffer shares this storage.
    #[inline]
    pub fn is_unique(&self) -> bool {
        Rc::strong_count(&self.storage) == 1
    }

    /// Whether both buffers share one storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.storage, &other.storage)
    }

    /// Bucket holding the element at `position`. Panics if out of range.
    #[inline]
    pub fn bucket_for_position(&self, position: usize) -> HashBucket {
        self.storage.bucket_map().bucket_at(position)
    }

    #[inline]
    pub fn position_for_bucket(&self, bucket: HashBucket) -> Option<usize> {
        self.storage.bucket_map().position_of(bucket)
    }

    pub fn get_index(&self, position: usize) -> Option<(&K, &V)> {
        if position >= self.len() {
            return None;
        }
        let bucket = self.bucket_for_position(position);
        Some((self.storage.key(bucket), self.storage.value(bucket)))
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            storage: &self.storage,
            front: 0,
            back: self.len(),
        }
    }

    #[inline]
    fn storage_mut(&mut self) -> &mut HashedStorage<K, V> {
        Rc::get_mut(&mut self.storage).expect("mutation requires uniquely referenced storage")
    }

    #[inline]
    fn split_mut(&mut self) -> (&S, &mut HashedStorage<K, V>) {
        let storage =
            Rc::get_mut(&mut self.storage).expect("mutation requires uniquely referenced storage");
        (&self.hasher, storage)
    }

    /// Mutable access to the value at `position`.
    pub fn value_at_mut(&mut self, position: usize) -> Option<&mut V> {
        if position >= self.len() {
            return None;
        }
        let bucket = self.bucket_for_position(position);
        Some(self.storage_mut().value_mut(bucket))
    }

    /// Give this buffer its own storage, deep-cloning a shared one.
    ///
    /// Returns whether a clone was made.
    pub fn ensure_unique(&mut self) -> bool {
        if self.is_unique() {
            return false;
        }
        let copy = self
            .storage
            .clone_with_hook()
            .expect("shared storage must carry a clone hook");
        log::debug!(
            "copy-on-write: cloned {} elements into {} buckets",
            copy.len(),
            copy.capacity()
        );
        self.storage = Rc::new(copy);
        true
    }

    /// Remove the element at `position`, repairing its probe run.
    ///
    /// Panics if `position` is out of range or the buffer is shared. Runs
    /// no user code before the element is handed back.
    pub fn destroy_at(&mut self, position: usize) -> (K, V) {
        let mut parts = self.storage_mut().parts_mut();
        let hole = parts.bucket_map.bucket_at(position);
        let ideal = ideal_bucket_of(&parts, hole);
        let removed = parts.take_bucket(hole);
        parts.bucket_map.remove_at(position);
        let count = parts.header.count() - 1;
        parts.header.set_count(count);
        patch_hole(&mut parts, hole, ideal);
        removed
    }

    /// Remove every element from position `len` onwards.
    pub fn truncate(&mut self, len: usize) {
        while self.len() > len {
            let last = self.len() - 1;
            drop(self.destroy_at(last));
        }
    }

    /// Move every element, in position order, into `fresh`.
    fn rebuild(&mut self, fresh: HashedStorage<K, V>) {
        let old_capacity = self.capacity();
        fresh.set_clone_hook(self.storage.clone_hook());
        let old = mem::replace(&mut self.storage, Rc::new(fresh));
        let mut old = match Rc::try_unwrap(old) {
            Ok(storage) => storage,
            Err(shared) => shared
                .clone_with_hook()
                .expect("shared storage must carry a clone hook"),
        };

        let mut target = self.storage_mut().parts_mut();
        let mut source = old.parts_mut();
        let count = source.bucket_map.len();
        let capacity = target.capacity();
        for position in 0..count {
            let bucket = source.bucket_map.bucket_at(position);
            let hash = source.hash(bucket);
            let (key, value) = source.take_bucket(bucket);
            let vacant = find_bucket(hash, capacity, &target.initialized_buckets, |_| false);
            target.append(vacant.bucket(), hash, key, value);
        }
        log::debug!(
            "grew hashed storage from {} to {} buckets ({} elements)",
            old_capacity,
            capacity,
            count
        );
    }

    /// Drop every element, keeping the capacity.
    pub fn clear(&mut self) {
        let fresh = HashedStorage::create(self.capacity());
        fresh.set_clone_hook(self.storage.clone_hook());
        self.storage = Rc::new(fresh);
    }
}

impl<K, V, S> HashedBuffer<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Build a buffer from a sequence, keeping the first occurrence of each
    /// key. Returns the buffer and how many duplicates were discarded.
    pub fn from_iter_with_hasher<I>(iter: I, hasher: S) -> (Self, usize)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let iter = iter.into_iter();
        let mut buffer = Self::with_capacity_and_hasher(iter.size_hint().0, hasher);
        let mut discarded = 0;
        for (key, value) in iter {
            if buffer.contains(&key) {
                discarded += 1;
                continue;
            }
            buffer.ensure_unique_with_capacity(buffer.len() + 1);
            buffer
                .append(key, value)
                .expect("absent key must append");
        }
        (buffer, discarded)
    }

    #[inline]
    pub fn ideal_bucket<Q: Hash + ?Sized>(&self, key: &Q) -> HashBucket {
        ideal_bucket(self.hasher.hash_one(key), self.capacity())
    }

    /// Probe for `key`: the bucket holding it, or the vacant bucket where
    /// it would be placed.
    pub fn find<Q>(&self, key: &Q) -> Probe
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_hashed(self.hasher.hash_one(key), key)
    }

    fn find_hashed<Q>(&self, hash: u64, key: &Q) -> Probe
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let storage = &*self.storage;
        find_bucket(hash, storage.capacity(), &storage.initialized_buckets(), |b| {
            storage.key(b).borrow() == key
        })
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).is_found()
    }

    pub fn position_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.find(key) {
            Probe::Occupied(bucket) => self.position_for_bucket(bucket),
            Probe::Vacant(_) => None,
        }
    }

    /// Store a new element after the last position.
    ///
    /// The buffer must be unique and sized for one more element.
    pub fn append(&mut self, key: K, value: V) -> Result<usize, Error> {
        let len = self.len();
        assert!(
            minimum_capacity_for_count(len + 1) <= self.capacity(),
            "{} buckets cannot take element {} without growing",
            self.capacity(),
            len + 1
        );
        let hash = self.hasher.hash_one(&key);
        match self.find_hashed(hash, &key) {
            Probe::Occupied(bucket) => Err(Error::DuplicateElement {
                position: self.position_for_bucket(bucket).unwrap_or(len),
            }),
            Probe::Vacant(bucket) => {
                Ok(self.storage_mut().parts_mut().append(bucket, hash, key, value))
            }
        }
    }

    /// Replace the element at `position`, keeping the position.
    ///
    /// When the stored key equals `key` only the value is swapped and the
    /// incoming key is handed back with the old value. A key already stored
    /// elsewhere is rejected without mutation.
    pub fn replace_at(&mut self, position: usize, key: K, value: V) -> Result<(K, V), Error> {
        let len = self.len();
        if position >= len {
            return Err(Error::PositionOutOfRange { position, len });
        }
        let current = self.bucket_for_position(position);
        let hash = self.hasher.hash_one(&key);
        match self.find_hashed(hash, &key) {
            Probe::Occupied(bucket) if bucket == current => {
                let old = mem::replace(self.storage_mut().value_mut(bucket), value);
                Ok((key, old))
            }
            Probe::Occupied(bucket) => Err(Error::DuplicateElement {
                position: self.position_for_bucket(bucket).unwrap_or(len),
            }),
            Probe::Vacant(_) => {
                // `key` is absent, so after the removal any vacant bucket on
                // its probe path will do and no key comparison is needed.
                let removed = self.destroy_at(position);
                let mut parts = self.storage_mut().parts_mut();
                let bucket = find_bucket(hash, parts.capacity(), &parts.initialized_buckets, |_| false)
                    .bucket();
                parts.initialize_bucket(bucket, hash, key, value);
                parts.bucket_map.insert_at(position, &[bucket]);
                let count = parts.bucket_map.len();
                parts.header.set_count(count);
                Ok(removed)
            }
        }
    }

    /// Replace the elements at `range` with `elements`, in order.
    ///
    /// New elements already present (in the buffer or earlier in
    /// `elements`) are dropped. Returns the removed elements in position
    /// order. The buffer must be unique and sized for the result.
    pub fn replace_range<I>(&mut self, range: Range<usize>, elements: I) -> Result<Vec<(K, V)>, Error>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let len = self.len();
        if range.start > range.end || range.end > len {
            return Err(Error::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                len,
            });
        }

        let mut removed: Vec<(K, V)> = range.clone().rev().map(|p| self.destroy_at(p)).collect();
        removed.reverse();

        let mut discarded = Vec::new();
        {
            let (hasher, storage) = self.split_mut();
            let mut splice = PendingSplice {
                parts: storage.parts_mut(),
                position: range.start,
                buckets: Vec::new(),
            };
            for (key, value) in elements {
                let occupied = splice.parts.header.count() + splice.buckets.len();
                assert!(
                    minimum_capacity_for_count(occupied + 1) <= splice.parts.capacity(),
                    "{} buckets cannot take element {} without growing",
                    splice.parts.capacity(),
                    occupied + 1
                );
                let hash = hasher.hash_one(&key);
                match probe_parts(hash, &splice.parts, &key) {
                    Probe::Occupied(_) => discarded.push((key, value)),
                    Probe::Vacant(bucket) => {
                        splice.parts.initialize_bucket(bucket, hash, key, value);
                        splice.buckets.push(bucket);
                    }
                }
            }
        }
        drop(discarded);
        Ok(removed)
    }

    /// Make the storage unique with room for `count` elements, regrowing it
    /// when it is too small.
    pub fn ensure_unique_with_capacity(&mut self, count: usize) -> Reallocation {
        let required = minimum_capacity_for_count(count);
        if self.capacity() >= required {
            return Reallocation {
                reallocated: self.ensure_unique(),
                capacity_changed: false,
            };
        }
        self.rebuild(HashedStorage::create(required));
        Reallocation {
            reallocated: true,
            capacity_changed: true,
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        let count = self.len().saturating_add(additional);
        self.ensure_unique_with_capacity(count);
    }

    pub fn try_reserve(&mut self, additional: usize) -> Result<(), Error> {
        let count = self
            .len()
            .checked_add(additional)
            .ok_or(Error::CapacityOverflow)?;
        let required = minimum_capacity_for_count(count);
        if self.capacity() >= required {
            self.ensure_unique();
        } else {
            self.rebuild(HashedStorage::try_create(required)?);
        }
        Ok(())
    }

    /// Human-readable dump of capacity, occupancy and both directions of the
    /// bucket map.
    pub fn dump(&self) -> String
    where
        K: fmt::Debug,
    {
        let storage = &*self.storage;
        let capacity = storage.capacity();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "capacity: {}; count: {}; bytes allocated: {}",
            capacity,
            storage.len(),
            storage.bytes_allocated()
        );
        let _ = writeln!(out, "occupancy: {:?}", storage.initialized_buckets());
        for (position, bucket) in storage.bucket_map().iter().enumerate() {
            let _ = writeln!(
                out,
                "position {} ➞ bucket {} [{:?}]",
                position,
                bucket,
                storage.key(bucket)
            );
        }
        for offset in 0..capacity {
            let bucket = HashBucket::new(offset, capacity);
            if storage.is_occupied(bucket) {
                let _ = writeln!(
                    out,
                    "bucket {}, ideal bucket = {}",
                    bucket,
                    ideal_bucket(storage.hash(bucket), capacity)
                );
            } else {
                let _ = writeln!(out, "bucket {}, empty", bucket);
            }
        }
        out
    }

    /// Invariant: occupancy, header count and bucket map agree; every
    /// element is reachable from its ideal bucket; positions and buckets
    /// form a bijection.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let storage = &*self.storage;
        let map = storage.bucket_map();
        let occupancy = storage.initialized_buckets();
        assert_eq!(occupancy.count(), storage.len(), "occupancy vs count");
        assert_eq!(map.len(), storage.len(), "bucket map vs count");
        for position in 0..map.len() {
            let bucket = map.bucket_at(position);
            assert!(occupancy.get(bucket.offset()), "position {} maps to an empty bucket", position);
            assert_eq!(map.position_of(bucket), Some(position));
            assert_eq!(self.find(storage.key(bucket)), Probe::Occupied(bucket));
            assert_eq!(
                storage.hash(bucket),
                self.hasher.hash_one(storage.key(bucket)),
                "stale hash in bucket {}",
                bucket
            );
        }
        assert!(occupancy.count() < storage.capacity(), "no vacant bucket left");
    }
}

impl<K: Clone, V: Clone, S: Clone> Clone for HashedBuffer<K, V, S> {
    /// Share the storage; the first mutation through either buffer clones it.
    fn clone(&self) -> Self {
        self.storage.install_clone_hook();
        HashedBuffer {
            storage: Rc::clone(&self.storage),
            hasher: self.hasher.clone(),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for HashedBuffer<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Elements in position order.
pub struct Iter<'a, K, V> {
    storage: &'a HashedStorage<K, V>,
    front: usize,
    back: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    #[inline]
    fn entry(&self, position: usize) -> (&'a K, &'a V) {
        let storage = self.storage;
        let bucket = storage.bucket_map().bucket_at(position);
        (storage.key(bucket), storage.value(bucket))
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        let entry = self.entry(self.front);
        self.front += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back - self.front;
        (n, Some(n))
    }
}

impl<K, V> DoubleEndedIterator for Iter<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        Some(self.entry(self.back))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            storage: self.storage,
            front: self.front,
            back: self.back,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::hash::Hasher;

    /// Hashes integers to themselves so tests can place keys in chosen
    /// buckets.
    #[derive(Clone, Copy, Default)]
    pub(crate) struct IdentityBuildHasher;

    #[derive(Default)]
    pub(crate) struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = (self.0 << 8) | u64::from(b);
            }
        }
        fn write_u64(&mut self, n: u64) {
            self.0 = n;
        }
        fn write_usize(&mut self, n: usize) {
            self.0 = n as u64;
        }
    }

    impl BuildHasher for IdentityBuildHasher {
        type Hasher = IdentityHasher;
        fn build_hasher(&self) -> IdentityHasher {
            IdentityHasher::default()
        }
    }

    type Set = HashedBuffer<u64, (), IdentityBuildHasher>;

    fn set_of(keys: &[u64]) -> Set {
        let mut b = Set::with_capacity_and_hasher(keys.len(), IdentityBuildHasher);
        for &k in keys {
            b.ensure_unique_with_capacity(b.len() + 1);
            b.append(k, ()).unwrap();
        }
        b.assert_consistent();
        b
    }

    fn keys(b: &Set) -> Vec<u64> {
        b.iter().map(|(k, _)| *k).collect()
    }

    fn bucket_of(b: &Set, key: u64) -> usize {
        b.find(&key).bucket().offset()
    }

    #[test]
    fn minimum_capacity_tracks_load_factor() {
        assert_eq!(minimum_capacity_for_count(0), 1);
        assert_eq!(minimum_capacity_for_count(1), 2);
        assert_eq!(minimum_capacity_for_count(3), 4);
        assert_eq!(minimum_capacity_for_count(6), 8);
        assert_eq!(minimum_capacity_for_count(7), 9);
        assert_eq!(minimum_capacity_for_count(12), 16);
        assert_eq!(minimum_capacity_for_count(usize::MAX), usize::MAX);
        for n in 3..200usize {
            assert_eq!(minimum_capacity_for_count(n), ((n as f64) / MAX_LOAD_FACTOR) as usize);
        }
    }

    #[test]
    fn colliding_keys_probe_linearly() {
        let mut b = set_of(&[1, 17, 33, 2]);
        assert_eq!(b.capacity(), 8);
        b.reserve(8);
        // 1, 17 and 33 all start at bucket 1.
        assert_eq!(b.capacity(), 16);
        assert_eq!(bucket_of(&b, 1), 1);
        assert_eq!(bucket_of(&b, 17), 2);
        assert_eq!(bucket_of(&b, 33), 3);
        assert_eq!(bucket_of(&b, 2), 4);
        assert_eq!(keys(&b), [1, 17, 33, 2]);
        assert_eq!(b.find(&49), Probe::Vacant(HashBucket::new(5, 16)));
    }

    /// Invariant: removing the head of a collision run pulls the rest back
    /// so every survivor stays reachable.
    #[test]
    fn destroy_patches_collision_run() {
        let mut b = Set::with_capacity_and_hasher(12, IdentityBuildHasher);
        for k in [1, 17, 33, 2] {
            b.append(k, ()).unwrap();
        }
        assert_eq!(b.capacity(), 16);
        assert_eq!(b.destroy_at(0), (1, ()));
        b.assert_consistent();
        assert_eq!(keys(&b), [17, 33, 2]);
        // The latest member of the run fills the hole first.
        assert_eq!(bucket_of(&b, 33), 1);
        assert_eq!(bucket_of(&b, 17), 2);
        assert_eq!(bucket_of(&b, 2), 3);
        assert!(!b.contains(&1));
    }

    thread_local!(static HASH_CALLS: core::cell::Cell<usize> = const { core::cell::Cell::new(0) });

    /// Identity hashing that counts every hash computed.
    #[derive(Clone, Default)]
    struct CountingBuildHasher;

    impl BuildHasher for CountingBuildHasher {
        type Hasher = IdentityHasher;
        fn build_hasher(&self) -> IdentityHasher {
            HASH_CALLS.with(|n| n.set(n.get() + 1));
            IdentityHasher::default()
        }
    }

    /// Invariant: removal, hole patching, truncation and growth place
    /// elements by their stored hash and never hash a key again.
    #[test]
    fn destroy_and_growth_do_not_rehash() {
        let mut b = HashedBuffer::<u64, (), _>::with_capacity_and_hasher(4, CountingBuildHasher);
        // 1, 65 and 129 share bucket 1 at capacities 8 and 64.
        for k in [1u64, 65, 129, 2] {
            b.ensure_unique_with_capacity(b.len() + 1);
            b.append(k, ()).unwrap();
        }
        assert_eq!(b.capacity(), 8);
        let before = HASH_CALLS.with(|n| n.get());

        b.reserve(40);
        assert_eq!(b.capacity(), 64);
        assert_eq!(b.destroy_at(0), (1, ()));
        b.truncate(2);
        assert_eq!(HASH_CALLS.with(|n| n.get()), before);

        b.assert_consistent();
        assert_eq!(b.iter().map(|(k, _)| *k).collect::<Vec<_>>(), [65, 129]);
        assert!(b.dump().contains("ideal bucket = 1"));
    }

    #[test]
    fn destroy_leaves_unrelated_elements_in_place() {
        let mut b = Set::with_capacity_and_hasher(12, IdentityBuildHasher);
        for k in [3, 4, 19] {
            b.append(k, ()).unwrap();
        }
        // 3@3, 4@4, 19@5 (ideal 3). Removing 4 lets 19 move into bucket 4.
        assert_eq!(bucket_of(&b, 19), 5);
        b.destroy_at(1);
        b.assert_consistent();
        assert_eq!(bucket_of(&b, 3), 3);
        assert_eq!(bucket_of(&b, 19), 4);
        assert_eq!(keys(&b), [3, 19]);
    }

    #[test]
    fn destroy_does_not_move_element_before_its_ideal_bucket() {
        let mut b = Set::with_capacity_and_hasher(12, IdentityBuildHasher);
        for k in [3, 4, 5] {
            b.append(k, ()).unwrap();
        }
        b.destroy_at(0);
        b.assert_consistent();
        assert_eq!(bucket_of(&b, 4), 4);
        assert_eq!(bucket_of(&b, 5), 5);
    }

    #[test]
    fn destroy_patches_run_wrapping_past_the_end() {
        let mut b = Set::with_capacity_and_hasher(12, IdentityBuildHasher);
        // 15, 31, 47 start at bucket 15 and wrap to 0 and 1; 0 then lands at 2.
        for k in [15, 31, 47, 0] {
            b.append(k, ()).unwrap();
        }
        assert_eq!(bucket_of(&b, 47), 1);
        assert_eq!(bucket_of(&b, 0), 2);
        b.destroy_at(0);
        b.assert_consistent();
        assert_eq!(bucket_of(&b, 47), 15);
        assert_eq!(bucket_of(&b, 31), 0);
        assert_eq!(bucket_of(&b, 0), 1);
        assert_eq!(keys(&b), [31, 47, 0]);
    }

    #[test]
    fn destroy_last_element_empties_buffer() {
        let mut b = set_of(&[9]);
        b.destroy_at(0);
        b.assert_consistent();
        assert!(b.is_empty());
        assert!(b.storage().initialized_buckets().is_empty());
        assert!(!b.contains(&9));
    }

    #[test]
    fn append_rejects_duplicates() {
        let mut b = set_of(&[5, 6]);
        b.ensure_unique_with_capacity(3);
        assert_eq!(b.append(6, ()), Err(Error::DuplicateElement { position: 1 }));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn replace_at_keeps_position() {
        let mut b = set_of(&[1, 2, 3]);
        assert_eq!(b.replace_at(1, 20, ()), Ok((2, ())));
        b.assert_consistent();
        assert_eq!(keys(&b), [1, 20, 3]);

        // Equal key: nothing moves.
        let before = bucket_of(&b, 20);
        assert_eq!(b.replace_at(1, 20, ()), Ok((20, ())));
        assert_eq!(bucket_of(&b, 20), before);

        assert_eq!(
            b.replace_at(0, 3, ()),
            Err(Error::DuplicateElement { position: 2 })
        );
        assert_eq!(keys(&b), [1, 20, 3]);
        assert_eq!(
            b.replace_at(3, 7, ()),
            Err(Error::PositionOutOfRange { position: 3, len: 3 })
        );
    }

    #[test]
    fn replace_at_swaps_value_for_equal_key() {
        let mut b: HashedBuffer<u64, &str, IdentityBuildHasher> =
            HashedBuffer::with_capacity_and_hasher(4, IdentityBuildHasher);
        b.append(1, "one").unwrap();
        assert_eq!(b.replace_at(0, 1, "uno"), Ok((1, "one")));
        assert_eq!(b.get_index(0), Some((&1, &"uno")));
    }

    #[test]
    fn replace_range_splices_in_order() {
        let mut b = set_of(&[1, 2, 3, 4]);
        b.ensure_unique_with_capacity(6);
        let removed = b
            .replace_range(1..3, vec![(10, ()), (4, ()), (11, ()), (10, ())])
            .unwrap();
        b.assert_consistent();
        assert_eq!(removed, [(2, ()), (3, ())]);
        // 4 is already present and the second 10 repeats the first.
        assert_eq!(keys(&b), [1, 10, 11, 4]);
    }

    #[test]
    fn replace_range_can_reinsert_removed_elements() {
        let mut b = set_of(&[1, 2, 3]);
        b.replace_range(0..3, vec![(3, ()), (2, ()), (1, ())]).unwrap();
        b.assert_consistent();
        assert_eq!(keys(&b), [3, 2, 1]);
    }

    #[test]
    fn replace_range_rejects_bad_bounds() {
        let mut b = set_of(&[1, 2]);
        assert_eq!(
            b.replace_range(1..3, Vec::new()),
            Err(Error::RangeOutOfBounds { start: 1, end: 3, len: 2 })
        );
        assert_eq!(keys(&b), [1, 2]);
    }

    #[test]
    fn growth_preserves_order_and_rounds_capacity() {
        let mut b = Set::with_capacity_and_hasher(0, IdentityBuildHasher);
        assert_eq!(b.capacity(), 1);
        let mut capacities = Vec::new();
        for k in [7, 6, 5, 4, 3, 2, 1] {
            b.ensure_unique_with_capacity(b.len() + 1);
            b.append(k, ()).unwrap();
            capacities.push(b.capacity());
        }
        b.assert_consistent();
        assert_eq!(capacities, [2, 4, 4, 8, 8, 8, 16]);
        assert_eq!(keys(&b), [7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn ensure_unique_with_capacity_reports_work_done() {
        let mut b = set_of(&[1, 2]);
        let fits = b.capacity();
        assert_eq!(b.ensure_unique_with_capacity(2), Reallocation::default());
        let grown = b.ensure_unique_with_capacity(fits);
        assert!(grown.reallocated && grown.capacity_changed);
        assert!(b.capacity() > fits);

        let shared = b.clone();
        assert!(!b.is_unique());
        let cow = b.ensure_unique_with_capacity(2);
        assert!(cow.reallocated && !cow.capacity_changed);
        assert!(b.is_unique() && shared.is_unique());
        assert!(!b.ptr_eq(&shared));
    }

    #[test]
    fn clone_shares_until_mutation() {
        let mut a = set_of(&[1, 2, 3]);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        a.ensure_unique();
        a.destroy_at(0);
        assert_eq!(keys(&a), [2, 3]);
        assert_eq!(keys(&b), [1, 2, 3]);
        b.assert_consistent();
    }

    #[test]
    fn growth_while_shared_leaves_other_buffer_intact() {
        let mut a = set_of(&[1, 2, 3]);
        let b = a.clone();
        a.reserve(20);
        a.append(4, ()).unwrap();
        assert_eq!(keys(&b), [1, 2, 3]);
        assert_eq!(keys(&a), [1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "uniquely referenced")]
    fn mutating_shared_storage_panics() {
        let mut a = set_of(&[1]);
        let _b = a.clone();
        a.destroy_at(0);
    }

    #[test]
    fn try_reserve_reports_overflow() {
        let mut b = set_of(&[1]);
        assert_eq!(b.try_reserve(usize::MAX), Err(Error::CapacityOverflow));
        assert_eq!(b.try_reserve(usize::MAX / 2), Err(Error::CapacityOverflow));
        assert_eq!(b.try_reserve(10), Ok(()));
        assert_eq!(b.capacity(), 16);
    }

    #[test]
    fn from_iter_drops_duplicates() {
        let (b, discarded) = HashedBuffer::from_iter_with_hasher(
            [3u64, 1, 3, 2, 1].into_iter().map(|k| (k, ())),
            IdentityBuildHasher,
        );
        assert_eq!(discarded, 2);
        assert_eq!(keys(&b), [3, 1, 2]);
        assert_eq!(b.len(), 3);
        b.assert_consistent();
    }

    #[test]
    fn truncate_and_clear() {
        let mut b = set_of(&[1, 2, 3, 4]);
        let capacity = b.capacity();
        b.truncate(2);
        b.assert_consistent();
        assert_eq!(keys(&b), [1, 2]);
        b.clear();
        assert!(b.is_empty());
        assert_eq!(b.capacity(), capacity);
    }

    #[test]
    fn dump_lists_positions_and_buckets() {
        let b = set_of(&[1, 9]);
        let text = b.dump();
        assert!(text.starts_with("capacity: 4; count: 2;"), "{}", text);
        assert!(text.contains("position 0 ➞ bucket 1 [1]"), "{}", text);
        assert!(text.contains("position 1 ➞ bucket 2 [9]"), "{}", text);
        assert!(text.contains("bucket 2, ideal bucket = 1"), "{}", text);
        assert!(text.contains("bucket 0, empty"), "{}", text);
    }

    #[test]
    fn iter_is_double_ended_and_exact() {
        let b = set_of(&[4, 5, 6]);
        let mut it = b.iter();
        assert_eq!(it.len(), 3);
        assert_eq!(it.next_back(), Some((&6, &())));
        assert_eq!(it.next(), Some((&4, &())));
        assert_eq!(it.len(), 1);
        assert_eq!(it.next(), Some((&5, &())));
        assert_eq!(it.next_back(), None);
    }
}
