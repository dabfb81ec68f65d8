//! HashedStorage: one heap slab holding the header, occupancy bits, bucket
//! map, stored hashes, key array and value array.
//!
//! Layout is computed by [`HashedStorageHeader::layout_for`] and recorded in
//! the header, so every typed view is derived from the header alone. Keys
//! and values live in `MaybeUninit` arrays; a bucket's element is
//! initialized exactly when its occupancy bit is set, and teardown drops
//! precisely those.
//!
//! Each occupied bucket also records the hash of its key, so moving
//! elements around (hole patching, growth) never calls back into `Hash`.
//!
//! Read access goes through `&self` views. Mutation stays inside the crate
//! and goes through `HashedStorage::parts_mut`, which hands out disjoint
//! mutable views of every region at once.

use crate::bitmap::BitMap;
use crate::bucket::HashBucket;
use crate::bucket_map::HashBucketMap;
use crate::error::Error;
use crate::header::{HashedStorageHeader, Region};
use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, MaybeUninit};
use core::ptr::{self, NonNull};
use core::slice;
use std::alloc;

/// Clones a storage without naming `Clone` bounds at the call site.
pub type CloneHook<K, V> = fn(&HashedStorage<K, V>) -> HashedStorage<K, V>;

/// The slab behind every ordered collection.
///
/// Outside the crate a storage is read-only: occupancy, positions and
/// elements can be inspected but not rewritten, so the occupancy bits
/// always describe which slots hold initialized elements.
///
/// ```compile_fail
/// use hashed_storage::OrderedSetStorage;
///
/// let mut storage = OrderedSetStorage::<Box<u64>>::create(4);
/// storage.parts_mut().initialized_buckets.set(0, true);
/// ```
pub struct HashedStorage<K, V = ()> {
    slab: NonNull<HashedStorageHeader>,
    clone_hook: Cell<Option<CloneHook<K, V>>>,
    _marker: PhantomData<(K, V)>,
}

/// Storage of an ordered set: keys only.
pub type OrderedSetStorage<T> = HashedStorage<T, ()>;

/// Storage of an ordered dictionary: a value array parallel to the keys.
pub type OrderedDictionaryStorage<K, V> = HashedStorage<K, V>;

impl<K, V> HashedStorage<K, V> {
    /// Allocate a slab with room for at least `minimum_capacity` buckets.
    ///
    /// The capacity is rounded up to a power of two. Panics with "capacity
    /// overflow" if the slab cannot be laid out; allocation failure aborts
    /// through [`alloc::handle_alloc_error`].
    pub fn create(minimum_capacity: usize) -> Self {
        match Self::try_create(minimum_capacity) {
            Ok(storage) => storage,
            Err(_) => panic!("capacity overflow"),
        }
    }

    pub fn try_create(minimum_capacity: usize) -> Result<Self, Error> {
        let capacity = minimum_capacity
            .max(1)
            .checked_next_power_of_two()
            .ok_or(Error::CapacityOverflow)?;
        let header = HashedStorageHeader::layout_for::<K, V>(capacity)?;
        let layout = header.layout();
        // SAFETY: the layout starts with the header, so its size is non-zero.
        let raw = unsafe { alloc::alloc(layout) };
        let slab = match NonNull::new(raw.cast::<HashedStorageHeader>()) {
            Some(slab) => slab,
            None => alloc::handle_alloc_error(layout),
        };
        let occupancy = header.initialized_buckets();
        let map = header.bucket_map();
        let hashes = header.hashes();
        // SAFETY: `raw` is a fresh allocation of `layout`, aligned for the
        // header. The word regions lie inside it and are aligned for their
        // element types.
        unsafe {
            slab.as_ptr().write(header);
            ptr::write_bytes(raw.add(occupancy.offset).cast::<usize>(), 0, occupancy.len);
            ptr::write_bytes(raw.add(map.offset).cast::<usize>(), 0, map.len);
            ptr::write_bytes(raw.add(hashes.offset).cast::<u64>(), 0, hashes.len);
        }
        let mut storage = HashedStorage {
            slab,
            clone_hook: Cell::new(None),
            _marker: PhantomData,
        };
        storage.parts_mut().bucket_map.initialize();
        log::trace!(
            "allocated hashed storage: {} buckets, {} bytes",
            capacity,
            layout.size()
        );
        Ok(storage)
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        self.slab.as_ptr().cast::<u8>()
    }

    #[inline]
    pub fn header(&self) -> &HashedStorageHeader {
        // SAFETY: the header is written at creation and lives as long as the slab.
        unsafe { self.slab.as_ref() }
    }

    /// Number of buckets.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.header().capacity()
    }

    /// Number of stored elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.header().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_allocated(&self) -> usize {
        self.header().bytes_allocated()
    }

    #[inline]
    fn words(&self, region: Region) -> &[usize] {
        // SAFETY: word regions are initialized at creation, aligned, and in bounds.
        unsafe { slice::from_raw_parts(self.base().add(region.offset).cast::<usize>(), region.len) }
    }

    #[inline]
    fn hashes(&self) -> &[u64] {
        let region = self.header().hashes();
        // SAFETY: the hash region is zeroed at creation, aligned, and in bounds.
        unsafe { slice::from_raw_parts(self.base().add(region.offset).cast::<u64>(), region.len) }
    }

    #[inline]
    fn elements<T>(&self, region: Region) -> &[MaybeUninit<T>] {
        // SAFETY: the region is in bounds and aligned for T; MaybeUninit
        // tolerates uninitialized slots.
        unsafe {
            slice::from_raw_parts(
                self.base().add(region.offset).cast::<MaybeUninit<T>>(),
                region.len,
            )
        }
    }

    pub fn initialized_buckets(&self) -> BitMap<&[usize]> {
        BitMap::new(self.words(self.header().initialized_buckets()), self.capacity())
    }

    pub fn bucket_map(&self) -> HashBucketMap<&[usize]> {
        HashBucketMap::new(self.words(self.header().bucket_map()), self.capacity())
    }

    #[inline]
    pub fn is_occupied(&self, bucket: HashBucket) -> bool {
        self.initialized_buckets().get(bucket.offset())
    }

    /// Hash recorded for the key in `bucket`. Panics if the bucket is empty.
    #[inline]
    pub fn hash(&self, bucket: HashBucket) -> u64 {
        assert!(self.is_occupied(bucket), "bucket {} is empty", bucket);
        self.hashes()[bucket.offset()]
    }

    /// Key stored in `bucket`. Panics if the bucket is empty.
    #[inline]
    pub fn key(&self, bucket: HashBucket) -> &K {
        assert!(self.is_occupied(bucket), "bucket {} is empty", bucket);
        // SAFETY: occupied buckets hold an initialized key.
        unsafe { self.elements::<K>(self.header().keys())[bucket.offset()].assume_init_ref() }
    }

    /// Value stored in `bucket`. Panics if the bucket is empty.
    #[inline]
    pub fn value(&self, bucket: HashBucket) -> &V {
        assert!(self.is_occupied(bucket), "bucket {} is empty", bucket);
        // SAFETY: occupied buckets hold an initialized value.
        unsafe { self.elements::<V>(self.header().values())[bucket.offset()].assume_init_ref() }
    }

    /// Mutable value stored in `bucket`. Panics if the bucket is empty.
    pub fn value_mut(&mut self, bucket: HashBucket) -> &mut V {
        assert!(self.is_occupied(bucket), "bucket {} is empty", bucket);
        let values = self.header().values();
        // SAFETY: occupied buckets hold an initialized value, and `&mut self`
        // rules out other views.
        unsafe {
            (*self
                .base()
                .add(values.offset)
                .cast::<MaybeUninit<V>>()
                .add(bucket.offset()))
            .assume_init_mut()
        }
    }

    /// Disjoint mutable views over every region of the slab.
    pub(crate) fn parts_mut(&mut self) -> StorageParts<'_, K, V> {
        let base = self.base();
        let (capacity, occupancy, map, hashes, keys, values) = {
            let h = self.header();
            (
                h.capacity(),
                h.initialized_buckets(),
                h.bucket_map(),
                h.hashes(),
                h.keys(),
                h.values(),
            )
        };
        // SAFETY: the header and the five regions do not overlap, all lie in
        // the slab, and `&mut self` guarantees no other view is alive.
        unsafe {
            StorageParts {
                header: &mut *self.slab.as_ptr(),
                initialized_buckets: BitMap::new(
                    slice::from_raw_parts_mut(base.add(occupancy.offset).cast::<usize>(), occupancy.len),
                    capacity,
                ),
                bucket_map: HashBucketMap::new(
                    slice::from_raw_parts_mut(base.add(map.offset).cast::<usize>(), map.len),
                    capacity,
                ),
                hashes: slice::from_raw_parts_mut(base.add(hashes.offset).cast::<u64>(), hashes.len),
                keys: slice::from_raw_parts_mut(base.add(keys.offset).cast::<MaybeUninit<K>>(), keys.len),
                values: slice::from_raw_parts_mut(
                    base.add(values.offset).cast::<MaybeUninit<V>>(),
                    values.len,
                ),
            }
        }
    }

    /// Register the deep-clone routine used when shared storage must be
    /// made unique.
    pub fn install_clone_hook(&self)
    where
        K: Clone,
        V: Clone,
    {
        self.clone_hook.set(Some(<Self as Clone>::clone));
    }

    pub fn clone_hook(&self) -> Option<CloneHook<K, V>> {
        self.clone_hook.get()
    }

    pub(crate) fn set_clone_hook(&self, hook: Option<CloneHook<K, V>>) {
        self.clone_hook.set(hook);
    }

    /// Deep-clone through the registered hook, if any.
    pub fn clone_with_hook(&self) -> Option<Self> {
        self.clone_hook.get().map(|clone| clone(self))
    }
}

impl<K: Clone, V: Clone> Clone for HashedStorage<K, V> {
    /// Clone every element into a slab of the same capacity. Bucket
    /// placement and position order are preserved.
    fn clone(&self) -> Self {
        let capacity = self.capacity();
        let mut copy = Self::create(capacity);
        {
            let mut parts = copy.parts_mut();
            for offset in self.initialized_buckets().non_zero_bits() {
                let bucket = HashBucket::new(offset, capacity);
                parts.initialize_bucket(
                    bucket,
                    self.hash(bucket),
                    self.key(bucket).clone(),
                    self.value(bucket).clone(),
                );
            }
            parts.bucket_map.copy_from(&self.bucket_map());
            parts.header.set_count(self.len());
        }
        copy.set_clone_hook(self.clone_hook());
        copy
    }
}

impl<K, V> Drop for HashedStorage<K, V> {
    fn drop(&mut self) {
        if mem::needs_drop::<K>() || mem::needs_drop::<V>() {
            let mut parts = self.parts_mut();
            for offset in parts.initialized_buckets.non_zero_bits() {
                // SAFETY: occupied buckets hold initialized elements, each
                // dropped once here.
                unsafe {
                    parts.keys[offset].assume_init_drop();
                    parts.values[offset].assume_init_drop();
                }
            }
        }
        let layout = self.header().layout();
        // SAFETY: the slab was allocated in `try_create` with this layout.
        unsafe { alloc::dealloc(self.base(), layout) }
    }
}

impl<K, V> fmt::Debug for HashedStorage<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashedStorage")
            .field("count", &self.len())
            .field("capacity", &self.capacity())
            .field("bytes_allocated", &self.bytes_allocated())
            .field("initialized_buckets", &self.initialized_buckets())
            .finish()
    }
}

/// Mutable views over one slab, borrowed together.
///
/// The primitives here keep the occupancy bits, element arrays and bucket
/// map in step. Probing and hole patching are layered on top by the buffer.
pub(crate) struct StorageParts<'a, K, V> {
    pub(crate) header: &'a mut HashedStorageHeader,
    pub(crate) initialized_buckets: BitMap<&'a mut [usize]>,
    pub(crate) bucket_map: HashBucketMap<&'a mut [usize]>,
    pub(crate) hashes: &'a mut [u64],
    pub(crate) keys: &'a mut [MaybeUninit<K>],
    pub(crate) values: &'a mut [MaybeUninit<V>],
}

impl<K, V> StorageParts<'_, K, V> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.header.capacity()
    }

    #[inline]
    pub fn is_occupied(&self, bucket: HashBucket) -> bool {
        self.initialized_buckets.get(bucket.offset())
    }

    #[inline]
    pub fn hash(&self, bucket: HashBucket) -> u64 {
        assert!(self.is_occupied(bucket), "bucket {} is empty", bucket);
        self.hashes[bucket.offset()]
    }

    #[inline]
    pub fn key(&self, bucket: HashBucket) -> &K {
        assert!(self.is_occupied(bucket), "bucket {} is empty", bucket);
        // SAFETY: occupied buckets hold an initialized key.
        unsafe { self.keys[bucket.offset()].assume_init_ref() }
    }

    #[inline]
    pub fn value_mut(&mut self, bucket: HashBucket) -> &mut V {
        assert!(self.is_occupied(bucket), "bucket {} is empty", bucket);
        // SAFETY: occupied buckets hold an initialized value.
        unsafe { self.values[bucket.offset()].assume_init_mut() }
    }

    /// Store an element in a vacant bucket and mark it occupied. The bucket
    /// map and count are left to the caller.
    pub fn initialize_bucket(&mut self, bucket: HashBucket, hash: u64, key: K, value: V) {
        let offset = bucket.offset();
        assert!(
            !self.initialized_buckets.get(offset),
            "bucket {} is already occupied",
            bucket
        );
        self.hashes[offset] = hash;
        self.keys[offset].write(key);
        self.values[offset].write(value);
        self.initialized_buckets.set(offset, true);
    }

    /// Move the element out of `bucket` and mark it vacant. The bucket map
    /// and count are left to the caller.
    pub fn take_bucket(&mut self, bucket: HashBucket) -> (K, V) {
        let offset = bucket.offset();
        assert!(
            self.initialized_buckets.set(offset, false),
            "bucket {} is empty",
            bucket
        );
        // SAFETY: the bit was set, so both slots are initialized; clearing
        // it first hands ownership to the caller.
        unsafe {
            (
                self.keys[offset].assume_init_read(),
                self.values[offset].assume_init_read(),
            )
        }
    }

    /// Relocate the element in `from` to the vacant bucket `to`, carrying
    /// its position along.
    pub fn move_bucket(&mut self, from: HashBucket, to: HashBucket) {
        let (from_offset, to_offset) = (from.offset(), to.offset());
        assert!(
            !self.initialized_buckets.get(to_offset),
            "bucket {} is already occupied",
            to
        );
        assert!(self.initialized_buckets.set(from_offset, false), "bucket {} is empty", from);
        // SAFETY: `from` was occupied and `to` vacant; the slots are distinct.
        unsafe {
            let key = self.keys[from_offset].assume_init_read();
            let value = self.values[from_offset].assume_init_read();
            self.keys[to_offset].write(key);
            self.values[to_offset].write(value);
        }
        self.hashes[to_offset] = self.hashes[from_offset];
        self.initialized_buckets.set(to_offset, true);
        self.bucket_map.replace_bucket(from, to);
    }

    /// Store an element in a vacant bucket at the next position.
    pub fn append(&mut self, bucket: HashBucket, hash: u64, key: K, value: V) -> usize {
        self.initialize_bucket(bucket, hash, key, value);
        let position = self.bucket_map.len();
        self.bucket_map.append(bucket);
        self.header.set_count(position + 1);
        position
    }
}
