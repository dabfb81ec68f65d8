//! HashBucketMap: bidirectional index between logical positions and buckets.
//!
//! Word layout (all `usize`, `EMPTY` marks an unassigned slot):
//!
//! ```text
//! [ len | positions[0..capacity] | buckets[0..capacity] ]
//! ```
//!
//! `positions[p]` is the bucket offset of the element at position `p`;
//! `buckets[b]` is the position of the element stored in bucket `b`. Both
//! directions are rewritten by every mutating call so that
//! `buckets[positions[p]] == p` for all `p < len`, and positions stay
//! contiguous from zero.

use crate::bucket::HashBucket;
use core::fmt;
use core::ops::Range;

const EMPTY: usize = usize::MAX;
const LEN: usize = 0;
const POSITIONS: usize = 1;

/// Number of words needed by a map over `capacity` buckets.
#[inline]
pub const fn words_for(capacity: usize) -> usize {
    capacity * 2 + 1
}

#[derive(Clone)]
pub struct HashBucketMap<W> {
    words: W,
    capacity: usize,
}

impl HashBucketMap<Box<[usize]>> {
    /// Allocate a standalone, empty map.
    pub fn with_capacity(capacity: usize) -> Self {
        let words = vec![0usize; words_for(capacity)].into_boxed_slice();
        let mut map = HashBucketMap { words, capacity };
        map.initialize();
        map
    }
}

impl<W> HashBucketMap<W>
where
    W: AsRef<[usize]>,
{
    /// Wrap words that already hold a map (or will be initialized).
    pub fn new(words: W, capacity: usize) -> Self {
        assert!(
            words.as_ref().len() >= words_for(capacity),
            "bucket map over {} buckets needs {} words, got {}",
            capacity,
            words_for(capacity),
            words.as_ref().len()
        );
        HashBucketMap { words, capacity }
    }

    #[inline]
    fn buckets_base(&self) -> usize {
        POSITIONS + self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words.as_ref()[LEN]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bucket assigned to `position`.
    ///
    /// Panics if `position >= len`.
    #[inline]
    pub fn bucket_at(&self, position: usize) -> HashBucket {
        assert!(
            position < self.len(),
            "position {} out of range for a map of {} positions",
            position,
            self.len()
        );
        HashBucket::new(self.words.as_ref()[POSITIONS + position], self.capacity)
    }

    /// Position assigned to `bucket`, if any.
    #[inline]
    pub fn position_of(&self, bucket: HashBucket) -> Option<usize> {
        match self.words.as_ref()[self.buckets_base() + bucket.offset()] {
            EMPTY => None,
            p => Some(p),
        }
    }

    /// Buckets in position order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = HashBucket> + ExactSizeIterator + '_ {
        let capacity = self.capacity;
        self.words.as_ref()[POSITIONS..POSITIONS + self.len()]
            .iter()
            .map(move |&offset| HashBucket::new(offset, capacity))
    }
}

impl<W> HashBucketMap<W>
where
    W: AsRef<[usize]> + AsMut<[usize]>,
{
    /// Reset to an empty map with every slot unassigned.
    pub fn initialize(&mut self) {
        let n = words_for(self.capacity);
        let words = self.words.as_mut();
        words[LEN] = 0;
        words[POSITIONS..n].fill(EMPTY);
    }

    #[inline]
    fn set_len(&mut self, len: usize) {
        self.words.as_mut()[LEN] = len;
    }

    #[inline]
    fn link(&mut self, position: usize, bucket: usize) {
        let base = self.buckets_base();
        let words = self.words.as_mut();
        words[POSITIONS + position] = bucket;
        words[base + bucket] = position;
    }

    /// Assign `bucket` to `position`: appends when `position == len`,
    /// otherwise replaces the bucket currently held by `position`.
    pub fn set(&mut self, position: usize, bucket: HashBucket) {
        if position == self.len() {
            self.append(bucket);
        } else {
            self.update(position, bucket);
        }
    }

    /// Assign `bucket` to a new position at the end.
    pub fn append(&mut self, bucket: HashBucket) {
        let len = self.len();
        assert!(len < self.capacity, "bucket map is full ({} positions)", len);
        debug_assert!(self.position_of(bucket).is_none(), "bucket {} already assigned", bucket);
        self.link(len, bucket.offset());
        self.set_len(len + 1);
    }

    /// Give `position` a different bucket, releasing the one it held.
    pub fn update(&mut self, position: usize, bucket: HashBucket) {
        let old = self.bucket_at(position).offset();
        if old == bucket.offset() {
            return;
        }
        let base = self.buckets_base();
        self.words.as_mut()[base + old] = EMPTY;
        self.link(position, bucket.offset());
    }

    /// Move the position held by `old` over to `new`.
    ///
    /// Panics if `old` has no position.
    pub fn replace_bucket(&mut self, old: HashBucket, new: HashBucket) {
        let position = match self.position_of(old) {
            Some(p) => p,
            None => panic!("bucket {} has not been assigned a position", old),
        };
        let base = self.buckets_base();
        self.words.as_mut()[base + old.offset()] = EMPTY;
        self.link(position, new.offset());
    }

    /// Remove `position`, shifting every later position down by one.
    pub fn remove_at(&mut self, position: usize) -> HashBucket {
        let removed = self.bucket_at(position);
        let len = self.len();
        let base = self.buckets_base();
        let words = self.words.as_mut();
        words[base + removed.offset()] = EMPTY;
        for p in position + 1..len {
            let bucket = words[POSITIONS + p];
            words[POSITIONS + p - 1] = bucket;
            words[base + bucket] = p - 1;
        }
        words[POSITIONS + len - 1] = EMPTY;
        self.set_len(len - 1);
        removed
    }

    /// Replace the buckets at `range` with `buckets`, shifting the tail.
    ///
    /// `buckets` must not hold buckets assigned to positions outside `range`.
    pub fn replace_range(&mut self, range: Range<usize>, buckets: &[HashBucket]) {
        let len = self.len();
        assert!(
            range.start <= range.end && range.end <= len,
            "range {}..{} out of bounds for a map of {} positions",
            range.start,
            range.end,
            len
        );
        let new_len = len - range.len() + buckets.len();
        assert!(
            new_len <= self.capacity,
            "bucket map over {} buckets cannot hold {} positions",
            self.capacity,
            new_len
        );

        let base = self.buckets_base();
        let words = self.words.as_mut();
        for p in range.clone() {
            let old = words[POSITIONS + p];
            if words[base + old] == p {
                words[base + old] = EMPTY;
            }
        }

        let new_end = range.start + buckets.len();
        words.copy_within(POSITIONS + range.end..POSITIONS + len, POSITIONS + new_end);
        if new_len < len {
            words[POSITIONS + new_len..POSITIONS + len].fill(EMPTY);
        }
        for (i, bucket) in buckets.iter().enumerate() {
            words[POSITIONS + range.start + i] = bucket.offset();
        }
        for p in range.start..new_len {
            let bucket = words[POSITIONS + p];
            words[base + bucket] = p;
        }
        self.set_len(new_len);
    }

    /// Insert `buckets` before `position`.
    pub fn insert_at(&mut self, position: usize, buckets: &[HashBucket]) {
        self.replace_range(position..position, buckets);
    }

    /// Overwrite this map with the contents of `other`.
    pub fn copy_from<O: AsRef<[usize]>>(&mut self, other: &HashBucketMap<O>) {
        assert_eq!(self.capacity, other.capacity, "bucket map capacity mismatch");
        let n = words_for(self.capacity);
        self.words.as_mut()[..n].copy_from_slice(&other.words.as_ref()[..n]);
    }
}

impl<W: AsRef<[usize]>> fmt::Debug for HashBucketMap<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "len: {}; capacity: {}", self.len(), self.capacity)?;
        writeln!(f, "positions: [")?;
        for (position, bucket) in self.iter().enumerate() {
            writeln!(f, "\t{}: {}", position, bucket)?;
        }
        writeln!(f, "]\nbuckets: [")?;
        for offset in 0..self.capacity {
            if let Some(p) = self.position_of(HashBucket::new(offset, self.capacity)) {
                writeln!(f, "\t{}: {}", offset, p)?;
            }
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(offset: usize) -> HashBucket {
        HashBucket::new(offset, 8)
    }

    fn offsets<W: AsRef<[usize]>>(m: &HashBucketMap<W>) -> Vec<usize> {
        m.iter().map(|b| b.offset()).collect()
    }

    /// Invariant: every position round-trips through its bucket and no
    /// unassigned bucket claims a position.
    fn assert_bijection<W: AsRef<[usize]>>(m: &HashBucketMap<W>) {
        for p in 0..m.len() {
            assert_eq!(m.position_of(m.bucket_at(p)), Some(p));
        }
        let assigned = (0..m.capacity())
            .filter(|&o| m.position_of(HashBucket::new(o, m.capacity())).is_some())
            .count();
        assert_eq!(assigned, m.len());
    }

    #[test]
    fn append_and_lookup_both_ways() {
        let mut m = HashBucketMap::with_capacity(8);
        m.set(0, b(5));
        m.set(1, b(2));
        m.append(b(7));
        assert_eq!(m.len(), 3);
        assert_eq!(m.bucket_at(1), b(2));
        assert_eq!(m.position_of(b(7)), Some(2));
        assert_eq!(m.position_of(b(0)), None);
        assert_bijection(&m);
    }

    #[test]
    fn set_on_existing_position_releases_old_bucket() {
        let mut m = HashBucketMap::with_capacity(8);
        m.append(b(1));
        m.append(b(2));
        m.set(0, b(6));
        assert_eq!(offsets(&m), [6, 2]);
        assert_eq!(m.position_of(b(1)), None);
        assert_bijection(&m);
    }

    #[test]
    fn replace_bucket_keeps_position() {
        let mut m = HashBucketMap::with_capacity(8);
        for o in [3, 4, 5] {
            m.append(b(o));
        }
        m.replace_bucket(b(4), b(0));
        assert_eq!(offsets(&m), [3, 0, 5]);
        assert_eq!(m.position_of(b(4)), None);
        assert_eq!(m.position_of(b(0)), Some(1));
        assert_bijection(&m);
    }

    #[test]
    fn replace_unassigned_bucket_panics() {
        let mut m = HashBucketMap::with_capacity(8);
        m.append(b(3));
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            m.replace_bucket(b(1), b(2));
        }));
        assert!(res.is_err());
    }

    #[test]
    fn remove_at_compacts_positions() {
        let mut m = HashBucketMap::with_capacity(8);
        for o in [3, 4, 5, 6] {
            m.append(b(o));
        }
        assert_eq!(m.remove_at(1), b(4));
        assert_eq!(offsets(&m), [3, 5, 6]);
        assert_eq!(m.position_of(b(6)), Some(2));
        assert_eq!(m.remove_at(2), b(6));
        assert_eq!(m.remove_at(0), b(3));
        assert_eq!(offsets(&m), [5]);
        assert_bijection(&m);
    }

    #[test]
    fn replace_range_grows_and_shrinks() {
        let mut m = HashBucketMap::with_capacity(8);
        for o in [0, 1, 2, 3] {
            m.append(b(o));
        }
        // Same length.
        m.replace_range(1..3, &[b(6), b(7)]);
        assert_eq!(offsets(&m), [0, 6, 7, 3]);
        assert_bijection(&m);

        // Shrink.
        m.replace_range(0..3, &[b(5)]);
        assert_eq!(offsets(&m), [5, 3]);
        assert_bijection(&m);

        // Grow in the middle.
        m.replace_range(1..1, &[b(0), b(1), b(2)]);
        assert_eq!(offsets(&m), [5, 0, 1, 2, 3]);
        assert_bijection(&m);

        // Clear.
        m.replace_range(0..5, &[]);
        assert!(m.is_empty());
        assert_bijection(&m);
    }

    #[test]
    fn replace_range_may_reuse_released_buckets() {
        let mut m = HashBucketMap::with_capacity(8);
        for o in [4, 5] {
            m.append(b(o));
        }
        m.replace_range(0..2, &[b(5), b(4)]);
        assert_eq!(offsets(&m), [5, 4]);
        assert_bijection(&m);
    }

    #[test]
    fn insert_at_shifts_tail() {
        let mut m = HashBucketMap::with_capacity(8);
        m.append(b(1));
        m.append(b(2));
        m.insert_at(0, &[b(7)]);
        assert_eq!(offsets(&m), [7, 1, 2]);
        assert_bijection(&m);
    }

    #[test]
    fn view_over_borrowed_words() {
        let mut words = vec![0usize; words_for(4)];
        {
            let mut m = HashBucketMap::new(&mut words[..], 4);
            m.initialize();
            m.append(HashBucket::new(3, 4));
        }
        let m = HashBucketMap::new(&words[..], 4);
        assert_eq!(m.len(), 1);
        assert_eq!(m.bucket_at(0).offset(), 3);
        let dump = format!("{:?}", m);
        assert!(dump.contains("len: 1; capacity: 4"));
    }
}
