//! OrderedSet: a hash set that remembers insertion order.
//!
//! Elements are addressed both by value (hashing) and by position. Clones
//! share storage until one of them is mutated.

use crate::buffer::{self, HashedBuffer};
use crate::error::Error;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::ops::{Index, Range};
use hashbrown::hash_map::DefaultHashBuilder;

pub struct OrderedSet<T, S = DefaultHashBuilder> {
    buffer: HashedBuffer<T, (), S>,
}

impl<T> OrderedSet<T> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// A set able to hold `capacity` elements without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<T, S: Default> Default for OrderedSet<T, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<T, S> OrderedSet<T, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        OrderedSet {
            buffer: HashedBuffer::with_capacity_and_hasher(capacity, hasher),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of buckets in the backing storage.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn hasher(&self) -> &S {
        self.buffer.hasher()
    }

    pub fn get_index(&self, position: usize) -> Option<&T> {
        self.buffer.get_index(position).map(|(t, _)| t)
    }

    pub fn first(&self) -> Option<&T> {
        self.get_index(0)
    }

    pub fn last(&self) -> Option<&T> {
        self.len().checked_sub(1).and_then(|p| self.get_index(p))
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            inner: self.buffer.iter(),
        }
    }

    /// Whether both sets share one storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.buffer.ptr_eq(&other.buffer)
    }

    /// Remove every element, keeping the capacity.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl<T, S> OrderedSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.buffer.contains(value)
    }

    /// The stored element equal to `value`.
    pub fn get<Q>(&self, value: &Q) -> Option<&T>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_index(self.buffer.position_of(value)?)
    }

    pub fn get_index_of<Q>(&self, value: &Q) -> Option<usize>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.buffer.position_of(value)
    }

    /// Append `value` unless an equal element is present. Returns whether
    /// it was added.
    pub fn insert(&mut self, value: T) -> bool {
        if self.buffer.contains(&value) {
            return false;
        }
        self.buffer.ensure_unique_with_capacity(self.len() + 1);
        self.buffer
            .append(value, ())
            .expect("absent element must append");
        true
    }

    /// Insert `value` before `position`, shifting later elements.
    pub fn insert_at(&mut self, position: usize, value: T) -> Result<(), Error> {
        let len = self.len();
        if position > len {
            return Err(Error::PositionOutOfRange { position, len });
        }
        if let Some(existing) = self.buffer.position_of(&value) {
            return Err(Error::DuplicateElement { position: existing });
        }
        self.buffer.ensure_unique_with_capacity(len + 1);
        self.buffer
            .replace_range(position..position, Some((value, ())))?;
        Ok(())
    }

    pub fn remove<Q>(&mut self, value: &Q) -> Option<T>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let position = self.buffer.position_of(value)?;
        self.buffer.ensure_unique();
        Some(self.buffer.destroy_at(position).0)
    }

    pub fn remove_at(&mut self, position: usize) -> Result<T, Error> {
        let len = self.len();
        if position >= len {
            return Err(Error::PositionOutOfRange { position, len });
        }
        self.buffer.ensure_unique();
        Ok(self.buffer.destroy_at(position).0)
    }

    pub fn pop(&mut self) -> Option<T> {
        let last = self.len().checked_sub(1)?;
        self.buffer.ensure_unique();
        Some(self.buffer.destroy_at(last).0)
    }

    /// Put `value` at `position`, returning the element it displaces.
    ///
    /// Replacing an element with an equal one hands `value` straight back.
    /// Fails without mutation if `value` is stored at another position.
    pub fn replace_at(&mut self, position: usize, value: T) -> Result<T, Error> {
        let len = self.len();
        if position >= len {
            return Err(Error::PositionOutOfRange { position, len });
        }
        self.buffer.ensure_unique();
        self.buffer.replace_at(position, value, ()).map(|(t, _)| t)
    }

    /// Replace the elements in `range` with `values`.
    ///
    /// Values already present, in the set or earlier in `values`, are
    /// skipped. Returns the removed elements in order.
    pub fn replace_range<I>(&mut self, range: Range<usize>, values: I) -> Result<Vec<T>, Error>
    where
        I: IntoIterator<Item = T>,
    {
        let len = self.len();
        if range.start > range.end || range.end > len {
            return Err(Error::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                len,
            });
        }
        let values: Vec<T> = values.into_iter().collect();
        self.buffer
            .ensure_unique_with_capacity(len - range.len() + values.len());
        let removed = self
            .buffer
            .replace_range(range, values.into_iter().map(|t| (t, ())))?;
        Ok(removed.into_iter().map(|(t, _)| t).collect())
    }

    /// Keep the first `len` elements.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.buffer.ensure_unique();
            self.buffer.truncate(len);
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buffer.reserve(additional);
    }

    pub fn try_reserve(&mut self, additional: usize) -> Result<(), Error> {
        self.buffer.try_reserve(additional)
    }

    /// Human-readable dump of the backing storage.
    pub fn dump(&self) -> String
    where
        T: fmt::Debug,
    {
        self.buffer.dump()
    }
}

impl<T: Clone, S: Clone> Clone for OrderedSet<T, S> {
    fn clone(&self) -> Self {
        OrderedSet {
            buffer: self.buffer.clone(),
        }
    }
}

impl<T: PartialEq, S> PartialEq for OrderedSet<T, S> {
    /// Equal when both hold equal elements in the same order.
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.len() == other.len() && self.iter().eq(other.iter()))
    }
}

impl<T: Eq, S> Eq for OrderedSet<T, S> {}

impl<T: fmt::Debug, S> fmt::Debug for OrderedSet<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T, S> Index<usize> for OrderedSet<T, S> {
    type Output = T;

    fn index(&self, position: usize) -> &T {
        match self.get_index(position) {
            Some(t) => t,
            None => panic!(
                "position {} out of range for an ordered set of {} elements",
                position,
                self.len()
            ),
        }
    }
}

impl<T, S> FromIterator<T> for OrderedSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
{
    /// Later duplicates are dropped; the first occurrence keeps its place.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let elements = iter.into_iter().map(|t| (t, ()));
        let (buffer, _) = HashedBuffer::from_iter_with_hasher(elements, S::default());
        OrderedSet { buffer }
    }
}

impl<T, S> Extend<T> for OrderedSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for value in iter {
            self.insert(value);
        }
    }
}

impl<'a, T, S> IntoIterator for &'a OrderedSet<T, S> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// Elements in position order.
#[derive(Clone)]
pub struct Iter<'a, T> {
    inner: buffer::Iter<'a, T, ()>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        self.inner.next().map(|(t, _)| t)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(t, _)| t)
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}
