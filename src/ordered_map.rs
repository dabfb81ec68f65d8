//! OrderedMap: a hash map that remembers insertion order.
//!
//! Keys and values sit in parallel arrays of one slab, so hole patching and
//! growth move them together.

use crate::buffer::{HashedBuffer, Iter};
use crate::error::Error;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::hash_map::DefaultHashBuilder;

pub struct OrderedMap<K, V, S = DefaultHashBuilder> {
    buffer: HashedBuffer<K, V, S>,
}

impl<K, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<K, V, S: Default> Default for OrderedMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> OrderedMap<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        OrderedMap {
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

    pub fn get_index(&self, position: usize) -> Option<(&K, &V)> {
        self.buffer.get_index(position)
    }

    pub fn first(&self) -> Option<(&K, &V)> {
        self.get_index(0)
    }

    pub fn last(&self) -> Option<(&K, &V)> {
        self.len().checked_sub(1).and_then(|p| self.get_index(p))
    }

    /// Entries in position order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        self.buffer.iter()
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + ExactSizeIterator + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator + '_ {
        self.iter().map(|(_, v)| v)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.buffer.ptr_eq(&other.buffer)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl<K, V, S> OrderedMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.buffer.contains(key)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let position = self.buffer.position_of(key)?;
        self.get_index(position).map(|(_, v)| v)
    }

    pub fn get_index_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.buffer.position_of(key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let position = self.buffer.position_of(key)?;
        self.buffer.ensure_unique();
        self.buffer.value_at_mut(position)
    }

    /// Insert or update. An existing key keeps its position and the old
    /// value is returned; a new key is appended.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(position) = self.buffer.position_of(&key) {
            self.buffer.ensure_unique();
            let slot = self
                .buffer
                .value_at_mut(position)
                .expect("position of a present key must resolve");
            return Some(core::mem::replace(slot, value));
        }
        self.buffer.ensure_unique_with_capacity(self.len() + 1);
        self.buffer
            .append(key, value)
            .expect("absent key must append");
        None
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let position = self.buffer.position_of(key)?;
        self.buffer.ensure_unique();
        Some(self.buffer.destroy_at(position))
    }

    pub fn remove_at(&mut self, position: usize) -> Result<(K, V), Error> {
        let len = self.len();
        if position >= len {
            return Err(Error::PositionOutOfRange { position, len });
        }
        self.buffer.ensure_unique();
        Ok(self.buffer.destroy_at(position))
    }

    pub fn pop(&mut self) -> Option<(K, V)> {
        let last = self.len().checked_sub(1)?;
        self.buffer.ensure_unique();
        Some(self.buffer.destroy_at(last))
    }

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

    pub fn dump(&self) -> String
    where
        K: fmt::Debug,
    {
        self.buffer.dump()
    }
}

impl<K: Clone, V: Clone, S: Clone> Clone for OrderedMap<K, V, S> {
    fn clone(&self) -> Self {
        OrderedMap {
            buffer: self.buffer.clone(),
        }
    }
}

impl<K: PartialEq, V: PartialEq, S> PartialEq for OrderedMap<K, V, S> {
    /// Equal when both hold equal entries in the same order.
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.len() == other.len() && self.iter().eq(other.iter()))
    }
}

impl<K: Eq, V: Eq, S> Eq for OrderedMap<K, V, S> {}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for OrderedMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> FromIterator<(K, V)> for OrderedMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    /// A repeated key keeps its first position and takes the last value.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::default();
        map.extend(iter);
        map
    }
}

impl<K, V, S> Extend<(K, V)> for OrderedMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a OrderedMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}
