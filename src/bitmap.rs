//! BitMap: fixed-size bit vector over a caller-supplied word buffer.
//!
//! The storage slab reserves a run of `usize` words for the occupancy bits
//! and hands out `BitMap<&[usize]>` / `BitMap<&mut [usize]>` views over it.
//! The map never reallocates; freshly allocated words must be cleared with
//! [`BitMap::initialize_to_zero`] before first use.

use core::fmt;

/// Number of bits held by one word.
pub const WORD_BITS: usize = usize::BITS as usize;

/// Number of words needed to hold `bit_count` bits.
#[inline]
pub const fn words_for(bit_count: usize) -> usize {
    bit_count.div_ceil(WORD_BITS)
}

#[derive(Clone)]
pub struct BitMap<W> {
    words: W,
    bit_count: usize,
}

impl BitMap<Box<[usize]>> {
    /// Allocate a standalone, zeroed map of `bit_count` bits.
    pub fn with_bit_count(bit_count: usize) -> Self {
        let words = vec![0usize; words_for(bit_count)].into_boxed_slice();
        BitMap { words, bit_count }
    }
}

impl<W> BitMap<W>
where
    W: AsRef<[usize]>,
{
    /// Wrap `words` as a map of `bit_count` bits.
    ///
    /// Panics if `words` is too short for `bit_count` bits.
    pub fn new(words: W, bit_count: usize) -> Self {
        assert!(
            words.as_ref().len() >= words_for(bit_count),
            "bit map of {} bits needs {} words, got {}",
            bit_count,
            words_for(bit_count),
            words.as_ref().len()
        );
        BitMap { words, bit_count }
    }

    pub fn bit_count(&self) -> usize {
        self.bit_count
    }

    #[inline]
    fn locate(&self, offset: usize) -> (usize, usize) {
        assert!(
            offset < self.bit_count,
            "bit offset {} out of range for a map of {} bits",
            offset,
            self.bit_count
        );
        (offset / WORD_BITS, offset % WORD_BITS)
    }

    #[inline]
    pub fn get(&self, offset: usize) -> bool {
        let (word, bit) = self.locate(offset);
        self.words.as_ref()[word] & (1 << bit) != 0
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.as_ref()[..words_for(self.bit_count)]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.as_ref()[..words_for(self.bit_count)]
            .iter()
            .all(|&w| w == 0)
    }

    /// Offsets of the set bits in ascending order.
    pub fn non_zero_bits(&self) -> NonZeroBits<'_> {
        NonZeroBits {
            words: self.words.as_ref(),
            front: 0,
            back: self.bit_count,
        }
    }

    /// First set bit at or after `offset`.
    pub fn next_set(&self, offset: usize) -> Option<usize> {
        if offset >= self.bit_count {
            return None;
        }
        NonZeroBits {
            words: self.words.as_ref(),
            front: offset,
            back: self.bit_count,
        }
        .next()
    }

    /// Last set bit strictly before `offset`.
    pub fn prev_set(&self, offset: usize) -> Option<usize> {
        NonZeroBits {
            words: self.words.as_ref(),
            front: 0,
            back: offset.min(self.bit_count),
        }
        .next_back()
    }

    pub fn words(&self) -> &[usize] {
        self.words.as_ref()
    }
}

impl<W> BitMap<W>
where
    W: AsRef<[usize]> + AsMut<[usize]>,
{
    /// Set or clear the bit at `offset`, returning its previous value.
    #[inline]
    pub fn set(&mut self, offset: usize, value: bool) -> bool {
        let (word, bit) = self.locate(offset);
        let w = &mut self.words.as_mut()[word];
        let previous = *w & (1 << bit) != 0;
        if value {
            *w |= 1 << bit;
        } else {
            *w &= !(1 << bit);
        }
        previous
    }

    pub fn initialize_to_zero(&mut self) {
        let n = words_for(self.bit_count);
        self.words.as_mut()[..n].fill(0);
    }

    /// Overwrite this map with the bits of `other`.
    ///
    /// Panics if the two maps differ in size.
    pub fn copy_from<O: AsRef<[usize]>>(&mut self, other: &BitMap<O>) {
        assert_eq!(self.bit_count, other.bit_count, "bit map size mismatch");
        let n = words_for(self.bit_count);
        self.words.as_mut()[..n].copy_from_slice(&other.words.as_ref()[..n]);
    }
}

impl<W: AsRef<[usize]>> fmt::Debug for BitMap<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BitMap(")?;
        for offset in 0..self.bit_count {
            f.write_str(if self.get(offset) { "1" } else { "0" })?;
        }
        f.write_str(")")
    }
}

/// Double-ended iterator over the set bits in `[front, back)`.
#[derive(Clone)]
pub struct NonZeroBits<'a> {
    words: &'a [usize],
    front: usize,
    back: usize,
}

impl Iterator for NonZeroBits<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.front < self.back {
            let word = self.words[self.front / WORD_BITS] >> (self.front % WORD_BITS);
            if word == 0 {
                self.front = (self.front / WORD_BITS + 1) * WORD_BITS;
                continue;
            }
            let offset = self.front + word.trailing_zeros() as usize;
            if offset >= self.back {
                self.front = self.back;
                return None;
            }
            self.front = offset + 1;
            return Some(offset);
        }
        None
    }
}

impl DoubleEndedIterator for NonZeroBits<'_> {
    fn next_back(&mut self) -> Option<usize> {
        while self.back > self.front {
            let last = self.back - 1;
            let shift = WORD_BITS - 1 - last % WORD_BITS;
            let word = self.words[last / WORD_BITS] << shift;
            if word == 0 {
                self.back = last / WORD_BITS * WORD_BITS;
                continue;
            }
            let offset = last - word.leading_zeros() as usize;
            if offset < self.front {
                self.back = self.front;
                return None;
            }
            self.back = offset;
            return Some(offset);
        }
        None
    }
}
