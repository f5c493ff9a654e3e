//! Packed atomic bit arrays
//!
//! Every node carries two bitmaps over its slot array: `none` (slot empty)
//! and `child` (slot holds a child pointer). Bits are mutated only under the
//! node's write lock, but concurrent optimistic readers load them at any
//! time, so the words are atomic.

use std::sync::atomic::{AtomicU8, Ordering};

const WORD_BITS: usize = 8;

/// Fixed-length packed bit array with atomic words.
pub struct Bitmap {
    words: Box<[AtomicU8]>,
}

impl Bitmap {
    /// Create a bitmap of `len` bits, all zero or all one.
    pub fn new(len: usize, ones: bool) -> Self {
        let num_words = (len + WORD_BITS - 1) / WORD_BITS;
        let init = if ones { 0xff } else { 0 };
        let words = (0..num_words)
            .map(|_| AtomicU8::new(init))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { words }
    }

    /// Read bit `pos`.
    #[inline]
    pub fn get(&self, pos: usize) -> bool {
        let word = self.words[pos / WORD_BITS].load(Ordering::Relaxed);
        (word >> (pos % WORD_BITS)) & 1 != 0
    }

    /// Set bit `pos` to one.
    #[inline]
    pub fn set(&self, pos: usize) {
        self.words[pos / WORD_BITS].fetch_or(1 << (pos % WORD_BITS), Ordering::Relaxed);
    }

    /// Clear bit `pos` to zero.
    #[inline]
    pub fn clear(&self, pos: usize) {
        self.words[pos / WORD_BITS].fetch_and(!(1 << (pos % WORD_BITS)), Ordering::Relaxed);
    }

    /// Set every bit to one.
    pub fn set_all(&self) {
        for word in self.words.iter() {
            word.store(0xff, Ordering::Relaxed);
        }
    }

    /// Clear every bit to zero.
    pub fn clear_all(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }
}
