//! Packed bit matrix used as the per-tree in-bag mask.

use serde::{Deserialize, Serialize};

const WORD_BITS: usize = 64;

/// Row-major packed `rows x cols` bit matrix.
///
/// Bit `(row, col)` set means row `row` was in-bag for tree `col`. No
/// concurrency guard: writers serialize per `(row, col)`, one writer per
/// tree in practice. Read-only during prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitMatrix {
    words: Vec<u64>,
    n_row: usize,
    n_col: usize,
    /// Words per row.
    stride: usize,
}

impl BitMatrix {
    pub fn new(n_row: usize, n_col: usize) -> Self {
        let stride = (n_col + WORD_BITS - 1) / WORD_BITS;
        Self {
            words: vec![0; n_row * stride],
            n_row,
            n_col,
            stride,
        }
    }

    /// Rewrap raw words exported by a previous session.
    pub fn from_raw(words: Vec<u64>, n_row: usize, n_col: usize) -> Self {
        let stride = (n_col + WORD_BITS - 1) / WORD_BITS;
        debug_assert_eq!(words.len(), n_row * stride);
        Self {
            words,
            n_row,
            n_col,
            stride,
        }
    }

    /// The packed words, row-major.
    pub fn into_raw(self) -> Vec<u64> {
        self.words
    }

    #[inline]
    pub fn n_row(&self) -> usize {
        self.n_row
    }

    #[inline]
    pub fn n_col(&self) -> usize {
        self.n_col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> bool {
        let word = self.words[row * self.stride + col / WORD_BITS];
        word & (1u64 << (col % WORD_BITS)) != 0
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize) {
        self.words[row * self.stride + col / WORD_BITS] |= 1u64 << (col % WORD_BITS);
    }
}
