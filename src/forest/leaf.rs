//! Leaf payload stores, appended tree by tree.
//!
//! Leaves are addressed by `leaf_pos(tree, leaf_idx) = origin[tree] +
//! leaf_idx`, mirroring the node arrays. Regression leaves carry the mean
//! score plus the bagged samples' `(response rank, sample count)` pairs for
//! quantile prediction; classification leaves carry a jittered category
//! score and a normalized per-category weight row.

use serde::{Deserialize, Serialize};

/// Regression leaf store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeafReg {
    /// Mean response per leaf.
    score: Vec<f64>,
    /// Per-leaf extent into `rank` / `s_count`.
    sample_off: Vec<u32>,
    sample_len: Vec<u32>,
    /// Response ranks of the leaf's bagged samples, flat.
    rank: Vec<u32>,
    /// Sample multiplicities aligned with `rank`.
    s_count: Vec<u32>,
    /// First leaf index of each tree.
    origin: Vec<u32>,
}

impl LeafReg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splice one tree's leaves: per leaf, the mean score and its samples'
    /// `(rank, s_count)` pairs.
    pub fn append_tree(&mut self, leaves: Vec<(f64, Vec<(u32, u32)>)>) {
        self.origin.push(self.score.len() as u32);
        for (score, samples) in leaves {
            self.score.push(score);
            self.sample_off.push(self.rank.len() as u32);
            self.sample_len.push(samples.len() as u32);
            for (rank, s_count) in samples {
                self.rank.push(rank);
                self.s_count.push(s_count);
            }
        }
    }

    #[inline]
    fn leaf_pos(&self, tree: usize, leaf_idx: u32) -> usize {
        self.origin[tree] as usize + leaf_idx as usize
    }

    /// Leaf score for `(tree, leaf_idx)`.
    #[inline]
    pub fn leaf_val(&self, tree: usize, leaf_idx: u32) -> f64 {
        self.score[self.leaf_pos(tree, leaf_idx)]
    }

    /// The `(rank, s_count)` pairs bagged into a leaf.
    pub fn leaf_samples(&self, tree: usize, leaf_idx: u32) -> impl Iterator<Item = (u32, u32)> + '_ {
        let pos = self.leaf_pos(tree, leaf_idx);
        let off = self.sample_off[pos] as usize;
        let len = self.sample_len[pos] as usize;
        self.rank[off..off + len]
            .iter()
            .copied()
            .zip(self.s_count[off..off + len].iter().copied())
    }

    /// The persisted payload arrays: `(rank, s_count)`.
    pub fn as_arrays(&self) -> (&[u32], &[u32]) {
        (&self.rank, &self.s_count)
    }
}

/// Classification leaf store.
///
/// The score of a leaf is `ctg + jitter` with `jitter` in `[0, 0.5)`: the
/// category index plus a fractional tie-breaker. Voting truncates the score
/// to recover the category and adds `1 + (score - ctg)` to the vote tally,
/// so census counts de-jitter back to integers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeafCtg {
    /// Jittered category score per leaf.
    score: Vec<f64>,
    /// `ctg_width` doubles per leaf, normalized to sum one.
    weight: Vec<f64>,
    ctg_width: usize,
    origin: Vec<u32>,
}

impl LeafCtg {
    pub fn new(ctg_width: usize) -> Self {
        Self {
            ctg_width,
            ..Self::default()
        }
    }

    #[inline]
    pub fn ctg_width(&self) -> usize {
        self.ctg_width
    }

    /// Splice one tree's leaves: per leaf, the jittered score and the raw
    /// per-category weights (normalized here).
    pub fn append_tree(&mut self, leaves: Vec<(f64, Vec<f64>)>) {
        self.origin.push(self.score.len() as u32);
        for (score, weights) in leaves {
            debug_assert_eq!(weights.len(), self.ctg_width);
            let total: f64 = weights.iter().sum();
            let recip = if total > 0.0 { 1.0 / total } else { 0.0 };
            self.score.push(score);
            self.weight.extend(weights.iter().map(|w| w * recip));
        }
    }

    #[inline]
    fn leaf_pos(&self, tree: usize, leaf_idx: u32) -> usize {
        self.origin[tree] as usize + leaf_idx as usize
    }

    /// Jittered score for `(tree, leaf_idx)`.
    #[inline]
    pub fn leaf_val(&self, tree: usize, leaf_idx: u32) -> f64 {
        self.score[self.leaf_pos(tree, leaf_idx)]
    }

    /// Normalized per-category weight row of a leaf.
    #[inline]
    pub fn leaf_weight(&self, tree: usize, leaf_idx: u32) -> &[f64] {
        let pos = self.leaf_pos(tree, leaf_idx);
        &self.weight[pos * self.ctg_width..(pos + 1) * self.ctg_width]
    }

    /// The flat weight array, `ctg_width` doubles per leaf.
    pub fn as_array(&self) -> &[f64] {
        &self.weight
    }
}
