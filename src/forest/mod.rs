//! The trained forest: ensemble-wide node arrays and traversal.
//!
//! Trees are committed in blocks: each tree's local node array and factor
//! bitset are spliced onto the global arrays, with `origin[t]` and
//! `fac_off[t]` recording where tree `t` begins. The layout round-trips
//! through serde unchanged, so a forest trained in one session predicts in
//! another.

mod leaf;

pub use leaf::{LeafCtg, LeafReg};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::{BitMatrix, PredictBlock};

/// Sentinel leaf index recording a bagged (suppressed) tree for a row.
pub const NO_LEAF: u32 = u32::MAX;

/// Split payload of a decision node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SplitPayload {
    /// Terminal: index into the tree's leaf store.
    Leaf { leaf_idx: u32 },
    /// Numeric split: left iff `value <= split_val`.
    Num { split_val: f64 },
    /// Factor split: left iff the code's bit is set in the tree's bitset
    /// region at `bit_off`. Codes at or beyond `card` (proxy levels) go
    /// right.
    Fac { bit_off: u32, card: u32 },
}

/// One decision node. `lh_del` is the offset from this node to its left
/// child within the tree; the right child follows the left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestNode {
    pub pred_idx: u32,
    pub lh_del: u32,
    pub split: SplitPayload,
}

/// Append-only ensemble arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Forest {
    nodes: Vec<ForestNode>,
    /// First node index of each tree.
    origin: Vec<u32>,
    /// First factor-bitset word of each tree.
    fac_off: Vec<u32>,
    /// Concatenated factor-split bitsets, 32-bit words.
    fac_split: Vec<u32>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splice one tree's local arrays onto the ensemble.
    pub fn append_tree(&mut self, nodes: Vec<ForestNode>, fac_split: Vec<u32>) {
        self.origin.push(self.nodes.len() as u32);
        self.fac_off.push(self.fac_split.len() as u32);
        self.nodes.extend(nodes);
        self.fac_split.extend(fac_split);
    }

    #[inline]
    pub fn n_tree(&self) -> usize {
        self.origin.len()
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Rebuild from persisted arrays.
    pub fn from_arrays(
        nodes: Vec<ForestNode>,
        origin: Vec<u32>,
        fac_off: Vec<u32>,
        fac_split: Vec<u32>,
    ) -> Self {
        Self {
            nodes,
            origin,
            fac_off,
            fac_split,
        }
    }

    /// The persisted array layout: `(nodes, origin, fac_off, fac_split)`.
    pub fn as_arrays(&self) -> (&[ForestNode], &[u32], &[u32], &[u32]) {
        (&self.nodes, &self.origin, &self.fac_off, &self.fac_split)
    }

    /// Walk one row down one tree to its leaf index.
    fn leaf_idx(&self, block: &PredictBlock, tree: usize, row: usize) -> u32 {
        let base = self.origin[tree] as usize;
        let fac_base = self.fac_off[tree] as usize;
        let mut idx = base;
        loop {
            let node = &self.nodes[idx];
            match node.split {
                SplitPayload::Leaf { leaf_idx } => return leaf_idx,
                SplitPayload::Num { split_val } => {
                    let val = block.num_val(node.pred_idx as usize, row);
                    idx += node.lh_del as usize + usize::from(val > split_val);
                }
                SplitPayload::Fac { bit_off, card } => {
                    let code = block.fac_val(node.pred_idx as usize, row);
                    let goes_left = code >= 0 && (code as u32) < card && {
                        let bit = bit_off + code as u32;
                        let word = self.fac_split[fac_base + (bit / 32) as usize];
                        word & (1u32 << (bit % 32)) != 0
                    };
                    idx += node.lh_del as usize + usize::from(!goes_left);
                }
            }
        }
    }

    /// Fill per-(row, tree) leaf predictions for a block of rows.
    ///
    /// `leaves` is `(row_end - row_start) * n_tree`, row-major. A tree that
    /// bagged the row records [`NO_LEAF`], suppressing its contribution.
    pub fn predict_across(
        &self,
        block: &PredictBlock,
        leaves: &mut [u32],
        row_start: usize,
        row_end: usize,
        bag: Option<&BitMatrix>,
    ) {
        let n_tree = self.n_tree();
        debug_assert_eq!(leaves.len(), (row_end - row_start) * n_tree);
        leaves
            .par_chunks_mut(n_tree)
            .enumerate()
            .for_each(|(block_row, leaf_row)| {
                let row = row_start + block_row;
                for (tree, slot) in leaf_row.iter_mut().enumerate() {
                    let bagged = bag.map_or(false, |b| b.get(row, tree));
                    *slot = if bagged {
                        NO_LEAF
                    } else {
                        self.leaf_idx(block, tree, row)
                    };
                }
            });
    }
}
