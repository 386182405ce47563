//! The pre-tree: a tree under construction.
//!
//! Nodes are appended in creation order as the frontier splits level by
//! level; every node starts as a leaf and may later be converted to a
//! split with its two children appended together. On completion the
//! pre-tree flattens into the forest's node layout, numbering leaves in
//! node order and packing factor-split bitsets.
//!
//! The node arena carries a height budget estimated ahead of growth.
//! Overshooting it is recoverable: the grower surfaces
//! [`CanopyError::BudgetExceeded`] and the trainer retries the tree with
//! the estimate scaled up by the slop factor.

use crate::error::{CanopyError, Result};
use crate::forest::{ForestNode, SplitPayload};

/// Growth allowance applied to height estimates.
pub const SLOP_FACTOR: f64 = 1.2;

#[derive(Debug, Clone)]
enum PtKind {
    Leaf,
    NumSplit { pred_idx: u32, split_val: f64 },
    FacSplit { pred_idx: u32, card: u32, lh_codes: Vec<u32> },
}

#[derive(Debug, Clone)]
struct PtNode {
    kind: PtKind,
    /// Left child id; right child is `lh_id + 1`. Valid for splits only.
    lh_id: u32,
}

/// Tree under construction, with a node-count budget.
#[derive(Debug)]
pub struct PreTree {
    nodes: Vec<PtNode>,
    height_cap: usize,
}

impl PreTree {
    /// Initial node-count estimate for a bag of `n_samp` samples split no
    /// finer than `min_node`.
    pub fn height_estimate(n_samp: usize, min_node: usize) -> usize {
        let leaves = (n_samp + min_node.max(1) - 1) / min_node.max(1);
        let est = (SLOP_FACTOR * (2 * leaves.max(1)) as f64).ceil() as usize;
        est.max(8)
    }

    /// Start a tree: a single root leaf under the given budget.
    pub fn new(height_cap: usize) -> Self {
        let mut nodes = Vec::with_capacity(height_cap.min(1 << 20));
        nodes.push(PtNode {
            kind: PtKind::Leaf,
            lh_id: 0,
        });
        Self { nodes, height_cap }
    }

    fn grow_children(&mut self, pt_id: u32) -> Result<(u32, u32)> {
        if self.nodes.len() + 2 > self.height_cap {
            return Err(CanopyError::BudgetExceeded {
                needed: self.nodes.len() + 2,
                budget: self.height_cap,
            });
        }
        let lh_id = self.nodes.len() as u32;
        self.nodes.push(PtNode {
            kind: PtKind::Leaf,
            lh_id: 0,
        });
        self.nodes.push(PtNode {
            kind: PtKind::Leaf,
            lh_id: 0,
        });
        self.nodes[pt_id as usize].lh_id = lh_id;
        Ok((lh_id, lh_id + 1))
    }

    /// Convert a leaf into a numeric split; returns the child ids.
    pub fn split_num(&mut self, pt_id: u32, pred_idx: u32, split_val: f64) -> Result<(u32, u32)> {
        let children = self.grow_children(pt_id)?;
        self.nodes[pt_id as usize].kind = PtKind::NumSplit {
            pred_idx,
            split_val,
        };
        Ok(children)
    }

    /// Convert a leaf into a factor split sending `lh_codes` left.
    pub fn split_fac(
        &mut self,
        pt_id: u32,
        pred_idx: u32,
        card: u32,
        lh_codes: Vec<u32>,
    ) -> Result<(u32, u32)> {
        let children = self.grow_children(pt_id)?;
        self.nodes[pt_id as usize].kind = PtKind::FacSplit {
            pred_idx,
            card,
            lh_codes,
        };
        Ok(children)
    }

    /// Flatten into forest nodes plus the tree-local factor bitset.
    ///
    /// Returns `(nodes, fac_split_words, leaf_of_node)` where
    /// `leaf_of_node[pt_id]` holds the leaf index for leaf nodes and
    /// `u32::MAX` for splits. Leaves are numbered in node order.
    pub fn flatten(&self) -> (Vec<ForestNode>, Vec<u32>, Vec<u32>) {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut fac_split: Vec<u32> = Vec::new();
        let mut leaf_of_node = vec![u32::MAX; self.nodes.len()];
        let mut bit_top = 0u32;
        let mut leaf_count = 0u32;

        for (id, pt) in self.nodes.iter().enumerate() {
            match &pt.kind {
                PtKind::Leaf => {
                    leaf_of_node[id] = leaf_count;
                    nodes.push(ForestNode {
                        pred_idx: 0,
                        lh_del: 0,
                        split: SplitPayload::Leaf {
                            leaf_idx: leaf_count,
                        },
                    });
                    leaf_count += 1;
                }
                PtKind::NumSplit {
                    pred_idx,
                    split_val,
                } => {
                    nodes.push(ForestNode {
                        pred_idx: *pred_idx,
                        lh_del: pt.lh_id - id as u32,
                        split: SplitPayload::Num {
                            split_val: *split_val,
                        },
                    });
                }
                PtKind::FacSplit {
                    pred_idx,
                    card,
                    lh_codes,
                } => {
                    let bit_off = bit_top;
                    bit_top += card;
                    fac_split.resize(((bit_top + 31) / 32) as usize, 0);
                    for &code in lh_codes {
                        let bit = bit_off + code;
                        fac_split[(bit / 32) as usize] |= 1u32 << (bit % 32);
                    }
                    nodes.push(ForestNode {
                        pred_idx: *pred_idx,
                        lh_del: pt.lh_id - id as u32,
                        split: SplitPayload::Fac {
                            bit_off,
                            card: *card,
                        },
                    });
                }
            }
        }

        (nodes, fac_split, leaf_of_node)
    }
}
