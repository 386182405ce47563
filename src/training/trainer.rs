//! Forest training entry points.
//!
//! Trees grow in blocks of `train_block`: the trees of a block grow in
//! parallel against the shared read-only block and row ranks, then splice
//! into the ensemble arrays in tree order at the block boundary. A worker
//! that overruns its pre-tree budget retries with the estimate scaled by
//! the slop factor; any other worker error halts the enclosing block and
//! surfaces at the boundary.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::{BitMatrix, RowRank, TrainBlock};
use crate::error::{CanopyError, Result};
use crate::forest::{Forest, LeafCtg, LeafReg};
use crate::training::frontier::{GrownTree, Response, TreeGrower};
use crate::training::pretree::{PreTree, SLOP_FACTOR};
use crate::training::{TrainParams, TrainingLogger};
use crate::utils::argsort;

/// Leaf payload of a trained forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LeafPayload {
    Reg {
        leaf: LeafReg,
        /// Response values in rank order, for quantile prediction.
        y_ranked: Vec<f64>,
    },
    Ctg {
        leaf: LeafCtg,
    },
}

/// A trained ensemble: node arrays, leaf payload, per-predictor
/// information, and the in-bag mask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedForest {
    pub forest: Forest,
    pub leaf: LeafPayload,
    /// Information gain accrued per predictor, averaged over trees.
    pub pred_info: Vec<f64>,
    pub in_bag: BitMatrix,
}

impl TrainedForest {
    /// Regression leaf store; panics on a classification forest.
    pub fn leaf_reg(&self) -> &LeafReg {
        match &self.leaf {
            LeafPayload::Reg { leaf, .. } => leaf,
            LeafPayload::Ctg { .. } => panic!("regression payload on classification forest"),
        }
    }

    /// Classification leaf store; panics on a regression forest.
    pub fn leaf_ctg(&self) -> &LeafCtg {
        match &self.leaf {
            LeafPayload::Ctg { leaf } => leaf,
            LeafPayload::Reg { .. } => panic!("classification payload on regression forest"),
        }
    }
}

/// Train a regression forest.
pub fn train_regression(
    block: &TrainBlock,
    row_rank: &RowRank,
    y: &[f64],
    params: &TrainParams,
) -> Result<TrainedForest> {
    params.validate(block.n_row(), block.n_pred())?;
    if y.len() != block.n_row() {
        return Err(CanopyError::ArityError(format!(
            "{} responses for {} rows",
            y.len(),
            block.n_row()
        )));
    }

    // Response ranks for the quantile payload: stable order, sorted values.
    let order = argsort(y);
    let y_ranked: Vec<f64> = order.iter().map(|&r| y[r as usize]).collect();
    let mut y_rank = vec![0u32; y.len()];
    for (rank, &row) in order.iter().enumerate() {
        y_rank[row as usize] = rank as u32;
    }

    let grower = TreeGrower {
        block,
        row_rank,
        params,
        response: Response::Reg { y },
    };

    let mut leaf = LeafReg::new();
    let trained = train_blocks(block, params, &grower, |_, grown| {
        leaf.append_tree(collect_leaves_reg(grown, &y_rank));
    })?;

    Ok(TrainedForest {
        forest: trained.forest,
        leaf: LeafPayload::Reg { leaf, y_ranked },
        pred_info: trained.pred_info,
        in_bag: trained.in_bag,
    })
}

/// Train a classification forest.
///
/// `y_proxy` is the per-row response encoding accumulated by the splitter;
/// uniform unit weights when empty.
pub fn train_classification(
    block: &TrainBlock,
    row_rank: &RowRank,
    y_ctg: &[u32],
    y_proxy: &[f64],
    params: &TrainParams,
) -> Result<TrainedForest> {
    params.validate(block.n_row(), block.n_pred())?;
    if y_ctg.len() != block.n_row() {
        return Err(CanopyError::ArityError(format!(
            "{} responses for {} rows",
            y_ctg.len(),
            block.n_row()
        )));
    }
    let ctg_width = y_ctg.iter().copied().max().unwrap_or(0) as usize + 1;
    if ctg_width < 2 {
        return Err(CanopyError::ArityError(
            "classification needs at least two categories".to_string(),
        ));
    }
    if !y_proxy.is_empty() && y_proxy.len() != y_ctg.len() {
        return Err(CanopyError::ArityError(format!(
            "{} proxy values for {} rows",
            y_proxy.len(),
            y_ctg.len()
        )));
    }
    let unit_proxy;
    let proxy: &[f64] = if y_proxy.is_empty() {
        unit_proxy = vec![1.0; y_ctg.len()];
        &unit_proxy
    } else {
        y_proxy
    };

    let grower = TreeGrower {
        block,
        row_rank,
        params,
        response: Response::Ctg {
            y_ctg,
            proxy,
            ctg_width,
        },
    };

    let mut leaf = LeafCtg::new(ctg_width);
    let trained = train_blocks(block, params, &grower, |tree_idx, grown| {
        let mut jitter_rng = Xoshiro256PlusPlus::seed_from_u64(
            params
                .seed
                .wrapping_add((tree_idx as u64).wrapping_mul(0xA24B_AED4_963E_E407)),
        );
        // Jitter stays below 1/(2 n_tree) so accumulated votes truncate
        // back to exact counts.
        let jitter_scale = 0.5 / params.n_tree as f64;
        leaf.append_tree(collect_leaves_ctg(grown, ctg_width, jitter_scale, &mut jitter_rng));
    })?;

    Ok(TrainedForest {
        forest: trained.forest,
        leaf: LeafPayload::Ctg { leaf },
        pred_info: trained.pred_info,
        in_bag: trained.in_bag,
    })
}

// =============================================================================
// Block loop
// =============================================================================

struct BlockOutput {
    forest: Forest,
    pred_info: Vec<f64>,
    in_bag: BitMatrix,
}

fn train_blocks(
    block: &TrainBlock,
    params: &TrainParams,
    grower: &TreeGrower<'_>,
    mut commit_leaves: impl FnMut(usize, &GrownTree),
) -> Result<BlockOutput> {
    let logger = TrainingLogger::new(params.verbosity);
    let n_tree = params.n_tree;
    let n_samp = params.samp_count(block.n_row());

    let mut forest = Forest::new();
    let mut pred_info = vec![0.0f64; block.n_pred()];
    let mut in_bag = BitMatrix::new(block.n_row(), n_tree);

    let train_block = params.train_block.max(1);
    let height_est = PreTree::height_estimate(n_samp, params.min_node);

    for t_start in (0..n_tree).step_by(train_block) {
        let t_count = train_block.min(n_tree - t_start);
        let grown: Vec<Result<GrownTree>> = (t_start..t_start + t_count)
            .into_par_iter()
            .map(|tree_idx| grow_with_retry(grower, tree_idx, height_est))
            .collect();

        // Commit in tree order; the first failure halts the block.
        for (i, result) in grown.into_iter().enumerate() {
            let tree_idx = t_start + i;
            let tree = result?;
            for sample in &tree.bag.samples {
                in_bag.set(sample.row as usize, tree_idx);
            }
            for (p, info) in tree.pred_info.iter().enumerate() {
                pred_info[p] += info;
            }
            commit_leaves(tree_idx, &tree);
            forest.append_tree(tree.nodes, tree.fac_split);
            logger.detail(|| format!("tree {} committed ({} nodes)", tree_idx, forest.node_count()));
        }
        logger.summary(|| format!("block [{}, {}) committed", t_start, t_start + t_count));
    }

    for info in &mut pred_info {
        *info /= n_tree as f64;
    }

    Ok(BlockOutput {
        forest,
        pred_info,
        in_bag,
    })
}

/// Regrow with a slop-scaled budget until the pre-tree fits.
fn grow_with_retry(
    grower: &TreeGrower<'_>,
    tree_idx: usize,
    height_est: usize,
) -> Result<GrownTree> {
    let mut cap = height_est;
    loop {
        match grower.grow(tree_idx, cap) {
            Err(CanopyError::BudgetExceeded { needed, .. }) => {
                cap = needed.max((cap as f64 * SLOP_FACTOR).ceil() as usize);
            }
            other => return other,
        }
    }
}

// =============================================================================
// Leaf collection
// =============================================================================

fn leaf_count(grown: &GrownTree) -> usize {
    grown
        .leaf_of_node
        .iter()
        .filter(|&&leaf| leaf != u32::MAX)
        .count()
}

/// Per-leaf mean score and `(response rank, s_count)` pairs.
fn collect_leaves_reg(grown: &GrownTree, y_rank: &[u32]) -> Vec<(f64, Vec<(u32, u32)>)> {
    let n_leaves = leaf_count(grown);
    let mut sums = vec![(0u32, 0.0f64); n_leaves];
    let mut samples: Vec<Vec<(u32, u32)>> = vec![Vec::new(); n_leaves];

    for (sample_idx, sample) in grown.bag.samples.iter().enumerate() {
        let leaf = grown.leaf_of_node[grown.sample_pt[sample_idx] as usize] as usize;
        sums[leaf].0 += sample.s_count;
        sums[leaf].1 += sample.sum;
        samples[leaf].push((y_rank[sample.row as usize], sample.s_count));
    }

    sums.into_iter()
        .zip(samples)
        .map(|((s_count, sum), pairs)| (sum / s_count as f64, pairs))
        .collect()
}

/// Per-leaf jittered category score and raw category weights.
fn collect_leaves_ctg(
    grown: &GrownTree,
    ctg_width: usize,
    jitter_scale: f64,
    rng: &mut Xoshiro256PlusPlus,
) -> Vec<(f64, Vec<f64>)> {
    let n_leaves = leaf_count(grown);
    let mut weights = vec![vec![0.0f64; ctg_width]; n_leaves];

    for (sample_idx, sample) in grown.bag.samples.iter().enumerate() {
        let leaf = grown.leaf_of_node[grown.sample_pt[sample_idx] as usize] as usize;
        weights[leaf][sample.ctg as usize] += sample.s_count as f64;
    }

    weights
        .into_iter()
        .map(|w| {
            let mut arg_max = 0usize;
            for (ctg, &weight) in w.iter().enumerate() {
                if weight > w[arg_max] {
                    arg_max = ctg;
                }
            }
            // Truncation recovers the category; the fraction breaks ties.
            let score = arg_max as f64 + jitter_scale * rng.gen::<f64>();
            (score, w)
        })
        .collect()
}
