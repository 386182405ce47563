//! Quantile prediction for regression forests.
//!
//! Each regression leaf carries the `(response rank, s_count)` pairs of
//! its bagged samples. Per row, the contributing leaves' ranks are
//! bucketed into `q_bin` equal-width bins against the rank-ordered
//! response, and each requested quantile reads the ranked value at its
//! cumulative-count threshold.

use ndarray::Array2;
use rayon::prelude::*;

use crate::data::{BitMatrix, PredictBlock};
use crate::error::{CanopyError, Result};
use crate::forest::{LeafReg, NO_LEAF};
use crate::training::TrainedForest;

use super::{row_blocks, ROW_BLOCK};

/// Score rows and compute the requested quantiles.
///
/// Returns `(y_pred, q_pred)` with `q_pred` shaped
/// `n_row x quant_vec.len()`.
pub fn predict_quantiles(
    block: &PredictBlock,
    trained: &TrainedForest,
    quant_vec: &[f64],
    q_bin: usize,
    bag: Option<&BitMatrix>,
) -> Result<(Vec<f64>, Array2<f64>)> {
    let (leaf, y_ranked) = match &trained.leaf {
        crate::training::LeafPayload::Reg { leaf, y_ranked } => (leaf, y_ranked.as_slice()),
        _ => {
            return Err(CanopyError::Internal(
                "classification payload on quantile predictor".to_string(),
            ))
        }
    };
    if quant_vec.is_empty() || q_bin == 0 {
        return Err(CanopyError::ArityError(
            "empty quantile request".to_string(),
        ));
    }

    let n_row = block.n_row();
    let n_tree = trained.forest.n_tree();
    let quant = Quant {
        leaf,
        y_ranked,
        quant_vec,
        bin_size: ((y_ranked.len() + q_bin - 1) / q_bin).max(1),
        n_bins: q_bin,
    };

    let mut y_pred = vec![0.0f64; n_row];
    let mut q_pred = Array2::zeros((n_row, quant_vec.len()));
    let mut leaves = vec![0u32; ROW_BLOCK.min(n_row) * n_tree];

    for (start, end) in row_blocks(n_row) {
        let span = (end - start) * n_tree;
        trained
            .forest
            .predict_across(block, &mut leaves[..span], start, end, bag);

        for block_row in 0..end - start {
            let leaf_row = &leaves[block_row * n_tree..(block_row + 1) * n_tree];
            let row = start + block_row;
            let mut score = 0.0f64;
            let mut trees_seen = 0usize;
            for (tree, &leaf_idx) in leaf_row.iter().enumerate() {
                if leaf_idx != NO_LEAF {
                    trees_seen += 1;
                    score += leaf.leaf_val(tree, leaf_idx);
                }
            }
            y_pred[row] = score / trees_seen as f64;
        }

        let rows: Vec<usize> = (start..end).collect();
        let q_rows: Vec<Vec<f64>> = rows
            .par_iter()
            .map(|&row| {
                let block_row = row - start;
                quant.predict_row(&leaves[block_row * n_tree..(block_row + 1) * n_tree])
            })
            .collect();
        for (row, q_row) in rows.into_iter().zip(q_rows) {
            for (j, q) in q_row.into_iter().enumerate() {
                q_pred[(row, j)] = q;
            }
        }
    }

    Ok((y_pred, q_pred))
}

struct Quant<'a> {
    leaf: &'a LeafReg,
    y_ranked: &'a [f64],
    quant_vec: &'a [f64],
    bin_size: usize,
    n_bins: usize,
}

impl Quant<'_> {
    fn predict_row(&self, leaf_row: &[u32]) -> Vec<f64> {
        let mut counts = vec![0u64; self.n_bins];
        let mut total = 0u64;
        for (tree, &leaf_idx) in leaf_row.iter().enumerate() {
            if leaf_idx == NO_LEAF {
                continue;
            }
            for (rank, s_count) in self.leaf.leaf_samples(tree, leaf_idx) {
                let bin = (rank as usize / self.bin_size).min(self.n_bins - 1);
                counts[bin] += s_count as u64;
                total += s_count as u64;
            }
        }

        self.quant_vec
            .iter()
            .map(|&q| {
                if total == 0 {
                    return f64::NAN;
                }
                let target = q * total as f64;
                let mut cum = 0u64;
                let mut bin = self.n_bins - 1;
                for (b, &count) in counts.iter().enumerate() {
                    cum += count;
                    if cum as f64 >= target {
                        bin = b;
                        break;
                    }
                }
                let rank = (bin * self.bin_size).min(self.y_ranked.len() - 1);
                self.y_ranked[rank]
            })
            .collect()
    }
}
