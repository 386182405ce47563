//! Regression scoring.

use rayon::prelude::*;

use crate::data::{BitMatrix, PredictBlock};
use crate::error::{CanopyError, Result};
use crate::forest::{LeafReg, NO_LEAF};
use crate::training::TrainedForest;

use super::{row_blocks, ROW_BLOCK};

/// Score every row as the mean leaf value over contributing trees.
///
/// A row suppressed by every tree (possible only under bag masking) scores
/// `NaN`.
pub fn predict_regression(
    block: &PredictBlock,
    trained: &TrainedForest,
    bag: Option<&BitMatrix>,
) -> Result<Vec<f64>> {
    let leaf = match &trained.leaf {
        crate::training::LeafPayload::Reg { leaf, .. } => leaf,
        _ => {
            return Err(CanopyError::Internal(
                "classification payload on regression predictor".to_string(),
            ))
        }
    };

    let n_row = block.n_row();
    let n_tree = trained.forest.n_tree();
    let mut y_pred = vec![0.0f64; n_row];
    let mut leaves = vec![0u32; ROW_BLOCK.min(n_row) * n_tree];

    for (start, end) in row_blocks(n_row) {
        let span = (end - start) * n_tree;
        trained
            .forest
            .predict_across(block, &mut leaves[..span], start, end, bag);
        score(leaf, &leaves[..span], n_tree, &mut y_pred[start..end]);
    }

    Ok(y_pred)
}

fn score(leaf: &LeafReg, leaves: &[u32], n_tree: usize, y_pred: &mut [f64]) {
    y_pred
        .par_iter_mut()
        .enumerate()
        .for_each(|(block_row, out)| {
            let leaf_row = &leaves[block_row * n_tree..(block_row + 1) * n_tree];
            let mut score = 0.0f64;
            let mut trees_seen = 0usize;
            for (tree, &leaf_idx) in leaf_row.iter().enumerate() {
                if leaf_idx != NO_LEAF {
                    trees_seen += 1;
                    score += leaf.leaf_val(tree, leaf_idx);
                }
            }
            *out = score / trees_seen as f64;
        });
}
