//! Classification scoring: votes, census, probabilities, validation.

use ndarray::Array2;
use rayon::prelude::*;

use crate::data::{BitMatrix, PredictBlock};
use crate::error::{CanopyError, Result};
use crate::forest::{LeafCtg, NO_LEAF};
use crate::training::TrainedForest;

use super::{row_blocks, ROW_BLOCK};

/// Predicted category for a row every tree bagged.
pub const NO_PREDICTION: u32 = u32::MAX;

/// Outputs of classification prediction.
#[derive(Debug, Clone)]
pub struct ClassificationPrediction {
    /// Argmax category per row; [`NO_PREDICTION`] when no tree
    /// contributed.
    pub y_pred: Vec<u32>,
    /// De-jittered vote counts, `n_row x ctg_width`.
    pub census: Array2<u32>,
    /// Per-row category probabilities normalized to sum one.
    pub prob: Array2<f64>,
    /// Confusion matrix `ctg_width x ctg_width`, when a test vector was
    /// supplied: `conf[true, predicted]`.
    pub conf: Option<Array2<u32>>,
    /// Per-category misclassification rate, when a test vector was
    /// supplied.
    pub error: Option<Vec<f64>>,
}

/// Walk the forest and tabulate votes and probabilities.
///
/// Each contributing tree's jittered leaf score `val` votes
/// `1 + (val - floor(val))` for category `floor(val)`; truncating the
/// accumulated score recovers the integer census. Supplying `y_test`
/// additionally fills the confusion matrix and per-category error.
pub fn predict_classification(
    block: &PredictBlock,
    trained: &TrainedForest,
    bag: Option<&BitMatrix>,
    y_test: Option<&[u32]>,
) -> Result<ClassificationPrediction> {
    let leaf = match &trained.leaf {
        crate::training::LeafPayload::Ctg { leaf } => leaf,
        _ => {
            return Err(CanopyError::Internal(
                "regression payload on classification predictor".to_string(),
            ))
        }
    };
    let n_row = block.n_row();
    let ctg_width = leaf.ctg_width();
    if let Some(y_test) = y_test {
        if y_test.len() != n_row {
            return Err(CanopyError::ArityError(format!(
                "{} test labels for {} rows",
                y_test.len(),
                n_row
            )));
        }
        if y_test.iter().any(|&c| c as usize >= ctg_width) {
            return Err(CanopyError::ArityError(
                "test label beyond trained categories".to_string(),
            ));
        }
    }

    let n_tree = trained.forest.n_tree();
    let mut votes = Array2::<f64>::zeros((n_row, ctg_width));
    let mut prob = Array2::<f64>::zeros((n_row, ctg_width));
    let mut leaves = vec![0u32; ROW_BLOCK.min(n_row) * n_tree];

    for (start, end) in row_blocks(n_row) {
        let span = (end - start) * n_tree;
        trained
            .forest
            .predict_across(block, &mut leaves[..span], start, end, bag);
        score(leaf, &leaves[..span], n_tree, start, &mut votes);
        prob_rows(leaf, &leaves[..span], n_tree, start, &mut prob);
    }

    let (y_pred, census) = vote(&votes);

    let (conf, error) = match y_test {
        Some(y_test) => {
            let (conf, error) = validate(y_test, &y_pred, ctg_width);
            (Some(conf), Some(error))
        }
        None => (None, None),
    };

    Ok(ClassificationPrediction {
        y_pred,
        census,
        prob,
        conf,
        error,
    })
}

/// Accumulate jittered votes for a block of rows.
fn score(leaf: &LeafCtg, leaves: &[u32], n_tree: usize, row_start: usize, votes: &mut Array2<f64>) {
    let ctg_width = leaf.ctg_width();
    let n_block_rows = leaves.len() / n_tree;
    let votes = votes.as_slice_mut().expect("votes in standard layout");
    // Row-parallel accumulation writes disjoint vote rows.
    votes[row_start * ctg_width..(row_start + n_block_rows) * ctg_width]
        .par_chunks_mut(ctg_width)
        .enumerate()
        .for_each(|(block_row, vote_row)| {
            let leaf_row = &leaves[block_row * n_tree..(block_row + 1) * n_tree];
            for (tree, &leaf_idx) in leaf_row.iter().enumerate() {
                if leaf_idx != NO_LEAF {
                    let val = leaf.leaf_val(tree, leaf_idx);
                    let ctg = val as usize;
                    debug_assert!(ctg < ctg_width);
                    vote_row[ctg] += 1.0 + (val - ctg as f64);
                }
            }
        });
}

/// Aggregate and normalize per-row category probabilities.
fn prob_rows(
    leaf: &LeafCtg,
    leaves: &[u32],
    n_tree: usize,
    row_start: usize,
    prob: &mut Array2<f64>,
) {
    let ctg_width = leaf.ctg_width();
    let n_block_rows = leaves.len() / n_tree;
    let prob = prob.as_slice_mut().expect("probabilities in standard layout");
    prob[row_start * ctg_width..(row_start + n_block_rows) * ctg_width]
        .par_chunks_mut(ctg_width)
        .enumerate()
        .for_each(|(block_row, prob_row)| {
            let leaf_row = &leaves[block_row * n_tree..(block_row + 1) * n_tree];
            let mut row_sum = 0.0f64;
            for (tree, &leaf_idx) in leaf_row.iter().enumerate() {
                if leaf_idx != NO_LEAF {
                    for (ctg, &weight) in leaf.leaf_weight(tree, leaf_idx).iter().enumerate() {
                        prob_row[ctg] += weight;
                        row_sum += weight;
                    }
                }
            }
            if row_sum > 0.0 {
                let recip = 1.0 / row_sum;
                prob_row.iter_mut().for_each(|p| *p *= recip);
            }
        });
}

/// Argmax the jittered votes; lowest category wins ties. The census
/// truncates each tally back to its integer vote count.
///
/// Every contributing tree tallies at least `1.0`, so an all-zero vote
/// row means no tree contributed and the row stays [`NO_PREDICTION`];
/// rows with any contribution always resolve to a category.
fn vote(votes: &Array2<f64>) -> (Vec<u32>, Array2<u32>) {
    let (n_row, ctg_width) = votes.dim();
    let mut y_pred = vec![NO_PREDICTION; n_row];
    let mut census = Array2::<u32>::zeros((n_row, ctg_width));
    for row in 0..n_row {
        let mut score_max = 0.0f64;
        for ctg in 0..ctg_width {
            let ctg_score = votes[(row, ctg)];
            if ctg_score > score_max {
                score_max = ctg_score;
                y_pred[row] = ctg as u32;
            }
            census[(row, ctg)] = ctg_score as u32;
        }
    }
    (y_pred, census)
}

/// Confusion matrix and per-category error from a test vector.
fn validate(y_test: &[u32], y_pred: &[u32], ctg_width: usize) -> (Array2<u32>, Vec<f64>) {
    let mut conf = Array2::<u32>::zeros((ctg_width, ctg_width));
    for (&truth, &pred) in y_test.iter().zip(y_pred) {
        if pred != NO_PREDICTION {
            conf[(truth as usize, pred as usize)] += 1;
        }
    }

    let error = (0..ctg_width)
        .map(|truth| {
            let mut wrong = 0u32;
            let mut right = 0u32;
            for pred in 0..ctg_width {
                if pred == truth {
                    right = conf[(truth, pred)];
                } else {
                    wrong += conf[(truth, pred)];
                }
            }
            if wrong + right == 0 {
                0.0
            } else {
                wrong as f64 / (wrong + right) as f64
            }
        })
        .collect();

    (conf, error)
}
