//! Training hyperparameters.

use crate::error::{CanopyError, Result};
use crate::training::Verbosity;

/// Parameters for forest training.
///
/// Use struct construction with `..Default::default()` for convenient
/// configuration.
#[derive(Debug, Clone)]
pub struct TrainParams {
    // --- Ensemble ---
    /// Number of trees to grow.
    pub n_tree: usize,
    /// Bag size per tree; `0` means one sample per row.
    pub n_samp: usize,
    /// Sample the bag with replacement.
    pub with_replacement: bool,
    /// Optional per-row sampling weights; uniform when empty.
    pub sample_weight: Vec<f64>,
    /// Number of trees grown (and committed) per parallel block.
    pub train_block: usize,

    // --- Tree shape ---
    /// Smallest node eligible for splitting.
    pub min_node: usize,
    /// Floor on the smaller child's share of a split, in `[0, 1)`.
    pub min_ratio: f64,
    /// Depth cap; `0` means unlimited.
    pub tot_levels: usize,

    // --- Predictor selection ---
    /// Predictors sampled per node when positive; otherwise `pred_prob`
    /// governs selection.
    pub pred_fixed: usize,
    /// Per-predictor Bernoulli selection probability; all predictors when
    /// empty.
    pub pred_prob: Vec<f64>,
    /// Per-predictor monotonicity sign for numeric regressors:
    /// `-1`, `0`, `+1`. Empty means unconstrained.
    pub reg_mono: Vec<i32>,

    // --- Reproducibility / output ---
    /// Seed for bagging, predictor selection, wide-factor subsampling, and
    /// leaf jitter.
    pub seed: u64,
    /// Verbosity of training output.
    pub verbosity: Verbosity,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            n_tree: 100,
            n_samp: 0,
            with_replacement: true,
            sample_weight: Vec::new(),
            train_block: 8,
            min_node: 2,
            min_ratio: 0.0,
            tot_levels: 0,
            pred_fixed: 0,
            pred_prob: Vec::new(),
            reg_mono: Vec::new(),
            seed: 42,
            verbosity: Verbosity::Silent,
        }
    }
}

impl TrainParams {
    /// Validate against the block geometry.
    pub(crate) fn validate(&self, n_row: usize, n_pred: usize) -> Result<()> {
        if self.n_tree == 0 {
            return Err(CanopyError::ArityError("zero trees requested".to_string()));
        }
        if !self.sample_weight.is_empty() && self.sample_weight.len() != n_row {
            return Err(CanopyError::ArityError(format!(
                "{} sample weights for {} rows",
                self.sample_weight.len(),
                n_row
            )));
        }
        if !self.pred_prob.is_empty() && self.pred_prob.len() != n_pred {
            return Err(CanopyError::ArityError(format!(
                "{} selection probabilities for {} predictors",
                self.pred_prob.len(),
                n_pred
            )));
        }
        if !self.reg_mono.is_empty() && self.reg_mono.len() != n_pred {
            return Err(CanopyError::ArityError(format!(
                "{} monotonicity signs for {} predictors",
                self.reg_mono.len(),
                n_pred
            )));
        }
        Ok(())
    }

    /// Effective bag size.
    #[inline]
    pub(crate) fn samp_count(&self, n_row: usize) -> usize {
        if self.n_samp == 0 {
            n_row
        } else {
            self.n_samp
        }
    }
}
