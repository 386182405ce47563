//! The PreFormat artifact: a portable record of an ingested design matrix.
//!
//! Front-end ingestion produces one `PreFormat` per frame. The record
//! round-trips across sessions (serde) so a warm-start retraining can reuse
//! the blocks and the row ranks without touching the original frame.
//!
//! A test frame is harmonized against the training signature before
//! prediction: the factor predictor layout must match exactly
//! (`SignatureMismatch` otherwise), while level-set drift is repaired by
//! name matching. Levels never observed in training downgrade to a
//! [`CanopyWarning::LevelNotObserved`] and are recoded to the proxy
//! `train_card + 1`, which the forest walk routes to the right-hand side.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::data::{PredictBlock, TrainBlock};
use crate::error::{CanopyError, CanopyWarning, Result};

// =============================================================================
// Signature
// =============================================================================

/// Identity of a frame's predictor layout: which original columns landed
/// where, and the level names of each factor predictor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Original frame column per block position, numeric block first.
    pub pred_map: Vec<u32>,
    /// Level names per factor predictor, in code order.
    pub level: Vec<Vec<String>>,
}

// =============================================================================
// PreFormat
// =============================================================================

/// Portable ingestion record for one design matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreFormat {
    pub col_names: Vec<String>,
    pub row_names: Vec<String>,
    /// Numeric block, column-major `n_row x n_pred_num`.
    pub block_num: Vec<f64>,
    /// Factor block of zero-based codes, column-major `n_row x n_pred_fac`.
    pub block_fac: Vec<u32>,
    pub n_pred_num: usize,
    pub n_pred_fac: usize,
    pub n_row: usize,
    /// Cardinality per factor predictor.
    pub fac_card: Vec<u32>,
    pub signature: Signature,
}

impl PreFormat {
    /// Assemble the record from typed blocks and factor level names.
    ///
    /// `pred_map` gives, per block position, the originating frame column.
    pub fn from_blocks(
        col_names: Vec<String>,
        row_names: Vec<String>,
        fe_num: ArrayView2<'_, f64>,
        fe_fac: ArrayView2<'_, u32>,
        levels: Vec<Vec<String>>,
        pred_map: Vec<u32>,
    ) -> Result<Self> {
        // Delegates validation of shapes and code ranges.
        let fac_card: Vec<u32> = levels.iter().map(|l| l.len() as u32).collect();
        let block = TrainBlock::new(fe_num, fe_fac, fac_card.clone())?;

        let n_row = block.n_row();
        let n_pred_num = block.n_pred_num();
        let n_pred_fac = block.n_pred_fac();

        let mut block_num = Vec::with_capacity(n_row * n_pred_num);
        for p in 0..n_pred_num {
            block_num.extend_from_slice(block.num_col(p));
        }
        let mut block_fac = Vec::with_capacity(n_row * n_pred_fac);
        for p in n_pred_num..n_pred_num + n_pred_fac {
            block_fac.extend_from_slice(block.fac_col(p));
        }

        Ok(Self {
            col_names,
            row_names,
            block_num,
            block_fac,
            n_pred_num,
            n_pred_fac,
            n_row,
            fac_card,
            signature: Signature {
                pred_map,
                level: levels,
            },
        })
    }

    /// Rebuild the column-major training block.
    pub fn train_block(&self) -> Result<TrainBlock> {
        let fe_num = Array2::from_shape_vec(
            (self.n_pred_num, self.n_row),
            self.block_num.clone(),
        )
        .map_err(|e| CanopyError::Internal(e.to_string()))?;
        let fe_fac = Array2::from_shape_vec(
            (self.n_pred_fac, self.n_row),
            self.block_fac.clone(),
        )
        .map_err(|e| CanopyError::Internal(e.to_string()))?;
        // Stored column-major; shape as (pred, row) then transpose the view.
        TrainBlock::new(
            fe_num.t(),
            fe_fac.t(),
            self.fac_card.clone(),
        )
    }

    /// Harmonize this (test) frame against a training signature and build
    /// the transposed prediction block.
    ///
    /// Factor predictor positions must match training exactly. Level sets
    /// are matched by name; unobserved levels warn and receive the proxy
    /// code `train_card + 1`.
    pub fn predict_block(
        &self,
        train: &Signature,
    ) -> Result<(PredictBlock, Vec<CanopyWarning>)> {
        if self.signature.pred_map != train.pred_map {
            return Err(CanopyError::SignatureMismatch(
                "factor predictor set differs from training".to_string(),
            ));
        }

        let mut warnings = Vec::new();
        let mut fac_t = Vec::with_capacity(self.n_pred_fac * self.n_row);
        for fac_idx in 0..self.n_pred_fac {
            let col = &self.block_fac[fac_idx * self.n_row..(fac_idx + 1) * self.n_row];
            let test_levels = &self.signature.level[fac_idx];
            let train_levels = &train.level[fac_idx];

            if test_levels == train_levels {
                fac_t.extend(col.iter().map(|&code| code as i32));
                continue;
            }

            // Recode by level name; unmatched levels map to the proxy.
            let proxy = train_levels.len() as i32 + 1;
            let remap: Vec<i32> = test_levels
                .iter()
                .map(|name| {
                    match train_levels.iter().position(|t| t == name) {
                        Some(pos) => pos as i32,
                        None => {
                            warnings.push(CanopyWarning::LevelNotObserved {
                                fac_idx,
                                level: name.clone(),
                            });
                            proxy
                        }
                    }
                })
                .collect();
            fac_t.extend(col.iter().map(|&code| remap[code as usize]));
        }

        let num_t = {
            let mut buf = Vec::with_capacity(self.n_pred_num * self.n_row);
            buf.extend_from_slice(&self.block_num);
            buf
        };
        let fe_num_t = Array2::from_shape_vec((self.n_pred_num, self.n_row), num_t)
            .map_err(|e| CanopyError::Internal(e.to_string()))?;
        let fe_fac_t = Array2::from_shape_vec((self.n_pred_fac, self.n_row), fac_t)
            .map_err(|e| CanopyError::Internal(e.to_string()))?;

        let block = PredictBlock::new(fe_num_t.view(), fe_fac_t.view())?;
        Ok((block, warnings))
    }
}
