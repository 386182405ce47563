//! Predictor block storage.
//!
//! A predictor block is the design matrix split into a numeric and a factor
//! part. Predictors are indexed with a numeric prefix `[0, n_pred_num)` and a
//! factor suffix `[n_pred_num, n_pred)`. Blocks are immutable for the
//! lifetime of the training or prediction session that holds them.
//!
//! Training and prediction want different layouts: training walks whole
//! predictor columns, so [`TrainBlock`] stores column-major; prediction walks
//! whole rows, so [`PredictBlock`] stores the transposed blocks and reads one
//! predictor value per tree-node visit.

use ndarray::ArrayView2;

use crate::error::{CanopyError, Result};

// =============================================================================
// TrainBlock
// =============================================================================

/// Column-major predictor block for a training session.
#[derive(Debug, Clone)]
pub struct TrainBlock {
    /// Numeric columns, concatenated: `block_num[p * n_row + row]`.
    block_num: Vec<f64>,
    /// Factor columns of zero-based level codes, concatenated.
    block_fac: Vec<u32>,
    /// Cardinality per factor predictor.
    fac_card: Vec<u32>,
    n_row: usize,
    n_pred_num: usize,
}

impl TrainBlock {
    /// Build a training block from dense matrices, each `n_row x n_pred_*`.
    ///
    /// Either matrix may have zero columns, but not both; factor codes must
    /// lie below their predictor's cardinality.
    pub fn new(
        fe_num: ArrayView2<'_, f64>,
        fe_fac: ArrayView2<'_, u32>,
        fac_card: Vec<u32>,
    ) -> Result<Self> {
        let n_row = if fe_num.ncols() > 0 {
            fe_num.nrows()
        } else {
            fe_fac.nrows()
        };
        let n_pred_num = fe_num.ncols();
        let n_pred_fac = fe_fac.ncols();
        if n_row == 0 {
            return Err(CanopyError::ArityError("empty rows".to_string()));
        }
        if n_pred_num + n_pred_fac == 0 {
            return Err(CanopyError::ArityError("empty predictors".to_string()));
        }
        if n_pred_fac != fac_card.len() {
            return Err(CanopyError::ArityError(format!(
                "{} factor predictors but {} cardinalities",
                n_pred_fac,
                fac_card.len()
            )));
        }
        if n_pred_fac > 0 && fe_fac.nrows() != n_row {
            return Err(CanopyError::ArityError("block row counts differ".to_string()));
        }

        let mut block_num = Vec::with_capacity(n_row * n_pred_num);
        for col in fe_num.columns() {
            block_num.extend(col.iter().copied());
        }

        let mut block_fac = Vec::with_capacity(n_row * n_pred_fac);
        for (fac_idx, col) in fe_fac.columns().into_iter().enumerate() {
            let card = fac_card[fac_idx];
            if card == 0 {
                return Err(CanopyError::ArityError(format!(
                    "factor predictor {} has zero cardinality",
                    fac_idx
                )));
            }
            for &code in col.iter() {
                if code >= card {
                    return Err(CanopyError::ArityError(format!(
                        "factor predictor {} code {} exceeds cardinality {}",
                        fac_idx, code, card
                    )));
                }
                block_fac.push(code);
            }
        }

        Ok(Self {
            block_num,
            block_fac,
            fac_card,
            n_row,
            n_pred_num,
        })
    }

    #[inline]
    pub fn n_row(&self) -> usize {
        self.n_row
    }

    #[inline]
    pub fn n_pred(&self) -> usize {
        self.n_pred_num + self.fac_card.len()
    }

    #[inline]
    pub fn n_pred_num(&self) -> usize {
        self.n_pred_num
    }

    #[inline]
    pub fn n_pred_fac(&self) -> usize {
        self.fac_card.len()
    }

    /// First numeric predictor index.
    #[inline]
    pub fn num_first(&self) -> usize {
        0
    }

    /// One past the last numeric predictor index.
    #[inline]
    pub fn num_sup(&self) -> usize {
        self.n_pred_num
    }

    /// First factor predictor index.
    #[inline]
    pub fn fac_first(&self) -> usize {
        self.n_pred_num
    }

    /// One past the last factor predictor index.
    #[inline]
    pub fn fac_sup(&self) -> usize {
        self.n_pred()
    }

    #[inline]
    pub fn is_factor(&self, pred_idx: usize) -> bool {
        pred_idx >= self.n_pred_num
    }

    /// Position of a predictor within its typed block.
    #[inline]
    pub fn block_idx(&self, pred_idx: usize) -> usize {
        if self.is_factor(pred_idx) {
            pred_idx - self.n_pred_num
        } else {
            pred_idx
        }
    }

    /// Cardinality of a factor predictor, by overall predictor index.
    #[inline]
    pub fn fac_card(&self, pred_idx: usize) -> u32 {
        self.fac_card[self.block_idx(pred_idx)]
    }

    /// Largest cardinality over the factor block; zero if none.
    pub fn card_max(&self) -> u32 {
        self.fac_card.iter().copied().max().unwrap_or(0)
    }

    /// Numeric column for a numeric predictor index.
    #[inline]
    pub fn num_col(&self, pred_idx: usize) -> &[f64] {
        debug_assert!(!self.is_factor(pred_idx));
        &self.block_num[pred_idx * self.n_row..(pred_idx + 1) * self.n_row]
    }

    /// Factor-code column for a factor predictor index.
    #[inline]
    pub fn fac_col(&self, pred_idx: usize) -> &[u32] {
        let fac_idx = self.block_idx(pred_idx);
        debug_assert!(self.is_factor(pred_idx));
        &self.block_fac[fac_idx * self.n_row..(fac_idx + 1) * self.n_row]
    }
}

// =============================================================================
// PredictBlock
// =============================================================================

/// Transposed predictor block for a prediction session.
///
/// Factor codes are `i32` here: remapped test frames may carry proxy codes
/// beyond the trained cardinality, which the forest walk routes right.
#[derive(Debug, Clone)]
pub struct PredictBlock {
    /// Numeric block, one row per predictor: `num_t[p * n_row + row]`.
    num_t: Vec<f64>,
    /// Factor block, one row per predictor.
    fac_t: Vec<i32>,
    n_row: usize,
    n_pred_num: usize,
    n_pred_fac: usize,
}

impl PredictBlock {
    /// Build a prediction block from transposed matrices, `n_pred_* x n_row`.
    pub fn new(fe_num_t: ArrayView2<'_, f64>, fe_fac_t: ArrayView2<'_, i32>) -> Result<Self> {
        let n_pred_num = fe_num_t.nrows();
        let n_pred_fac = fe_fac_t.nrows();
        let n_row = if n_pred_num > 0 {
            fe_num_t.ncols()
        } else {
            fe_fac_t.ncols()
        };
        if n_row == 0 {
            return Err(CanopyError::ArityError("empty rows".to_string()));
        }
        if n_pred_num + n_pred_fac == 0 {
            return Err(CanopyError::ArityError("empty predictors".to_string()));
        }
        if n_pred_fac > 0 && fe_fac_t.ncols() != n_row {
            return Err(CanopyError::ArityError("block row counts differ".to_string()));
        }

        let mut num_t = Vec::with_capacity(n_pred_num * n_row);
        for pred_row in fe_num_t.rows() {
            num_t.extend(pred_row.iter().copied());
        }
        let mut fac_t = Vec::with_capacity(n_pred_fac * n_row);
        for pred_row in fe_fac_t.rows() {
            fac_t.extend(pred_row.iter().copied());
        }

        Ok(Self {
            num_t,
            fac_t,
            n_row,
            n_pred_num,
            n_pred_fac,
        })
    }

    #[inline]
    pub fn n_row(&self) -> usize {
        self.n_row
    }

    #[inline]
    pub fn n_pred_num(&self) -> usize {
        self.n_pred_num
    }

    #[inline]
    pub fn n_pred_fac(&self) -> usize {
        self.n_pred_fac
    }

    #[inline]
    pub fn is_factor(&self, pred_idx: usize) -> bool {
        pred_idx >= self.n_pred_num
    }

    /// Numeric value at `(pred_idx, row)`.
    #[inline]
    pub fn num_val(&self, pred_idx: usize, row: usize) -> f64 {
        self.num_t[pred_idx * self.n_row + row]
    }

    /// Factor code at `(pred_idx, row)`, by overall predictor index.
    #[inline]
    pub fn fac_val(&self, pred_idx: usize, row: usize) -> i32 {
        self.fac_t[(pred_idx - self.n_pred_num) * self.n_row + row]
    }
}

// =============================================================================
// Session
// =============================================================================

/// A live predictor block: exactly one of training or prediction.
#[derive(Debug)]
pub enum SessionBlock {
    Train(TrainBlock),
    Predict(PredictBlock),
}

/// Session handle owning the block for the duration of a training or
/// prediction run.
///
/// Installing consumes the input arrays; releasing tears the block down.
/// Querying a dormant session fails with [`CanopyError::NotInitialized`],
/// installing over a live block with [`CanopyError::AlreadyInitialized`].
#[derive(Debug, Default)]
pub struct Session {
    live: Option<SessionBlock>,
}

impl Session {
    pub fn new() -> Self {
        Self { live: None }
    }

    pub fn install_train(&mut self, block: TrainBlock) -> Result<()> {
        if self.live.is_some() {
            return Err(CanopyError::AlreadyInitialized);
        }
        self.live = Some(SessionBlock::Train(block));
        Ok(())
    }

    pub fn install_predict(&mut self, block: PredictBlock) -> Result<()> {
        if self.live.is_some() {
            return Err(CanopyError::AlreadyInitialized);
        }
        self.live = Some(SessionBlock::Predict(block));
        Ok(())
    }

    /// The live training block.
    pub fn train(&self) -> Result<&TrainBlock> {
        match &self.live {
            Some(SessionBlock::Train(block)) => Ok(block),
            _ => Err(CanopyError::NotInitialized),
        }
    }

    /// The live prediction block.
    pub fn predict(&self) -> Result<&PredictBlock> {
        match &self.live {
            Some(SessionBlock::Predict(block)) => Ok(block),
            _ => Err(CanopyError::NotInitialized),
        }
    }

    /// Tear down the live block, returning it to the caller.
    pub fn release(&mut self) -> Result<SessionBlock> {
        self.live.take().ok_or(CanopyError::NotInitialized)
    }
}
