//! Rank-indexed representation of the numeric predictors.
//!
//! Each numeric predictor is pre-sorted once: the rows are stably ordered by
//! value and assigned dense ranks (tied values share a rank and stay in input
//! order). Training then walks ranks instead of raw values, and iterative
//! retrainings reuse the same `RowRank` without re-sorting.
//!
//! The structure serializes with the PreFormat artifact so a warm-start
//! session can skip recomputation.

use serde::{Deserialize, Serialize};

use crate::data::TrainBlock;
use crate::error::{CanopyError, Result};
use crate::utils::argsort;

/// Per-predictor row permutations sorted by value, with inverses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRank {
    n_row: usize,
    /// Rows of predictor `p` in ascending value order: `row[p][i]`.
    row: Vec<Vec<u32>>,
    /// Dense rank of `row[p][i]`'s value; non-decreasing along `i`.
    rank: Vec<Vec<u32>>,
    /// Inverse permutation: `inv[p][r] -> rank` for row `r`.
    inv: Vec<Vec<u32>>,
}

impl RowRank {
    /// Pre-sort every numeric predictor of a training block.
    pub fn pre_format(block: &TrainBlock) -> Result<Self> {
        if block.n_row() == 0 {
            return Err(CanopyError::ArityError("empty rows".to_string()));
        }
        let n_row = block.n_row();
        let mut row = Vec::with_capacity(block.n_pred_num());
        let mut rank = Vec::with_capacity(block.n_pred_num());
        let mut inv = Vec::with_capacity(block.n_pred_num());

        for pred_idx in block.num_first()..block.num_sup() {
            let col = block.num_col(pred_idx);
            let order = argsort(col);

            let mut pred_rank = Vec::with_capacity(n_row);
            let mut pred_inv = vec![0u32; n_row];
            let mut cur_rank = 0u32;
            for (i, &r) in order.iter().enumerate() {
                if i > 0 && col[r as usize] != col[order[i - 1] as usize] {
                    cur_rank += 1;
                }
                pred_rank.push(cur_rank);
                pred_inv[r as usize] = cur_rank;
            }

            row.push(order);
            rank.push(pred_rank);
            inv.push(pred_inv);
        }

        Ok(Self { n_row, row, rank, inv })
    }

    #[inline]
    pub fn n_row(&self) -> usize {
        self.n_row
    }

    #[inline]
    pub fn n_pred_num(&self) -> usize {
        self.row.len()
    }

    /// Rows of a numeric predictor in ascending value order.
    #[inline]
    pub fn rows(&self, pred_idx: usize) -> &[u32] {
        &self.row[pred_idx]
    }

    /// Dense ranks aligned with [`rows`](Self::rows).
    #[inline]
    pub fn ranks(&self, pred_idx: usize) -> &[u32] {
        &self.rank[pred_idx]
    }

    /// Rank of a given row under a numeric predictor.
    #[inline]
    pub fn row_rank(&self, pred_idx: usize, row: usize) -> u32 {
        self.inv[pred_idx][row]
    }

    /// Number of distinct ranks (tied-value groups) for a predictor.
    pub fn rank_count(&self, pred_idx: usize) -> u32 {
        self.rank[pred_idx].last().map_or(0, |&r| r + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    fn rank_of(values: &[f64]) -> RowRank {
        let fe_num =
            Array2::from_shape_vec((values.len(), 1), values.to_vec()).unwrap();
        let fe_fac = Array2::<u32>::zeros((0, 0));
        let block = TrainBlock::new(fe_num.view(), fe_fac.view(), vec![]).unwrap();
        RowRank::pre_format(&block).unwrap()
    }

    #[test]
    fn permutation_is_bijection_and_sorted() {
        let values = [3.0, 1.0, 2.0, 5.0, 4.0];
        let rr = rank_of(&values);

        let mut seen = vec![false; values.len()];
        for &r in rr.rows(0) {
            assert!(!seen[r as usize]);
            seen[r as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));

        let ordered: Vec<f64> = rr.rows(0).iter().map(|&r| values[r as usize]).collect();
        for pair in ordered.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn ties_share_rank_and_preserve_input_order() {
        let rr = rank_of(&[2.0, 1.0, 2.0, 1.0]);
        assert_eq!(rr.rows(0), &[1, 3, 0, 2]);
        assert_eq!(rr.ranks(0), &[0, 0, 1, 1]);
        assert_eq!(rr.rank_count(0), 2);
        assert_eq!(rr.row_rank(0, 0), 1);
        assert_eq!(rr.row_rank(0, 3), 0);
    }

    #[test]
    fn inverse_matches_forward() {
        let values = [0.5, -1.0, 3.25, 0.5, 2.0];
        let rr = rank_of(&values);
        for (i, &r) in rr.rows(0).iter().enumerate() {
            assert_eq!(rr.row_rank(0, r as usize), rr.ranks(0)[i]);
        }
    }

    #[test]
    fn factor_only_block_has_no_rank_entries() {
        let fe_num = Array2::<f64>::zeros((3, 0));
        let fe_fac = arr2(&[[0u32], [1], [0]]);
        let block = TrainBlock::new(fe_num.view(), fe_fac.view(), vec![2]).unwrap();
        let rr = RowRank::pre_format(&block).unwrap();
        assert_eq!(rr.n_pred_num(), 0);
    }
}
