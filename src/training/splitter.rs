//! Per-level split search.
//!
//! For each live node the driver scores its sampled predictors and keeps
//! the argmax. Numeric predictors walk the node's staged samples in rank
//! order, accumulating left-hand statistics and evaluating the information
//! gain at every rank boundary. Factor predictors collapse the staged
//! ranks into runs inside a [`RunSet`] and search the run partition space:
//! explicit subset enumeration when few runs remain, a heap-ordered cut
//! scan for regression and binary classification, and random subsampling
//! down to [`MAX_WIDTH`] runs for wide multi-class factors.
//!
//! Information gain is the Gini decrease for classification and the
//! weighted-variance decrease for regression, both expressed as
//! `sum^2 / s_count` terms net of the parent's pre-bias. Ties break toward
//! the lowest predictor index, then the lowest rank boundary or earliest
//! partition, by strict-improvement scanning order.

use crate::data::TrainBlock;
use crate::training::runs::{FrNode, RunSet, MAX_WIDTH};
use crate::training::sample::SampleNode;

/// One staged sample: a bag entry pinned to its predictor rank.
///
/// Factor predictors stage the level code as the rank.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StagedSample {
    pub sample_idx: u32,
    pub rank: u32,
}

/// A live node's staged range and response totals.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrontierNode {
    pub pt_id: u32,
    pub start: u32,
    pub extent: u32,
    pub s_count: u32,
    pub sum: f64,
}

/// A (node, predictor) pair admitted to the level's split search.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PairDesc {
    pub pred_idx: u32,
    /// Conservative run count carried from the previous level.
    pub safe_count: u32,
}

/// Resolution of a node's argmax split.
#[derive(Debug, Clone)]
pub(crate) struct SplitWinner {
    pub pred_idx: u32,
    pub info: f64,
    pub lh_idx_count: u32,
    pub lh_samp_ct: u32,
    pub lh_sum: f64,
    pub kind: WinnerKind,
}

#[derive(Debug, Clone)]
pub(crate) enum WinnerKind {
    /// Left side is the staged prefix of length `lh_idx_count`; route by
    /// `value <= split_val`.
    Num { split_val: f64 },
    /// Left side is the set of factor codes, described per run by its
    /// staged interval.
    Fac {
        card: u32,
        lh_codes: Vec<u32>,
        lh_ranges: Vec<(u32, u32)>,
    },
}

/// Read-only context shared by every pair of the level.
pub(crate) struct SplitInputs<'a> {
    pub staged: &'a [Vec<StagedSample>],
    pub samples: &'a [SampleNode],
    pub block: &'a TrainBlock,
    /// Zero for regression.
    pub ctg_width: usize,
    pub min_ratio: f64,
    pub reg_mono: &'a [i32],
}

/// Partial candidate produced while scanning one predictor.
struct CandScore {
    info: f64,
    lh_idx_count: u32,
    lh_samp_ct: u32,
    lh_sum: f64,
}

impl SplitInputs<'_> {
    /// Parent pre-bias: the information of the unsplit node.
    fn pre_bias(&self, node: &FrontierNode) -> f64 {
        if self.ctg_width == 0 {
            node.sum * node.sum / node.s_count as f64
        } else {
            let totals = self.node_ctg_totals(node);
            ssq_over_sum(&totals, node.sum)
        }
    }

    fn node_ctg_totals(&self, node: &FrontierNode) -> Vec<f64> {
        let mut totals = vec![0.0; self.ctg_width];
        // Any predictor's staged range covers the node's samples once.
        let staged = &self.staged[0][node.start as usize..(node.start + node.extent) as usize];
        for entry in staged {
            let sample = &self.samples[entry.sample_idx as usize];
            totals[sample.ctg as usize] += sample.sum;
        }
        totals
    }

    /// Both-side size veto: the smaller child's share of the larger.
    fn ratio_ok(&self, lh_idx: u32, rh_idx: u32) -> bool {
        if lh_idx == 0 || rh_idx == 0 {
            return false;
        }
        if self.min_ratio <= 0.0 {
            return true;
        }
        let (lo, hi) = if lh_idx < rh_idx {
            (lh_idx, rh_idx)
        } else {
            (rh_idx, lh_idx)
        };
        lo as f64 / hi as f64 >= self.min_ratio
    }
}

#[inline]
fn ssq_over_sum(sums: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    sums.iter().map(|s| s * s).sum::<f64>() / total
}

/// Argmax split for one node over its admitted pairs.
///
/// `run_sets` supplies one view per factor pair, in pair order.
pub(crate) fn split_node<'a>(
    inputs: &SplitInputs<'_>,
    node: &FrontierNode,
    pairs: &[PairDesc],
    run_sets: Vec<RunSet<'a>>,
) -> Option<SplitWinner> {
    let pre_bias = inputs.pre_bias(node);
    let mut run_sets = run_sets.into_iter();
    let mut best: Option<SplitWinner> = None;

    for pair in pairs {
        let pred_idx = pair.pred_idx as usize;
        let winner = if inputs.block.is_factor(pred_idx) {
            let mut rs = run_sets
                .next()
                .expect("factor pair without a run set");
            split_fac(inputs, node, pair.pred_idx, pre_bias, &mut rs)
        } else {
            split_num(inputs, node, pair.pred_idx, pre_bias)
        };
        if let Some(winner) = winner {
            if best.as_ref().map_or(true, |b| winner.info > b.info) {
                best = Some(winner);
            }
        }
    }
    best
}

// =============================================================================
// Numeric predictors
// =============================================================================

fn split_num(
    inputs: &SplitInputs<'_>,
    node: &FrontierNode,
    pred_idx: u32,
    pre_bias: f64,
) -> Option<SplitWinner> {
    let staged =
        &inputs.staged[pred_idx as usize][node.start as usize..(node.start + node.extent) as usize];
    if staged.len() < 2 {
        return None;
    }

    let col = inputs.block.num_col(pred_idx as usize);
    let mono = inputs
        .reg_mono
        .get(pred_idx as usize)
        .copied()
        .unwrap_or(0);

    let tot_s = node.s_count as f64;
    let tot_sum = node.sum;
    let ctg_totals = if inputs.ctg_width > 0 {
        inputs.node_ctg_totals(node)
    } else {
        Vec::new()
    };

    let mut lh_s = 0u32;
    let mut lh_sum = 0.0f64;
    let mut lh_ctg = vec![0.0f64; inputs.ctg_width];
    let mut best: Option<(CandScore, f64)> = None;

    for i in 0..staged.len() - 1 {
        let sample = &inputs.samples[staged[i].sample_idx as usize];
        lh_s += sample.s_count;
        lh_sum += sample.sum;
        if inputs.ctg_width > 0 {
            lh_ctg[sample.ctg as usize] += sample.sum;
        }

        // Splits land on rank boundaries only.
        if staged[i].rank == staged[i + 1].rank {
            continue;
        }

        let lh_idx = (i + 1) as u32;
        let rh_idx = node.extent - lh_idx;
        if !inputs.ratio_ok(lh_idx, rh_idx) {
            continue;
        }

        let rh_s = tot_s - lh_s as f64;
        let rh_sum = tot_sum - lh_sum;
        let info = if inputs.ctg_width == 0 {
            if mono != 0 {
                let lh_mean = lh_sum / lh_s as f64;
                let rh_mean = rh_sum / rh_s;
                if (mono > 0 && lh_mean > rh_mean) || (mono < 0 && lh_mean < rh_mean) {
                    continue;
                }
            }
            lh_sum * lh_sum / lh_s as f64 + rh_sum * rh_sum / rh_s - pre_bias
        } else {
            let rh_ctg: Vec<f64> = ctg_totals
                .iter()
                .zip(&lh_ctg)
                .map(|(t, l)| t - l)
                .collect();
            ssq_over_sum(&lh_ctg, lh_sum) + ssq_over_sum(&rh_ctg, rh_sum) - pre_bias
        };

        if info > 0.0 && best.as_ref().map_or(true, |(b, _)| info > b.info) {
            let row_lh = inputs.samples[staged[i].sample_idx as usize].row as usize;
            let row_rh = inputs.samples[staged[i + 1].sample_idx as usize].row as usize;
            let split_val = 0.5 * (col[row_lh] + col[row_rh]);
            best = Some((
                CandScore {
                    info,
                    lh_idx_count: lh_idx,
                    lh_samp_ct: lh_s,
                    lh_sum,
                },
                split_val,
            ));
        }
    }

    best.map(|(cand, split_val)| SplitWinner {
        pred_idx,
        info: cand.info,
        lh_idx_count: cand.lh_idx_count,
        lh_samp_ct: cand.lh_samp_ct,
        lh_sum: cand.lh_sum,
        kind: WinnerKind::Num { split_val },
    })
}

// =============================================================================
// Factor predictors
// =============================================================================

fn split_fac(
    inputs: &SplitInputs<'_>,
    node: &FrontierNode,
    pred_idx: u32,
    pre_bias: f64,
    rs: &mut RunSet<'_>,
) -> Option<SplitWinner> {
    accumulate_runs(inputs, node, pred_idx, rs);
    let mut run_count = rs.run_count();
    if run_count < 2 {
        return None;
    }

    // Wide multi-class sets shrink to a random subset first.
    if inputs.ctg_width > 2 && run_count > MAX_WIDTH {
        run_count = rs.de_wide();
    }

    let cand = if run_count <= MAX_WIDTH {
        split_fac_bits(inputs, node, pre_bias, rs, run_count)
    } else {
        split_fac_slots(inputs, node, pre_bias, rs, run_count)
    }?;

    let lh_codes: Vec<u32> = (0..rs.runs_lh()).map(|o| rs.bounds(o).2).collect();
    let lh_ranges: Vec<(u32, u32)> = (0..rs.runs_lh())
        .map(|o| {
            let (start, end, _) = rs.bounds(o);
            (start, end)
        })
        .collect();

    Some(SplitWinner {
        pred_idx,
        info: cand.info,
        lh_idx_count: cand.lh_idx_count,
        lh_samp_ct: cand.lh_samp_ct,
        lh_sum: cand.lh_sum,
        kind: WinnerKind::Fac {
            card: inputs.block.fac_card(pred_idx as usize),
            lh_codes,
            lh_ranges,
        },
    })
}

/// Collapse the node's staged range into level-code runs.
fn accumulate_runs(
    inputs: &SplitInputs<'_>,
    node: &FrontierNode,
    pred_idx: u32,
    rs: &mut RunSet<'_>,
) {
    let start = node.start as usize;
    let staged = &inputs.staged[pred_idx as usize][start..start + node.extent as usize];

    let mut run = FrNode::default();
    let mut ctg_scratch = vec![0.0f64; inputs.ctg_width];
    let mut open = false;

    for (i, entry) in staged.iter().enumerate() {
        let abs = (start + i) as u32;
        let sample = &inputs.samples[entry.sample_idx as usize];
        if open && entry.rank != run.rank {
            rs.accumulate(run, &ctg_scratch);
            ctg_scratch.iter_mut().for_each(|c| *c = 0.0);
            open = false;
        }
        if !open {
            run = FrNode {
                start: abs,
                end: abs,
                s_count: 0,
                sum: 0.0,
                rank: entry.rank,
            };
            open = true;
        }
        run.end = abs + 1;
        run.s_count += sample.s_count;
        run.sum += sample.sum;
        if inputs.ctg_width > 0 {
            ctg_scratch[sample.ctg as usize] += sample.sum;
        }
    }
    if open {
        rs.accumulate(run, &ctg_scratch);
    }
}

/// Exhaustive subset enumeration over the effective runs; the top slot
/// anchors the right side, leaving `2^(count - 1) - 1` proper masks.
fn split_fac_bits(
    inputs: &SplitInputs<'_>,
    node: &FrontierNode,
    pre_bias: f64,
    rs: &mut RunSet<'_>,
    run_count: usize,
) -> Option<CandScore> {
    let tot_s = node.s_count as f64;
    let tot_sum = node.sum;
    let ctg_totals = if inputs.ctg_width > 0 {
        (0..inputs.ctg_width)
            .map(|c| (0..run_count).map(|slot| rs.sum_ctg(slot, c)).sum())
            .collect::<Vec<f64>>()
    } else {
        Vec::new()
    };

    let mut best: Option<(CandScore, u32)> = None;
    let mask_sup = 1u32 << (run_count - 1);
    let mut lh_ctg = vec![0.0f64; inputs.ctg_width];

    for mask in 1..mask_sup {
        let mut lh_idx = 0u32;
        let mut lh_s = 0u32;
        let mut lh_sum = 0.0f64;
        lh_ctg.iter_mut().for_each(|c| *c = 0.0);
        for slot in 0..run_count - 1 {
            if mask & (1 << slot) != 0 {
                let run = rs.run(slot);
                lh_idx += run.idx_count();
                lh_s += run.s_count;
                lh_sum += run.sum;
                for (c, acc) in lh_ctg.iter_mut().enumerate() {
                    *acc += rs.sum_ctg(slot, c);
                }
            }
        }

        let rh_idx = node.extent - lh_idx;
        if !inputs.ratio_ok(lh_idx, rh_idx) {
            continue;
        }
        let rh_s = tot_s - lh_s as f64;
        let rh_sum = tot_sum - lh_sum;

        let info = if inputs.ctg_width == 0 {
            lh_sum * lh_sum / lh_s as f64 + rh_sum * rh_sum / rh_s - pre_bias
        } else {
            let rh_ctg: Vec<f64> = ctg_totals
                .iter()
                .zip(&lh_ctg)
                .map(|(t, l)| t - l)
                .collect();
            ssq_over_sum(&lh_ctg, lh_sum) + ssq_over_sum(&rh_ctg, rh_sum) - pre_bias
        };

        if info > 0.0 && best.as_ref().map_or(true, |(b, _)| info > b.info) {
            best = Some((
                CandScore {
                    info,
                    lh_idx_count: lh_idx,
                    lh_samp_ct: lh_s,
                    lh_sum,
                },
                mask,
            ));
        }
    }

    best.map(|(mut cand, mask)| {
        let (lh_idx, lh_samp) = rs.lh_bits(mask);
        debug_assert_eq!(lh_idx, cand.lh_idx_count);
        cand.lh_idx_count = lh_idx;
        cand.lh_samp_ct = lh_samp;
        cand
    })
}

/// Heap-ordered monotonic cut scan for regression and binary
/// classification on many-run sets.
fn split_fac_slots(
    inputs: &SplitInputs<'_>,
    node: &FrontierNode,
    pre_bias: f64,
    rs: &mut RunSet<'_>,
    run_count: usize,
) -> Option<CandScore> {
    if inputs.ctg_width == 2 {
        rs.heap_binary();
    } else {
        rs.heap_mean();
    }
    rs.de_pop(0);

    let tot_s = node.s_count as f64;
    let tot_sum = node.sum;
    let ctg_totals = if inputs.ctg_width > 0 {
        (0..inputs.ctg_width)
            .map(|c| (0..run_count).map(|slot| rs.sum_ctg(slot, c)).sum())
            .collect::<Vec<f64>>()
    } else {
        Vec::new()
    };

    let mut lh_idx = 0u32;
    let mut lh_s = 0u32;
    let mut lh_sum = 0.0f64;
    let mut lh_ctg = vec![0.0f64; inputs.ctg_width];
    let mut best: Option<(CandScore, usize)> = None;

    for cut in 0..run_count - 1 {
        let slot_run = rs.out_slot(cut);
        let run = *rs.run(slot_run);
        lh_idx += run.idx_count();
        lh_s += run.s_count;
        lh_sum += run.sum;
        for (c, acc) in lh_ctg.iter_mut().enumerate() {
            *acc += rs.sum_ctg(slot_run, c);
        }

        let rh_idx = node.extent - lh_idx;
        if !inputs.ratio_ok(lh_idx, rh_idx) {
            continue;
        }
        let rh_s = tot_s - lh_s as f64;
        let rh_sum = tot_sum - lh_sum;

        let info = if inputs.ctg_width == 0 {
            lh_sum * lh_sum / lh_s as f64 + rh_sum * rh_sum / rh_s - pre_bias
        } else {
            let rh_ctg: Vec<f64> = ctg_totals
                .iter()
                .zip(&lh_ctg)
                .map(|(t, l)| t - l)
                .collect();
            ssq_over_sum(&lh_ctg, lh_sum) + ssq_over_sum(&rh_ctg, rh_sum) - pre_bias
        };

        if info > 0.0 && best.as_ref().map_or(true, |(b, _)| info > b.info) {
            best = Some((
                CandScore {
                    info,
                    lh_idx_count: lh_idx,
                    lh_samp_ct: lh_s,
                    lh_sum,
                },
                cut,
            ));
        }
    }

    best.map(|(mut cand, cut)| {
        let (lh_idx, lh_samp) = rs.lh_slots(cut);
        debug_assert_eq!(lh_idx, cand.lh_idx_count);
        cand.lh_idx_count = lh_idx;
        cand.lh_samp_ct = lh_samp;
        cand
    })
}
