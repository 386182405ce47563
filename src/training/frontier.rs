//! Level-by-level growth of a single tree.
//!
//! The grower stages every predictor once per tree: a rank-ordered frame of
//! the bagged samples, one frame per predictor, partitioned into contiguous
//! per-node ranges. Each level then
//!
//! 1. samples predictors per live node and sizes the level arena from the
//!    run counts carried forward by the previous restage,
//! 2. fans the (node, predictor) pairs out across threads and reduces to
//!    one argmax winner per node,
//! 3. records the winning splits in the pre-tree, and
//! 4. restages: redistributes every frame's node range into the two child
//!    ranges (left first), recomputing per-(child, predictor) run counts
//!    on the way through.
//!
//! Restage is the only phase that maps split nodes to their descendants,
//! which makes singleton detection free: a pair whose child range holds a
//! single run stays a singleton for the rest of the tree and drops out of
//! the split search.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

use crate::data::{RowRank, TrainBlock};
use crate::error::Result;
use crate::forest::ForestNode;
use crate::training::pretree::PreTree;
use crate::training::runs::LevelArena;
use crate::training::sample::Bag;
use crate::training::splitter::{
    self, FrontierNode, PairDesc, SplitInputs, SplitWinner, StagedSample, WinnerKind,
};
use crate::training::TrainParams;

/// The response view shared by every tree of a training run.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Response<'a> {
    Reg {
        y: &'a [f64],
    },
    Ctg {
        y_ctg: &'a [u32],
        proxy: &'a [f64],
        ctg_width: usize,
    },
}

impl Response<'_> {
    pub fn ctg_width(&self) -> usize {
        match self {
            Response::Reg { .. } => 0,
            Response::Ctg { ctg_width, .. } => *ctg_width,
        }
    }
}

/// A fully grown tree, pre-flattened for the forest splice.
pub(crate) struct GrownTree {
    pub nodes: Vec<ForestNode>,
    pub fac_split: Vec<u32>,
    /// Leaf index per pre-tree node (`u32::MAX` for splits).
    pub leaf_of_node: Vec<u32>,
    /// Pre-tree node holding each bag sample at termination.
    pub sample_pt: Vec<u32>,
    pub bag: Bag,
    /// Information gain accrued per predictor by this tree's splits.
    pub pred_info: Vec<f64>,
}

/// Grows one tree against the immutable training state.
pub(crate) struct TreeGrower<'a> {
    pub block: &'a TrainBlock,
    pub row_rank: &'a RowRank,
    pub params: &'a TrainParams,
    pub response: Response<'a>,
}

impl TreeGrower<'_> {
    /// Grow tree `tree_idx` under the given pre-tree budget.
    pub fn grow(&self, tree_idx: usize, height_cap: usize) -> Result<GrownTree> {
        let tree_seed = self
            .params
            .seed
            .wrapping_add((tree_idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(tree_seed);

        let bag = match self.response {
            Response::Reg { y } => Bag::sample_reg(
                y,
                self.params.samp_count(self.block.n_row()),
                self.params.with_replacement,
                &self.params.sample_weight,
                &mut rng,
            ),
            Response::Ctg { y_ctg, proxy, .. } => Bag::sample_ctg(
                y_ctg,
                proxy,
                self.params.samp_count(self.block.n_row()),
                self.params.with_replacement,
                &self.params.sample_weight,
                &mut rng,
            ),
        };

        let n_pred = self.block.n_pred();
        let n_samples = bag.samples.len();
        let (mut staged, mut run_len) = self.stage(&bag);

        let mut pre_tree = PreTree::new(height_cap);
        let (root_s, root_sum) = bag.totals();
        let mut frontier = vec![FrontierNode {
            pt_id: 0,
            start: 0,
            extent: n_samples as u32,
            s_count: root_s,
            sum: root_sum,
        }];

        let mut sample_pt = vec![0u32; n_samples];
        let mut side = vec![false; n_samples];
        let mut pred_info = vec![0.0f64; n_pred];

        let mut level = 0usize;
        while !frontier.is_empty() {
            if self.params.tot_levels > 0 && level + 1 >= self.params.tot_levels {
                break;
            }

            // Predictor selection per node; singletons are elided.
            let node_pairs: Vec<Vec<PairDesc>> = frontier
                .iter()
                .enumerate()
                .map(|(node_i, node)| {
                    if (node.extent as usize) < self.params.min_node.max(2) {
                        return Vec::new();
                    }
                    let mut node_rng = Xoshiro256PlusPlus::seed_from_u64(
                        tree_seed
                            ^ (level as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9)
                            ^ (node_i as u64).wrapping_mul(0x94D0_49BB_1331_11EB),
                    );
                    self.select_preds(&mut node_rng, &run_len[node_i * n_pred..(node_i + 1) * n_pred])
                })
                .collect();

            // Arena sized by the factor pairs, in (node, pair) order.
            let safe_counts: Vec<u32> = node_pairs
                .iter()
                .flatten()
                .filter(|pair| self.block.is_factor(pair.pred_idx as usize))
                .map(|pair| pair.safe_count)
                .collect();
            let mut level_rng = Xoshiro256PlusPlus::seed_from_u64(
                tree_seed ^ (level as u64).wrapping_mul(0xD6E8_FEB8_6659_FD93),
            );
            let mut arena = LevelArena::new(&safe_counts, self.response.ctg_width(), || {
                level_rng.gen::<f64>()
            });
            let mut run_sets = arena.run_sets();

            // Hand each node its own run-set views, in allocation order.
            let mut tasks = Vec::with_capacity(frontier.len());
            for (node_i, pairs) in node_pairs.into_iter().enumerate() {
                let n_fac = pairs
                    .iter()
                    .filter(|pair| self.block.is_factor(pair.pred_idx as usize))
                    .count();
                let rest = run_sets.split_off(n_fac);
                let sets_here = std::mem::replace(&mut run_sets, rest);
                tasks.push((node_i, pairs, sets_here));
            }

            let inputs = SplitInputs {
                staged: &staged,
                samples: &bag.samples,
                block: self.block,
                ctg_width: self.response.ctg_width(),
                min_ratio: self.params.min_ratio,
                reg_mono: &self.params.reg_mono,
            };
            let winners: Vec<(usize, Option<SplitWinner>)> = tasks
                .into_par_iter()
                .map(|(node_i, pairs, sets)| {
                    (
                        node_i,
                        splitter::split_node(&inputs, &frontier[node_i], &pairs, sets),
                    )
                })
                .collect();

            // Commit winners: pre-tree splits and left/right sides.
            let mut splits: Vec<(usize, SplitWinner, u32, u32)> = Vec::new();
            for (node_i, winner) in winners {
                let Some(winner) = winner else { continue };
                let node = frontier[node_i];
                let (lh_pt, rh_pt) = match &winner.kind {
                    WinnerKind::Num { split_val } => {
                        self.mark_num_side(&mut side, &staged, &node, &winner);
                        pre_tree.split_num(node.pt_id, winner.pred_idx, *split_val)?
                    }
                    WinnerKind::Fac {
                        card,
                        lh_codes,
                        lh_ranges,
                    } => {
                        self.mark_fac_side(&mut side, &staged, &node, &winner, lh_ranges);
                        pre_tree.split_fac(
                            node.pt_id,
                            winner.pred_idx,
                            *card,
                            lh_codes.clone(),
                        )?
                    }
                };
                pred_info[winner.pred_idx as usize] += winner.info;

                // Terminal assignment follows the samples down.
                let frame = &staged[winner.pred_idx as usize];
                for entry in
                    &frame[node.start as usize..(node.start + node.extent) as usize]
                {
                    let s = entry.sample_idx as usize;
                    sample_pt[s] = if side[s] { lh_pt } else { rh_pt };
                }

                splits.push((node_i, winner, lh_pt, rh_pt));
            }

            if splits.is_empty() {
                break;
            }

            // Restage every frame; run counts for the children fall out.
            let ranges: Vec<(u32, u32, u32)> = splits
                .iter()
                .map(|(node_i, winner, _, _)| {
                    let node = &frontier[*node_i];
                    (node.start, node.extent, winner.lh_idx_count)
                })
                .collect();
            let per_pred_rl: Vec<Vec<u32>> = staged
                .par_iter_mut()
                .map(|frame| restage_frame(frame, &ranges, &side))
                .collect();

            let mut next_frontier = Vec::with_capacity(splits.len() * 2);
            let mut next_rl = vec![0u32; splits.len() * 2 * n_pred];
            for (split_i, (node_i, winner, lh_pt, rh_pt)) in splits.iter().enumerate() {
                let node = frontier[*node_i];
                let lh = FrontierNode {
                    pt_id: *lh_pt,
                    start: node.start,
                    extent: winner.lh_idx_count,
                    s_count: winner.lh_samp_ct,
                    sum: winner.lh_sum,
                };
                let rh = FrontierNode {
                    pt_id: *rh_pt,
                    start: node.start + winner.lh_idx_count,
                    extent: node.extent - winner.lh_idx_count,
                    s_count: node.s_count - winner.lh_samp_ct,
                    sum: node.sum - winner.lh_sum,
                };
                for (child_i, child) in [lh, rh].into_iter().enumerate() {
                    let new_node = split_i * 2 + child_i;
                    for (p, rl) in per_pred_rl.iter().enumerate() {
                        next_rl[new_node * n_pred + p] = rl[new_node];
                    }
                    next_frontier.push(child);
                }
            }

            frontier = next_frontier;
            run_len = next_rl;
            level += 1;
        }

        let (nodes, fac_split, leaf_of_node) = pre_tree.flatten();
        Ok(GrownTree {
            nodes,
            fac_split,
            leaf_of_node,
            sample_pt,
            bag,
            pred_info,
        })
    }

    /// Stage every predictor's bagged samples in rank order, returning the
    /// frames and the root-level run counts.
    fn stage(&self, bag: &Bag) -> (Vec<Vec<StagedSample>>, Vec<u32>) {
        let n_pred = self.block.n_pred();
        let n_samples = bag.samples.len();
        let mut staged = Vec::with_capacity(n_pred);
        let mut run_len = Vec::with_capacity(n_pred);

        for pred_idx in 0..n_pred {
            let mut frame = Vec::with_capacity(n_samples);
            if self.block.is_factor(pred_idx) {
                // Counting sort on level codes.
                let card = self.block.fac_card(pred_idx) as usize;
                let col = self.block.fac_col(pred_idx);
                let mut count = vec![0u32; card];
                for sample in &bag.samples {
                    count[col[sample.row as usize] as usize] += 1;
                }
                let mut offset = vec![0u32; card];
                let mut total = 0u32;
                for (code, &c) in count.iter().enumerate() {
                    offset[code] = total;
                    total += c;
                }
                frame.resize(
                    n_samples,
                    StagedSample {
                        sample_idx: 0,
                        rank: 0,
                    },
                );
                for (sample_idx, sample) in bag.samples.iter().enumerate() {
                    let code = col[sample.row as usize];
                    let slot = offset[code as usize];
                    offset[code as usize] += 1;
                    frame[slot as usize] = StagedSample {
                        sample_idx: sample_idx as u32,
                        rank: code,
                    };
                }
            } else {
                let rows = self.row_rank.rows(pred_idx);
                let ranks = self.row_rank.ranks(pred_idx);
                for (i, &row) in rows.iter().enumerate() {
                    let sample_idx = bag.row_to_sample[row as usize];
                    if sample_idx != crate::training::sample::SAMPLE_NONE {
                        frame.push(StagedSample {
                            sample_idx,
                            rank: ranks[i],
                        });
                    }
                }
            }
            run_len.push(count_runs(&frame));
            staged.push(frame);
        }

        (staged, run_len)
    }

    /// Per-node predictor sampling: a fixed draw without replacement, or
    /// per-predictor Bernoulli trials.
    fn select_preds(&self, rng: &mut Xoshiro256PlusPlus, run_len: &[u32]) -> Vec<PairDesc> {
        let n_pred = self.block.n_pred();
        let mut selected: Vec<u32> = if self.params.pred_fixed > 0 {
            let mut indices: Vec<u32> = (0..n_pred as u32).collect();
            let take = self.params.pred_fixed.min(n_pred);
            for i in 0..take {
                let j = rng.gen_range(i..n_pred);
                indices.swap(i, j);
            }
            indices.truncate(take);
            indices.sort_unstable();
            indices
        } else if self.params.pred_prob.is_empty() {
            (0..n_pred as u32).collect()
        } else {
            (0..n_pred as u32)
                .filter(|&p| rng.gen::<f64>() < self.params.pred_prob[p as usize])
                .collect()
        };

        // Sticky singletons never split again.
        selected.retain(|&p| run_len[p as usize] >= 2);
        selected
            .into_iter()
            .map(|pred_idx| PairDesc {
                pred_idx,
                safe_count: run_len[pred_idx as usize],
            })
            .collect()
    }

    fn mark_num_side(
        &self,
        side: &mut [bool],
        staged: &[Vec<StagedSample>],
        node: &FrontierNode,
        winner: &SplitWinner,
    ) {
        let frame = &staged[winner.pred_idx as usize];
        let range = &frame[node.start as usize..(node.start + node.extent) as usize];
        for (i, entry) in range.iter().enumerate() {
            side[entry.sample_idx as usize] = (i as u32) < winner.lh_idx_count;
        }
    }

    fn mark_fac_side(
        &self,
        side: &mut [bool],
        staged: &[Vec<StagedSample>],
        node: &FrontierNode,
        winner: &SplitWinner,
        lh_ranges: &[(u32, u32)],
    ) {
        let frame = &staged[winner.pred_idx as usize];
        for entry in &frame[node.start as usize..(node.start + node.extent) as usize] {
            side[entry.sample_idx as usize] = false;
        }
        for &(start, end) in lh_ranges {
            for entry in &frame[start as usize..end as usize] {
                side[entry.sample_idx as usize] = true;
            }
        }
    }
}

/// Distinct ranks in a staged frame (whole-frame variant for the root).
fn count_runs(frame: &[StagedSample]) -> u32 {
    if frame.is_empty() {
        return 0;
    }
    1 + frame
        .windows(2)
        .filter(|w| w[0].rank != w[1].rank)
        .count() as u32
}

/// Redistribute one frame's split ranges into child ranges, left first,
/// preserving rank order. Returns the per-child run counts, children of
/// each split in order.
fn restage_frame(
    frame: &mut [StagedSample],
    ranges: &[(u32, u32, u32)],
    side: &[bool],
) -> Vec<u32> {
    let mut run_len = Vec::with_capacity(ranges.len() * 2);
    let mut scratch: Vec<StagedSample> = Vec::new();

    for &(start, extent, lh_idx) in ranges {
        let range = &mut frame[start as usize..(start + extent) as usize];
        scratch.clear();
        scratch.reserve(range.len());

        for entry in range.iter() {
            if side[entry.sample_idx as usize] {
                scratch.push(*entry);
            }
        }
        debug_assert_eq!(scratch.len(), lh_idx as usize);
        for entry in range.iter() {
            if !side[entry.sample_idx as usize] {
                scratch.push(*entry);
            }
        }
        range.copy_from_slice(&scratch);

        run_len.push(count_runs(&range[..lh_idx as usize]));
        run_len.push(count_runs(&range[lh_idx as usize..]));
    }

    run_len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sample_idx: u32, rank: u32) -> StagedSample {
        StagedSample { sample_idx, rank }
    }

    #[test]
    fn restage_partitions_stably() {
        let mut frame = vec![
            entry(0, 0),
            entry(1, 1),
            entry(2, 1),
            entry(3, 2),
            entry(4, 3),
        ];
        // Samples 1 and 3 go left.
        let side = vec![false, true, false, true, false];
        let rl = restage_frame(&mut frame, &[(0, 5, 2)], &side);

        let order: Vec<(u32, u32)> = frame.iter().map(|e| (e.sample_idx, e.rank)).collect();
        assert_eq!(order, vec![(1, 1), (3, 2), (0, 0), (2, 1), (4, 3)]);
        // Left has ranks {1, 2}; right {0, 1, 3}.
        assert_eq!(rl, vec![2, 3]);
    }

    #[test]
    fn restage_detects_singletons() {
        let mut frame = vec![entry(0, 4), entry(1, 4), entry(2, 4), entry(3, 7)];
        let side = vec![true, true, true, false];
        let rl = restage_frame(&mut frame, &[(0, 4, 3)], &side);
        assert_eq!(rl, vec![1, 1]);
    }

    #[test]
    fn count_runs_handles_edges() {
        assert_eq!(count_runs(&[]), 0);
        assert_eq!(count_runs(&[entry(0, 3)]), 1);
        assert_eq!(count_runs(&[entry(0, 3), entry(1, 3), entry(2, 5)]), 2);
    }
}
