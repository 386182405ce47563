//! Runs of factor-valued predictors during splitting.
//!
//! A run is a contiguous block of rank-ordered, staged samples sharing one
//! factor level. For each (node, factor-predictor) pair under consideration
//! in a level, a [`RunSet`] materializes the pair's runs, accumulates
//! per-category response sums, and resolves the left/right partition chosen
//! by the split driver.
//!
//! Run sets live only for a single level. Their backing storage is a
//! [`LevelArena`]: three typed vectors (runs, heap pairs, out-slots) plus
//! the category-sum checkerboard and the uniform draws used to subsample
//! very wide factors. Each `RunSet` is a view of disjoint arena intervals,
//! so the per-pair work of one level can fan out across threads.
//!
//! Storage is sized by conservative per-pair run counts carried forward
//! from the previous level. Run lengths only decrease along a lineage, so
//! once a pair collapses to a single run the fact is sticky and the pair
//! drops out of split consideration; the restage pass maintains those
//! counts.

use crate::training::heap::{self, BhPair};
use crate::utils::split_lengths_mut;

/// Cap on factor levels considered exhaustively in multi-class splits.
/// Wider sets are subsampled without replacement.
pub const MAX_WIDTH: usize = 10;

/// One run: a rank interval of staged samples with aggregated response.
///
/// `start..end` indexes the staged frame; `rank` is the shared factor code.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrNode {
    pub start: u32,
    pub end: u32,
    pub s_count: u32,
    pub sum: f64,
    pub rank: u32,
}

impl FrNode {
    /// Number of staged samples covered by the run.
    #[inline]
    pub fn idx_count(&self) -> u32 {
        self.end - self.start
    }
}

// =============================================================================
// LevelArena
// =============================================================================

/// Geometry of one run set within the arena.
#[derive(Debug, Clone, Copy)]
struct SetExtents {
    run_len: usize,
    heap_len: usize,
    out_len: usize,
}

/// Level-scoped backing storage for every run set of the level.
///
/// Reclaimed wholesale when the level ends.
#[derive(Debug)]
pub struct LevelArena {
    runs: Vec<FrNode>,
    heap: Vec<BhPair>,
    out: Vec<u32>,
    /// Category checkerboard: `ctg_width` doubles per allocated run slot.
    ctg_sum: Vec<f64>,
    /// Uniform `(0,1)` draws for wide multi-class subsampling, heap-aligned.
    rv_wide: Vec<f64>,
    ctg_width: usize,
    extents: Vec<SetExtents>,
}

impl LevelArena {
    /// Size the arena from conservative per-pair run counts.
    ///
    /// `ctg_width` is zero for regression. `rv_draw` supplies uniform
    /// `(0,1)` variates; it is consulted only for wide multi-class sets.
    pub fn new(
        safe_count: &[u32],
        ctg_width: usize,
        mut rv_draw: impl FnMut() -> f64,
    ) -> Self {
        let mut run_total = 0usize;
        let mut heap_total = 0usize;
        let mut out_total = 0usize;
        let mut extents = Vec::with_capacity(safe_count.len());

        for &safe in safe_count {
            let safe = safe as usize;
            let (heap_len, out_len) = if ctg_width == 0 || ctg_width == 2 {
                // Regression and binary order every run through the heap.
                (safe, safe)
            } else if safe > MAX_WIDTH {
                // Wide multi-class: heap holds the sampling keys, the
                // out-list only the surviving subset.
                (safe, MAX_WIDTH)
            } else {
                (0, safe)
            };
            extents.push(SetExtents {
                run_len: safe,
                heap_len,
                out_len,
            });
            run_total += safe;
            heap_total += heap_len;
            out_total += out_len;
        }

        let rv_wide = if ctg_width > 2 {
            (0..heap_total).map(|_| rv_draw()).collect()
        } else {
            Vec::new()
        };

        Self {
            runs: vec![FrNode::default(); run_total],
            heap: vec![BhPair::default(); heap_total],
            out: vec![0; out_total],
            ctg_sum: vec![0.0; run_total * ctg_width],
            rv_wide,
            ctg_width,
            extents,
        }
    }

    /// Carve the arena into its per-pair views, in allocation order.
    pub fn run_sets(&mut self) -> Vec<RunSet<'_>> {
        let run_lens: Vec<usize> = self.extents.iter().map(|e| e.run_len).collect();
        let heap_lens: Vec<usize> = self.extents.iter().map(|e| e.heap_len).collect();
        let out_lens: Vec<usize> = self.extents.iter().map(|e| e.out_len).collect();
        let ctg_lens: Vec<usize> = self
            .extents
            .iter()
            .map(|e| e.run_len * self.ctg_width)
            .collect();

        let runs = split_lengths_mut(&mut self.runs, &run_lens);
        let heaps = split_lengths_mut(&mut self.heap, &heap_lens);
        let outs = split_lengths_mut(&mut self.out, &out_lens);
        let ctgs = split_lengths_mut(&mut self.ctg_sum, &ctg_lens);

        let has_rv = !self.rv_wide.is_empty();
        let mut rv = self.rv_wide.as_slice();
        let ctg_width = self.ctg_width;
        runs.into_iter()
            .zip(heaps)
            .zip(outs)
            .zip(ctgs)
            .map(|(((runs, heap), out), ctg_sum)| {
                let (rv_here, rv_rest) = rv.split_at(if has_rv { heap.len() } else { 0 });
                rv = rv_rest;
                RunSet {
                    runs,
                    heap,
                    out,
                    ctg_sum,
                    rv_wide: rv_here,
                    ctg_width,
                    run_count: 0,
                    runs_lh: 0,
                }
            })
            .collect()
    }
}

// =============================================================================
// RunSet
// =============================================================================

/// Per-(node, factor-predictor) view into the level arena.
#[derive(Debug)]
pub struct RunSet<'a> {
    runs: &'a mut [FrNode],
    heap: &'a mut [BhPair],
    out: &'a mut [u32],
    ctg_sum: &'a mut [f64],
    rv_wide: &'a [f64],
    ctg_width: usize,
    run_count: usize,
    runs_lh: usize,
}

impl<'a> RunSet<'a> {
    /// Runs written so far this level.
    #[inline]
    pub fn run_count(&self) -> usize {
        self.run_count
    }

    /// Runs participating in partition search: capped at [`MAX_WIDTH`].
    #[inline]
    pub fn eff_count(&self) -> usize {
        self.run_count.min(MAX_WIDTH)
    }

    /// Out-slots resolved to the left-hand side.
    #[inline]
    pub fn runs_lh(&self) -> usize {
        self.runs_lh
    }

    #[inline]
    pub fn run(&self, slot: usize) -> &FrNode {
        &self.runs[slot]
    }

    /// Category sum for a run slot.
    #[inline]
    pub fn sum_ctg(&self, slot: usize, ctg: usize) -> f64 {
        self.ctg_sum[slot * self.ctg_width + ctg]
    }

    /// Append a run together with its per-category response sums
    /// (`ctg_sums` is empty for regression).
    pub fn accumulate(&mut self, run: FrNode, ctg_sums: &[f64]) {
        debug_assert!(self.run_count < self.runs.len());
        debug_assert_eq!(ctg_sums.len(), self.ctg_width);
        let slot = self.run_count;
        self.runs[slot] = run;
        self.ctg_sum[slot * self.ctg_width..(slot + 1) * self.ctg_width]
            .copy_from_slice(ctg_sums);
        self.run_count += 1;
    }

    /// Prime the heap with slot mean responses (regression).
    pub fn heap_mean(&mut self) {
        for slot in 0..self.run_count {
            let run = &self.runs[slot];
            heap::insert(self.heap, slot as u32, run.sum / run.s_count as f64);
        }
    }

    /// Prime the heap with category-1 concentration (binary
    /// classification). Priors scale every key alike, so concentration
    /// order equals probability order.
    pub fn heap_binary(&mut self) {
        for slot in 0..self.run_count {
            let key = self.sum_ctg(slot, 1) / self.runs[slot].sum;
            heap::insert(self.heap, slot as u32, key);
        }
    }

    /// Prime the heap with the pre-drawn uniform variates: sampling
    /// without replacement for wide multi-class sets.
    pub fn heap_random(&mut self) {
        for slot in 0..self.run_count {
            heap::insert(self.heap, slot as u32, self.rv_wide[slot]);
        }
    }

    /// Emit the `pop` smallest-key slots, ascending, into the out-list.
    /// A `pop` of zero empties the whole heap.
    pub fn de_pop(&mut self, pop: usize) {
        let pop = if pop == 0 { self.run_count } else { pop };
        debug_assert!(pop <= self.run_count);
        heap::depopulate(self.heap, self.out, pop);
    }

    /// Shrink a wide set to [`MAX_WIDTH`] runs sampled without
    /// replacement, compacting the surviving runs and their category
    /// strips into the leading slots.
    ///
    /// Returns the post-shrink run count.
    pub fn de_wide(&mut self) -> usize {
        if self.run_count <= MAX_WIDTH {
            return self.run_count;
        }

        self.heap_random();
        self.de_pop(MAX_WIDTH);

        let mut temp_run = [FrNode::default(); MAX_WIDTH];
        let mut temp_sum = vec![0.0; self.ctg_width * MAX_WIDTH];
        for i in 0..MAX_WIDTH {
            let out_slot = self.out[i] as usize;
            temp_run[i] = self.runs[out_slot];
            temp_sum[i * self.ctg_width..(i + 1) * self.ctg_width].copy_from_slice(
                &self.ctg_sum[out_slot * self.ctg_width..(out_slot + 1) * self.ctg_width],
            );
        }
        for i in 0..MAX_WIDTH {
            self.runs[i] = temp_run[i];
            self.ctg_sum[i * self.ctg_width..(i + 1) * self.ctg_width]
                .copy_from_slice(&temp_sum[i * self.ctg_width..(i + 1) * self.ctg_width]);
        }

        self.run_count = MAX_WIDTH;
        MAX_WIDTH
    }

    /// Decode an explicit subset mask: bit `k` sends slot `k` left.
    ///
    /// Returns `(lh_idx_count, lh_samp_ct)` and records the left slots in
    /// the out-list.
    pub fn lh_bits(&mut self, lh_bits: u32) -> (u32, u32) {
        let slot_sup = self.eff_count() - 1;
        let mut lh_idx_count = 0u32;
        let mut lh_samp_ct = 0u32;
        self.runs_lh = 0;
        if lh_bits != 0 {
            for slot in 0..slot_sup {
                if lh_bits & (1 << slot) != 0 {
                    let run = &self.runs[slot];
                    lh_idx_count += run.idx_count();
                    lh_samp_ct += run.s_count;
                    self.out[self.runs_lh] = slot as u32;
                    self.runs_lh += 1;
                }
            }
        }
        (lh_idx_count, lh_samp_ct)
    }

    /// Resolve a heap-ordered cut: the first `cut + 1` out-slots go left.
    pub fn lh_slots(&mut self, cut: usize) -> (u32, u32) {
        let mut lh_idx_count = 0u32;
        let mut lh_samp_ct = 0u32;
        for out_slot in 0..=cut {
            let run = &self.runs[self.out[out_slot] as usize];
            lh_idx_count += run.idx_count();
            lh_samp_ct += run.s_count;
        }
        self.runs_lh = cut + 1;
        (lh_idx_count, lh_samp_ct)
    }

    /// Dereference the `out_slot`-th chosen run: `(start, end, rank)`.
    pub fn bounds(&self, out_slot: usize) -> (u32, u32, u32) {
        let run = &self.runs[self.out[out_slot] as usize];
        (run.start, run.end, run.rank)
    }

    /// Run slot referenced by an out-list position.
    #[inline]
    pub fn out_slot(&self, out_pos: usize) -> usize {
        self.out[out_pos] as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_one(safe: u32, ctg_width: usize, rv: Vec<f64>) -> LevelArena {
        let mut draws = rv.into_iter();
        LevelArena::new(&[safe], ctg_width, move || draws.next().unwrap_or(0.5))
    }

    fn push_run(rs: &mut RunSet<'_>, rank: u32, start: u32, end: u32, s_count: u32, ctg_sums: &[f64]) {
        let sum = ctg_sums.iter().sum::<f64>();
        rs.accumulate(
            FrNode {
                start,
                end,
                s_count,
                sum: if ctg_sums.is_empty() { s_count as f64 } else { sum },
                rank,
            },
            ctg_sums,
        );
    }

    #[test]
    fn binary_heap_orders_by_concentration() {
        // Levels A, B, C with category sums (2,0), (0,2), (1,1).
        let mut arena = arena_one(3, 2, vec![]);
        let mut sets = arena.run_sets();
        let rs = &mut sets[0];
        push_run(rs, 0, 0, 2, 2, &[2.0, 0.0]);
        push_run(rs, 1, 2, 4, 2, &[0.0, 2.0]);
        push_run(rs, 2, 4, 6, 2, &[1.0, 1.0]);

        rs.heap_binary();
        rs.de_pop(0);

        // Keys 0.0, 1.0, 0.5 over slots A, B, C: out-order A, C, B.
        assert_eq!(rs.bounds(0).2, 0);
        assert_eq!(rs.bounds(1).2, 2);
        assert_eq!(rs.bounds(2).2, 1);
    }

    #[test]
    fn run_totals_match_node_totals() {
        let mut arena = arena_one(3, 2, vec![]);
        let mut sets = arena.run_sets();
        let rs = &mut sets[0];
        push_run(rs, 0, 0, 2, 2, &[2.0, 0.0]);
        push_run(rs, 1, 2, 4, 2, &[0.0, 2.0]);
        push_run(rs, 2, 4, 6, 2, &[1.0, 1.0]);

        let (mut s_count, mut sum) = (0u32, 0.0f64);
        for slot in 0..rs.run_count() {
            s_count += rs.run(slot).s_count;
            sum += rs.run(slot).sum;
            let strip: f64 = (0..2).map(|c| rs.sum_ctg(slot, c)).sum();
            assert!((strip - rs.run(slot).sum).abs() < 1e-12);
        }
        assert_eq!(s_count, 6);
        assert!((sum - 6.0).abs() < 1e-12);
    }

    #[test]
    fn de_wide_is_identity_when_narrow() {
        let mut arena = arena_one(4, 3, vec![]);
        let mut sets = arena.run_sets();
        let rs = &mut sets[0];
        for rank in 0..4 {
            push_run(rs, rank, rank * 2, rank * 2 + 2, 2, &[1.0, 0.5, 0.5]);
        }
        let before: Vec<FrNode> = (0..4).map(|s| *rs.run(s)).collect();
        assert_eq!(rs.de_wide(), 4);
        for (slot, run) in before.iter().enumerate() {
            assert_eq!(rs.run(slot), run);
        }
    }

    #[test]
    fn de_wide_selects_smallest_draws_in_order() {
        // 12 runs, keys arranged so slots 1, 3, 5, ... hold the smallest.
        let rv: Vec<f64> = (0..12)
            .map(|i| if i % 2 == 1 { 0.01 * i as f64 } else { 0.5 + 0.01 * i as f64 })
            .collect();
        let mut arena = arena_one(12, 3, rv);
        let mut sets = arena.run_sets();
        let rs = &mut sets[0];
        for rank in 0..12u32 {
            push_run(rs, rank, rank * 2, rank * 2 + 2, 2, &[rank as f64, 1.0, 0.0]);
        }

        assert_eq!(rs.de_wide(), MAX_WIDTH);
        assert_eq!(rs.run_count(), MAX_WIDTH);

        // Survivors keep distinct original ranks and consistent strips.
        let mut ranks: Vec<u32> = (0..MAX_WIDTH).map(|s| rs.run(s).rank).collect();
        assert_eq!(rs.run(0).rank, 1);
        assert!((rs.sum_ctg(0, 0) - 1.0).abs() < 1e-12);
        ranks.sort_unstable();
        ranks.dedup();
        assert_eq!(ranks.len(), MAX_WIDTH);
    }

    #[test]
    fn lh_bits_accumulates_left_side() {
        let mut arena = arena_one(3, 0, vec![]);
        let mut sets = arena.run_sets();
        let rs = &mut sets[0];
        push_run(rs, 0, 0, 3, 3, &[]);
        push_run(rs, 1, 3, 5, 2, &[]);
        push_run(rs, 2, 5, 9, 4, &[]);

        // Mask 0b01: only slot 0 goes left; slot 2 (top) never enumerated.
        let (idx, samp) = rs.lh_bits(0b01);
        assert_eq!((idx, samp), (3, 3));
        assert_eq!(rs.runs_lh(), 1);
        assert_eq!(rs.bounds(0), (0, 3, 0));

        let (idx, samp) = rs.lh_bits(0b11);
        assert_eq!((idx, samp), (5, 5));
        assert_eq!(rs.runs_lh(), 2);
    }

    #[test]
    fn lh_slots_takes_ordered_prefix() {
        let mut arena = arena_one(3, 0, vec![]);
        let mut sets = arena.run_sets();
        let rs = &mut sets[0];
        // Mean responses 3.0, 1.0, 2.0 over slots 0, 1, 2.
        push_run(rs, 0, 0, 1, 1, &[]);
        rs.runs[0].sum = 3.0;
        push_run(rs, 1, 1, 2, 1, &[]);
        rs.runs[1].sum = 1.0;
        push_run(rs, 2, 2, 3, 1, &[]);
        rs.runs[2].sum = 2.0;

        rs.heap_mean();
        rs.de_pop(0);
        let (idx, samp) = rs.lh_slots(1);
        // Slots 1 and 2 hold the two smallest means.
        assert_eq!((idx, samp), (2, 2));
        assert_eq!(rs.runs_lh(), 2);
        assert_eq!(rs.bounds(0).2, 1);
        assert_eq!(rs.bounds(1).2, 2);
    }
}
