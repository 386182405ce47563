//! Per-tree bag sampling.
//!
//! Each tree draws a bag of `n_samp` row indices, with or without
//! replacement, optionally weighted per row. The bag is kept as one record
//! per distinct sampled row, in ascending row order, carrying the
//! multiplicity and the response contribution.

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Sentinel for rows outside the bag.
pub const SAMPLE_NONE: u32 = u32::MAX;

/// One bagged row: multiplicity and aggregated response.
#[derive(Debug, Clone, Copy)]
pub struct SampleNode {
    pub row: u32,
    /// Number of times the row was drawn.
    pub s_count: u32,
    /// `s_count * response` (raw response for regression, proxy for
    /// classification).
    pub sum: f64,
    /// Response category; zero for regression.
    pub ctg: u32,
}

/// A tree's bag: distinct sampled rows plus the row-to-sample map.
#[derive(Debug, Clone)]
pub struct Bag {
    pub samples: Vec<SampleNode>,
    /// `row -> sample index`, or [`SAMPLE_NONE`] when out of bag.
    pub row_to_sample: Vec<u32>,
    /// Total multiplicity over the bag (`== n_samp`).
    pub bag_count: u32,
}

impl Bag {
    /// Sample a regression bag.
    pub fn sample_reg(
        y: &[f64],
        n_samp: usize,
        with_replacement: bool,
        weight: &[f64],
        rng: &mut Xoshiro256PlusPlus,
    ) -> Self {
        let counts = sample_counts(y.len(), n_samp, with_replacement, weight, rng);
        Self::from_counts(&counts, |row| (y[row], 0))
    }

    /// Sample a classification bag; `proxy` carries the per-row response
    /// encoding used by the splitter.
    pub fn sample_ctg(
        y_ctg: &[u32],
        proxy: &[f64],
        n_samp: usize,
        with_replacement: bool,
        weight: &[f64],
        rng: &mut Xoshiro256PlusPlus,
    ) -> Self {
        let counts = sample_counts(y_ctg.len(), n_samp, with_replacement, weight, rng);
        Self::from_counts(&counts, |row| (proxy[row], y_ctg[row]))
    }

    fn from_counts(counts: &[u32], response: impl Fn(usize) -> (f64, u32)) -> Self {
        let mut samples = Vec::new();
        let mut row_to_sample = vec![SAMPLE_NONE; counts.len()];
        let mut bag_count = 0u32;
        for (row, &s_count) in counts.iter().enumerate() {
            if s_count == 0 {
                continue;
            }
            let (resp, ctg) = response(row);
            row_to_sample[row] = samples.len() as u32;
            samples.push(SampleNode {
                row: row as u32,
                s_count,
                sum: resp * s_count as f64,
                ctg,
            });
            bag_count += s_count;
        }
        Self {
            samples,
            row_to_sample,
            bag_count,
        }
    }

    /// Aggregate `(s_count, sum)` over the whole bag.
    pub fn totals(&self) -> (u32, f64) {
        (
            self.bag_count,
            self.samples.iter().map(|s| s.sum).sum(),
        )
    }
}

/// Draw per-row multiplicities for one bag.
fn sample_counts(
    n_row: usize,
    n_samp: usize,
    with_replacement: bool,
    weight: &[f64],
    rng: &mut Xoshiro256PlusPlus,
) -> Vec<u32> {
    let mut counts = vec![0u32; n_row];
    if with_replacement {
        if weight.is_empty() {
            for _ in 0..n_samp {
                counts[rng.gen_range(0..n_row)] += 1;
            }
        } else {
            // Inverse-CDF draws against the cumulative weight.
            let mut cum = Vec::with_capacity(n_row);
            let mut total = 0.0;
            for &w in weight {
                total += w;
                cum.push(total);
            }
            for _ in 0..n_samp {
                let u = rng.gen::<f64>() * total;
                let idx = cum.partition_point(|&c| c <= u).min(n_row - 1);
                counts[idx] += 1;
            }
        }
    } else {
        let n_samp = n_samp.min(n_row);
        if weight.is_empty() {
            // Partial Fisher-Yates shuffle.
            let mut indices: Vec<u32> = (0..n_row as u32).collect();
            for i in 0..n_samp {
                let j = rng.gen_range(i..n_row);
                indices.swap(i, j);
            }
            for &row in &indices[..n_samp] {
                counts[row as usize] = 1;
            }
        } else {
            // Weighted order sampling: exponential keys, smallest first.
            let mut keyed: Vec<(f64, u32)> = weight
                .iter()
                .enumerate()
                .map(|(row, &w)| {
                    let u: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
                    (-u.ln() / w.max(f64::MIN_POSITIVE), row as u32)
                })
                .collect();
            keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            for &(_, row) in keyed.iter().take(n_samp) {
                counts[row as usize] = 1;
            }
        }
    }
    counts
}
