//! End-to-end training and prediction scenarios.

use approx::assert_abs_diff_eq;
use ndarray::{Array2, ArrayView2};
use rstest::rstest;

use canopy::data::{BitMatrix, PredictBlock, RowRank, TrainBlock};
use canopy::forest::{Forest, ForestNode, LeafCtg, LeafReg, SplitPayload};
use canopy::predict::{
    predict_classification, predict_quantiles, predict_regression, NO_PREDICTION,
};
use canopy::training::{
    train_classification, train_regression, LeafPayload, TrainParams, TrainedForest,
};

fn numeric_block(cols: &[&[f64]]) -> (TrainBlock, RowRank) {
    let n_row = cols[0].len();
    let mut data = Vec::new();
    for row in 0..n_row {
        for col in cols {
            data.push(col[row]);
        }
    }
    let fe_num = Array2::from_shape_vec((n_row, cols.len()), data).unwrap();
    let fe_fac = Array2::<u32>::zeros((0, 0));
    let block = TrainBlock::new(fe_num.view(), fe_fac.view(), vec![]).unwrap();
    let row_rank = RowRank::pre_format(&block).unwrap();
    (block, row_rank)
}

fn numeric_predict_block(cols: &[&[f64]]) -> PredictBlock {
    let n_row = cols[0].len();
    let mut data = Vec::new();
    for col in cols {
        data.extend_from_slice(col);
    }
    let fe_num_t = Array2::from_shape_vec((cols.len(), n_row), data).unwrap();
    let fe_fac_t = Array2::<i32>::zeros((0, 0));
    PredictBlock::new(fe_num_t.view(), fe_fac_t.view()).unwrap()
}

fn factor_block(codes: &[u32], card: u32) -> (TrainBlock, RowRank) {
    let fe_num = Array2::<f64>::zeros((codes.len(), 0));
    let fe_fac = Array2::from_shape_vec((codes.len(), 1), codes.to_vec()).unwrap();
    let block = TrainBlock::new(fe_num.view(), fe_fac.view(), vec![card]).unwrap();
    let row_rank = RowRank::pre_format(&block).unwrap();
    (block, row_rank)
}

fn factor_predict_block(codes: &[i32]) -> PredictBlock {
    let fe_num_t = Array2::<f64>::zeros((0, 0));
    let fe_fac_t = Array2::from_shape_vec((1, codes.len()), codes.to_vec()).unwrap();
    PredictBlock::new(fe_num_t.view(), fe_fac_t.view()).unwrap()
}

fn deterministic_params(n_tree: usize) -> TrainParams {
    TrainParams {
        n_tree,
        with_replacement: false,
        min_node: 1,
        ..Default::default()
    }
}

// =============================================================================
// Regression
// =============================================================================

#[test]
fn single_numeric_predictor_recovers_step_response() {
    let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let constant = [3.0; 8];
    let y = [1.0, 1.0, 1.0, 1.0, 9.0, 9.0, 9.0, 9.0];
    let (block, row_rank) = numeric_block(&[&x, &constant]);

    let trained =
        train_regression(&block, &row_rank, &y, &deterministic_params(1)).unwrap();

    // The informative predictor carries all the gain; the constant column
    // is a sticky singleton and never splits.
    assert!(trained.pred_info[0] > 0.0);
    assert_eq!(trained.pred_info[1], 0.0);

    let test = numeric_predict_block(&[&x, &constant]);
    let y_pred = predict_regression(&test, &trained, None).unwrap();
    for (pred, expect) in y_pred.iter().zip(&y) {
        assert_abs_diff_eq!(*pred, *expect, epsilon = 1e-12);
    }

    // The split value lands between ranks 4 and 5.
    let (nodes, _, _, _) = trained.forest.as_arrays();
    let SplitPayload::Num { split_val } = nodes[0].split else {
        panic!("root should be a numeric split");
    };
    assert_abs_diff_eq!(split_val, 4.5, epsilon = 1e-12);
}

#[test]
fn depth_cap_collapses_to_ensemble_mean() {
    let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let y = [1.0, 1.0, 1.0, 1.0, 9.0, 9.0, 9.0, 9.0];
    let (block, row_rank) = numeric_block(&[&x]);

    let params = TrainParams {
        tot_levels: 1,
        ..deterministic_params(1)
    };
    let trained = train_regression(&block, &row_rank, &y, &params).unwrap();
    assert_eq!(trained.forest.node_count(), 1);

    let y_pred = predict_regression(&numeric_predict_block(&[&x]), &trained, None).unwrap();
    for pred in y_pred {
        assert_abs_diff_eq!(pred, 5.0, epsilon = 1e-12);
    }
}

#[rstest]
#[case(1, 3.0)]
#[case(-1, 5.0)]
fn monotonicity_veto_respects_declared_sign(#[case] sign: i32, #[case] expect_first: f64) {
    // Response falls as the predictor rises: a +1 constraint forbids every
    // split, a -1 constraint leaves the tree free.
    let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let y = [5.0, 5.0, 5.0, 5.0, 1.0, 1.0, 1.0, 1.0];
    let (block, row_rank) = numeric_block(&[&x]);

    let params = TrainParams {
        reg_mono: vec![sign],
        ..deterministic_params(1)
    };
    let trained = train_regression(&block, &row_rank, &y, &params).unwrap();
    let y_pred = predict_regression(&numeric_predict_block(&[&x]), &trained, None).unwrap();
    assert_abs_diff_eq!(y_pred[0], expect_first, epsilon = 1e-12);
}

#[test]
fn size_ratio_floor_rejects_lopsided_cuts() {
    let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let y = [1.0, 9.0, 9.0, 9.0, 9.0, 9.0, 9.0, 9.0];
    let (block, row_rank) = numeric_block(&[&x]);

    // Unconstrained, the outlier peels off at the root: three nodes.
    let free = train_regression(&block, &row_rank, &y, &deterministic_params(1)).unwrap();
    assert_eq!(free.forest.node_count(), 3);

    // A steep ratio floor forces balanced cuts and a deeper tree.
    let params = TrainParams {
        min_ratio: 0.99,
        ..deterministic_params(1)
    };
    let constrained = train_regression(&block, &row_rank, &y, &params).unwrap();
    assert!(constrained.forest.node_count() > 3);

    // Both settle on the same pure leaves.
    let test = numeric_predict_block(&[&x]);
    let y_free = predict_regression(&test, &free, None).unwrap();
    let y_constrained = predict_regression(&test, &constrained, None).unwrap();
    for (a, b) in y_free.iter().zip(&y_constrained) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
    }
}

#[test]
fn wide_regression_factor_uses_ordered_cuts() {
    // Cardinality 12 exceeds the exhaustive-subset cap; the heap-ordered
    // cut scan still isolates each level's pure response.
    let codes: Vec<u32> = (0..24).map(|i| i / 2).collect();
    let y: Vec<f64> = codes.iter().map(|&c| c as f64).collect();
    let (block, row_rank) = factor_block(&codes, 12);

    let trained = train_regression(&block, &row_rank, &y, &deterministic_params(1)).unwrap();
    assert!(trained.pred_info[0] > 0.0);

    let test = factor_predict_block(&codes.iter().map(|&c| c as i32).collect::<Vec<_>>());
    let y_pred = predict_regression(&test, &trained, None).unwrap();
    for (pred, expect) in y_pred.iter().zip(&y) {
        assert_abs_diff_eq!(*pred, *expect, epsilon = 1e-12);
    }
}

#[test]
fn trained_forest_round_trips_through_serde() {
    let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let y = [1.0, 1.0, 1.0, 1.0, 9.0, 9.0, 9.0, 9.0];
    let (block, row_rank) = numeric_block(&[&x]);
    let trained = train_regression(&block, &row_rank, &y, &deterministic_params(1)).unwrap();

    let json = serde_json::to_string(&trained).unwrap();
    let back: TrainedForest = serde_json::from_str(&json).unwrap();

    let test = numeric_predict_block(&[&x]);
    let before = predict_regression(&test, &trained, None).unwrap();
    let after = predict_regression(&test, &back, None).unwrap();
    assert_eq!(before, after);
}

// =============================================================================
// Bag suppression
// =============================================================================

fn single_leaf_tree(value: f64) -> (Vec<ForestNode>, Vec<(f64, Vec<(u32, u32)>)>) {
    (
        vec![ForestNode {
            pred_idx: 0,
            lh_del: 0,
            split: SplitPayload::Leaf { leaf_idx: 0 },
        }],
        vec![(value, vec![(0, 1)])],
    )
}

fn hand_built_regression(values: &[f64], y_ranked: Vec<f64>) -> TrainedForest {
    let mut forest = Forest::new();
    let mut leaf = LeafReg::new();
    for &value in values {
        let (nodes, leaves) = single_leaf_tree(value);
        forest.append_tree(nodes, vec![]);
        leaf.append_tree(leaves);
    }
    let n_tree = values.len();
    TrainedForest {
        forest,
        leaf: LeafPayload::Reg { leaf, y_ranked },
        pred_info: vec![0.0],
        in_bag: BitMatrix::new(4, n_tree),
    }
}

#[test]
fn bagged_trees_are_suppressed_per_row() {
    // Two constant trees scoring 2.0 and 6.0; bag rows asymmetrically.
    let mut trained = hand_built_regression(&[2.0, 6.0], vec![0.0]);
    trained.in_bag.set(0, 0);
    trained.in_bag.set(3, 0);
    trained.in_bag.set(1, 1);
    trained.in_bag.set(2, 1);

    let rows = [0.0, 0.0, 0.0, 0.0];
    let test = numeric_predict_block(&[&rows]);
    let bag = trained.in_bag.clone();
    let y_pred = predict_regression(&test, &trained, Some(&bag)).unwrap();

    // Row 0: tree 0 bagged, only tree 1 contributes.
    assert_abs_diff_eq!(y_pred[0], 6.0, epsilon = 1e-12);
    assert_abs_diff_eq!(y_pred[3], 6.0, epsilon = 1e-12);
    // Rows 1 and 2: only tree 0.
    assert_abs_diff_eq!(y_pred[1], 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(y_pred[2], 2.0, epsilon = 1e-12);

    // Unmasked, the score is the mean over both trees.
    let unmasked = predict_regression(&test, &trained, None).unwrap();
    for pred in unmasked {
        assert_abs_diff_eq!(pred, 4.0, epsilon = 1e-12);
    }
}

// =============================================================================
// Quantiles
// =============================================================================

#[test]
fn median_reads_ranked_value_at_count_threshold() {
    let y_ranked = vec![10.0, 20.0, 30.0, 40.0, 50.0];
    let mut forest = Forest::new();
    let mut leaf = LeafReg::new();
    forest.append_tree(
        vec![ForestNode {
            pred_idx: 0,
            lh_del: 0,
            split: SplitPayload::Leaf { leaf_idx: 0 },
        }],
        vec![],
    );
    // The leaf covers samples at ranks 2, 2 and 4.
    leaf.append_tree(vec![(30.0, vec![(2, 1), (2, 1), (4, 1)])]);
    let trained = TrainedForest {
        forest,
        leaf: LeafPayload::Reg { leaf, y_ranked },
        pred_info: vec![0.0],
        in_bag: BitMatrix::new(1, 1),
    };

    let rows = [0.0];
    let test = numeric_predict_block(&[&rows]);
    let (_, q_pred) = predict_quantiles(&test, &trained, &[0.5], 5, None).unwrap();
    assert_abs_diff_eq!(q_pred[(0, 0)], 30.0, epsilon = 1e-12);
}

#[test]
fn quantiles_from_trained_forest_bracket_the_response() {
    let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let y = [1.0, 1.0, 1.0, 1.0, 9.0, 9.0, 9.0, 9.0];
    let (block, row_rank) = numeric_block(&[&x]);
    let trained = train_regression(&block, &row_rank, &y, &deterministic_params(1)).unwrap();

    let test = numeric_predict_block(&[&x]);
    let (y_pred, q_pred) =
        predict_quantiles(&test, &trained, &[0.25, 0.5, 0.75], 8, None).unwrap();
    assert_eq!(q_pred.dim(), (8, 3));
    // Pure leaves: every quantile of a row's leaf equals its response.
    for row in 0..8 {
        for j in 0..3 {
            assert_abs_diff_eq!(q_pred[(row, j)], y_pred[row], epsilon = 1e-12);
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

#[test]
fn binary_factor_classification_votes_census_and_confusion() {
    // Levels A, A, B, B, C, C with responses 0, 0, 1, 1, 0, 1.
    let codes = [0u32, 0, 1, 1, 2, 2];
    let y_ctg = [0u32, 0, 1, 1, 0, 1];
    let (block, row_rank) = factor_block(&codes, 3);

    let trained =
        train_classification(&block, &row_rank, &y_ctg, &[], &deterministic_params(1)).unwrap();
    assert!(trained.pred_info[0] > 0.0);

    let test = factor_predict_block(&[0, 0, 1, 1, 2, 2]);
    let out = predict_classification(&test, &trained, None, Some(&y_ctg)).unwrap();

    // Pure levels classify exactly; the mixed level C ties and takes the
    // lowest category.
    assert_eq!(out.y_pred, vec![0, 0, 1, 1, 0, 0]);

    // One tree: census rows are one-hot.
    for row in 0..6 {
        let total: u32 = (0..2).map(|c| out.census[(row, c)]).sum();
        assert_eq!(total, 1);
        assert_eq!(out.census[(row, out.y_pred[row] as usize)], 1);
    }

    // Probabilities normalize per row.
    for row in 0..6 {
        let sum: f64 = (0..2).map(|c| out.prob[(row, c)]).sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
    }

    // Confusion: class 0 all right; class 1 loses the mixed level's row.
    let conf = out.conf.unwrap();
    assert_eq!(conf[(0, 0)], 3);
    assert_eq!(conf[(0, 1)], 0);
    assert_eq!(conf[(1, 1)], 2);
    assert_eq!(conf[(1, 0)], 1);
    let error = out.error.unwrap();
    assert_abs_diff_eq!(error[0], 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(error[1], 1.0 / 3.0, epsilon = 1e-12);
}

#[test]
fn wide_multiclass_factor_subsamples_and_still_predicts() {
    // Cardinality 15 with three classes: the split search caps the runs it
    // enumerates, yet the ensemble should separate the class blocks.
    let codes: Vec<u32> = (0..45).map(|i| i / 3).collect();
    let y_ctg: Vec<u32> = codes.iter().map(|&c| c / 5).collect();
    let (block, row_rank) = factor_block(&codes, 15);

    let params = TrainParams {
        n_tree: 10,
        ..deterministic_params(10)
    };
    let trained = train_classification(&block, &row_rank, &y_ctg, &[], &params).unwrap();

    let test = factor_predict_block(&codes.iter().map(|&c| c as i32).collect::<Vec<_>>());
    let out = predict_classification(&test, &trained, None, None).unwrap();

    assert_eq!(out.y_pred.len(), 45);
    assert_eq!(out.prob.dim(), (45, 3));
    for row in 0..45 {
        let sum: f64 = (0..3).map(|c| out.prob[(row, c)]).sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
    }
    // The full-bag ensemble classifies the training frame correctly.
    let hits = out
        .y_pred
        .iter()
        .zip(&y_ctg)
        .filter(|(pred, truth)| pred == truth)
        .count();
    assert!(hits >= 40, "only {} of 45 rows recovered", hits);
}

#[test]
fn all_bagged_row_has_no_prediction_and_vote_ties_take_lowest() {
    // Two single-leaf trees voting categories 0 and 1 with unit tallies
    // (scores carry no jitter, so the votes tie exactly).
    let mut forest = Forest::new();
    let mut leaf = LeafCtg::new(2);
    for score in [0.0, 1.0] {
        forest.append_tree(
            vec![ForestNode {
                pred_idx: 0,
                lh_del: 0,
                split: SplitPayload::Leaf { leaf_idx: 0 },
            }],
            vec![],
        );
        let mut weights = vec![0.0; 2];
        weights[score as usize] = 1.0;
        leaf.append_tree(vec![(score, weights)]);
    }
    let mut trained = TrainedForest {
        forest,
        leaf: LeafPayload::Ctg { leaf },
        pred_info: vec![0.0],
        in_bag: BitMatrix::new(2, 2),
    };
    // Row 0 is in-bag for both trees; row 1 for neither.
    trained.in_bag.set(0, 0);
    trained.in_bag.set(0, 1);

    let rows = [0.0, 0.0];
    let test = numeric_predict_block(&[&rows]);
    let bag = trained.in_bag.clone();
    let out = predict_classification(&test, &trained, Some(&bag), None).unwrap();

    // Every tree suppressed: no prediction, empty census and prob row.
    assert_eq!(out.y_pred[0], NO_PREDICTION);
    assert_eq!(out.census[(0, 0)], 0);
    assert_eq!(out.census[(0, 1)], 0);
    assert_eq!(out.prob[(0, 0)], 0.0);
    assert_eq!(out.prob[(0, 1)], 0.0);

    // Both trees contribute one vote each: the tie takes category 0.
    assert_eq!(out.y_pred[1], 0);
    assert_eq!(out.census[(1, 0)], 1);
    assert_eq!(out.census[(1, 1)], 1);
    assert_abs_diff_eq!(out.prob[(1, 0)], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(out.prob[(1, 1)], 0.5, epsilon = 1e-12);
}

#[test]
fn mixed_blocks_split_on_the_informative_numeric_predictor() {
    let x = [0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0];
    let codes = [0u32, 1, 0, 1, 0, 1, 0, 1];
    let y_ctg = [0u32, 0, 0, 0, 1, 1, 1, 1];

    let fe_num = Array2::from_shape_vec((8, 1), x.to_vec()).unwrap();
    let fe_fac = Array2::from_shape_vec((8, 1), codes.to_vec()).unwrap();
    let block = TrainBlock::new(fe_num.view(), fe_fac.view(), vec![2]).unwrap();
    let row_rank = RowRank::pre_format(&block).unwrap();

    let trained =
        train_classification(&block, &row_rank, &y_ctg, &[], &deterministic_params(1)).unwrap();
    assert!(trained.pred_info[0] > 0.0);
    assert_eq!(trained.pred_info[1], 0.0);

    let fe_num_t = Array2::from_shape_vec((1, 8), x.to_vec()).unwrap();
    let fac_t: Vec<i32> = codes.iter().map(|&c| c as i32).collect();
    let fe_fac_t = Array2::from_shape_vec((1, 8), fac_t).unwrap();
    let test = PredictBlock::new(
        ArrayView2::from(&fe_num_t),
        ArrayView2::from(&fe_fac_t),
    )
    .unwrap();

    let out = predict_classification(&test, &trained, None, None).unwrap();
    assert_eq!(out.y_pred, vec![0, 0, 0, 0, 1, 1, 1, 1]);
}
