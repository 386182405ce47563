//! PreFormat harmonization and warm-start scenarios.

use approx::assert_abs_diff_eq;
use ndarray::Array2;

use canopy::data::{PreFormat, RowRank};
use canopy::predict::predict_regression;
use canopy::training::{train_regression, TrainParams};
use canopy::CanopyWarning;

fn factor_frame(levels: &[&str], codes: &[u32]) -> PreFormat {
    let fe_num = Array2::<f64>::zeros((codes.len(), 0));
    let fe_fac = Array2::from_shape_vec((codes.len(), 1), codes.to_vec()).unwrap();
    PreFormat::from_blocks(
        vec!["f".to_string()],
        (0..codes.len()).map(|r| r.to_string()).collect(),
        fe_num.view(),
        fe_fac.view(),
        vec![levels.iter().map(|s| s.to_string()).collect()],
        vec![0],
    )
    .unwrap()
}

fn params() -> TrainParams {
    TrainParams {
        n_tree: 1,
        with_replacement: false,
        min_node: 1,
        ..Default::default()
    }
}

#[test]
fn unobserved_level_predicts_through_the_proxy() {
    // Train on levels x, y, z with level-pure responses.
    let train_pf = factor_frame(&["x", "y", "z"], &[0, 0, 1, 1, 2, 2]);
    let y = [1.0, 1.0, 2.0, 2.0, 3.0, 3.0];
    let block = train_pf.train_block().unwrap();
    let row_rank = RowRank::pre_format(&block).unwrap();
    let trained = train_regression(&block, &row_rank, &y, &params()).unwrap();

    // The test frame swaps z for the unobserved w.
    let test_pf = factor_frame(&["x", "y", "w"], &[0, 1, 2]);
    let (test_block, warnings) = test_pf.predict_block(&train_pf.signature).unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        &warnings[0],
        CanopyWarning::LevelNotObserved { level, .. } if level == "w"
    ));

    // Known levels predict their trained response; the proxy-coded row
    // falls through every factor split to the right and still scores.
    let y_pred = predict_regression(&test_block, &trained, None).unwrap();
    assert_abs_diff_eq!(y_pred[0], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(y_pred[1], 2.0, epsilon = 1e-12);
    assert!(y_pred[2].is_finite());
}

#[test]
fn row_rank_round_trip_reproduces_training() {
    let train_pf = factor_frame(&["a", "b", "c"], &[0, 1, 2, 0, 1, 2]);
    let y = [1.0, 4.0, 2.0, 1.0, 4.0, 2.0];
    let block = train_pf.train_block().unwrap();

    let row_rank = RowRank::pre_format(&block).unwrap();
    let json = serde_json::to_string(&row_rank).unwrap();
    let warm: RowRank = serde_json::from_str(&json).unwrap();

    let cold = train_regression(&block, &row_rank, &y, &params()).unwrap();
    let reused = train_regression(&block, &warm, &y, &params()).unwrap();

    let (test_block, _) = train_pf.predict_block(&train_pf.signature).unwrap();
    let cold_pred = predict_regression(&test_block, &cold, None).unwrap();
    let warm_pred = predict_regression(&test_block, &reused, None).unwrap();
    assert_eq!(cold_pred, warm_pred);
}
