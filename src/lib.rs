//! canopy: a random forest training and prediction library.
//!
//! The crate pre-sorts predictors into rank-indexed blocks, grows decision
//! trees level by level with argmax splits over numeric and factor
//! predictors, and walks the trained ensemble to produce regression,
//! classification, and quantile predictions.
//!
//! # Overview
//!
//! - [`data`]: predictor blocks, row ranks, in-bag bit matrices, and the
//!   PreFormat ingestion artifact.
//! - [`training`]: bag sampling, the level-wise split engine, and the
//!   forest trainer.
//! - [`forest`]: the trained ensemble arrays and leaf stores.
//! - [`predict`]: row-blocked ensemble traversal and scoring.
//!
//! # Example
//!
//! ```ignore
//! use canopy::data::{PredictBlock, RowRank, TrainBlock};
//! use canopy::training::{train_regression, TrainParams};
//! use canopy::predict::predict_regression;
//!
//! let block = TrainBlock::new(fe_num.view(), fe_fac.view(), fac_card)?;
//! let row_rank = RowRank::pre_format(&block)?;
//! let trained = train_regression(&block, &row_rank, &y, &TrainParams::default())?;
//!
//! let test = PredictBlock::new(fe_num_t.view(), fe_fac_t.view())?;
//! let y_pred = predict_regression(&test, &trained, None)?;
//! ```

pub mod data;
pub mod error;
pub mod forest;
pub mod predict;
pub mod training;
pub mod utils;

pub use error::{CanopyError, CanopyWarning, Result};
