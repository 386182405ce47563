//! Predictor data structures shared by training and prediction.
//!
//! - [`TrainBlock`] / [`PredictBlock`]: the design matrix split into numeric
//!   and factor blocks, column-major for training and transposed for
//!   prediction, held immutable by a [`Session`].
//! - [`RowRank`]: per-predictor rank permutations, computed once per
//!   PreFormat and reused across retrainings.
//! - [`BitMatrix`]: packed per-tree in-bag masks.
//! - [`PreFormat`] / [`Signature`]: the portable ingestion artifact and the
//!   factor harmonization applied to test frames.

mod bitmatrix;
mod block;
mod row_rank;
mod signature;

pub use bitmatrix::BitMatrix;
pub use block::{PredictBlock, Session, SessionBlock, TrainBlock};
pub use row_rank::RowRank;
pub use signature::{PreFormat, Signature};
