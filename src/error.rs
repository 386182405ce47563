//! Shared error types for training and prediction sessions.

/// Errors raised by training and prediction drivers.
#[derive(Debug, thiserror::Error)]
pub enum CanopyError {
    /// A predictor block was queried without a live session.
    #[error("predictor block not initialized")]
    NotInitialized,

    /// A second block was installed while a session was live.
    #[error("predictor block already initialized")]
    AlreadyInitialized,

    /// The factor predictor set of a test frame differs from training.
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    /// Empty rows or predictors, or a zero tree count.
    #[error("arity error: {0}")]
    ArityError(String),

    /// A tree outgrew its height budget. Recoverable: the trainer regrows
    /// the estimate by the slop factor and retries.
    #[error("tree height {needed} exceeds budget {budget}")]
    BudgetExceeded { needed: usize, budget: usize },

    /// Invariant violation. Fatal.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Non-fatal conditions surfaced alongside a result.
///
/// Factor levels in a test frame that were never observed during training
/// downgrade to a warning: the offending rows receive a proxy code and
/// prediction proceeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanopyWarning {
    /// A test-frame factor level was not observed in training.
    LevelNotObserved {
        /// Factor predictor position (within the factor block).
        fac_idx: usize,
        /// The unobserved level name.
        level: String,
    },
}

impl std::fmt::Display for CanopyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LevelNotObserved { fac_idx, level } => write!(
                f,
                "factor {} level {:?} not observed in training: employing proxy",
                fac_idx, level
            ),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CanopyError>;
