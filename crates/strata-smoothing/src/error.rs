//! Error types for the smoothing stage.

use strata_covariance::CovarianceError;
use thiserror::Error;

/// Result type for smoothing operations.
pub type Result<T> = std::result::Result<T, SmoothingError>;

/// Errors that can occur while partitioning, scaling or smoothing.
#[derive(Debug, Error)]
pub enum SmoothingError {
    /// A scaler was asked to invert a column it never fitted
    #[error("No fitted scaler for partition {partition}, column {column}")]
    ScalerNotFitted {
        /// Partition identity
        partition: String,
        /// Column identity
        column: String,
    },

    /// A model references a column the partition does not carry
    #[error("Partition {partition} has no column {column}")]
    MissingColumn {
        /// Partition identity
        partition: String,
        /// Column name
        column: String,
    },

    /// Matrix or column shapes disagree
    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// Cholesky factorization failed
    #[error("Matrix is not positive definite at step {step}: {reason}")]
    NotPositiveDefinite {
        /// Time step (or pass) where the factorization failed
        step: usize,
        /// Failure detail
        reason: String,
    },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A shared cache lock was poisoned by a panicking thread
    #[error("Scaler cache lock poisoned")]
    LockPoisoned,

    /// Covariance error
    #[error("Covariance error: {0}")]
    Covariance(#[from] CovarianceError),
}
