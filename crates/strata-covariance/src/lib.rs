#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/strata/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod correlation;
pub mod matrix;
pub mod model;
pub mod repair;

pub use correlation::{CorrelationConfig, CorrelationMatrixBuilder, PivotTable};
pub use matrix::{CorrelationEntry, CorrelationMatrix};
pub use model::{
    CorrelationMode, CovarianceModel, MEASUREMENT_EPSILON, measurement_standard_error,
};
pub use repair::{
    EigenDecomposition, RepairConfig, is_positive_semi_definite, min_eigenvalue,
    repair_correlation, symmetric_eigen,
};

use thiserror::Error;

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors that can occur while building correlation or covariance matrices
#[derive(Debug, Error)]
pub enum CovarianceError {
    /// Insufficient data for estimation
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData {
        /// Required number of observations
        required: usize,
        /// Actual number of observations
        actual: usize,
    },

    /// Matrix could not be made positive definite
    #[error("Matrix is not positive definite: {0}")]
    NotPositiveDefinite(String),

    /// Eigendecomposition did not converge
    #[error("Eigendecomposition did not converge after {sweeps} sweeps")]
    NotConverged {
        /// Number of Jacobi sweeps performed
        sweeps: usize,
    },

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },

    /// A matrix entry is NaN or infinite
    #[error("Non-finite value at ({row}, {col})")]
    NonFinite {
        /// Row index
        row: usize,
        /// Column index
        col: usize,
    },

    /// The same category code appears twice on a matrix axis
    #[error("Duplicate category code: {0}")]
    DuplicateCategory(i64),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Polars error
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
