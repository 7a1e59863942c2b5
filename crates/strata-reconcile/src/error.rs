//! Error types for reconciliation.

use chrono::NaiveDate;
use strata_covariance::CovarianceError;
use strata_panel::{CategoryCode, PanelError};
use strata_smoothing::SmoothingError;
use thiserror::Error;

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors that can occur while reconciling or exporting results.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Metric configuration is invalid
    #[error("Invalid configuration for {metric}: {reason}")]
    InvalidConfig {
        /// Metric being configured
        metric: String,
        /// What is wrong
        reason: String,
    },

    /// The panel carries a different metric than the configuration
    #[error("Metric mismatch: configured {expected}, panel carries {actual}")]
    MetricMismatch {
        /// Configured metric
        expected: String,
        /// Panel metric
        actual: String,
    },

    /// An anchor already holds a row for this key
    #[error("Duplicate anchor row for {dimensions:?}, category {category}, month {month}")]
    DuplicateAnchorRow {
        /// Dimension values
        dimensions: Vec<String>,
        /// Category code
        category: CategoryCode,
        /// Month
        month: NaiveDate,
    },

    /// Tables with different layouts cannot be concatenated
    #[error("Incompatible tables: {0}")]
    IncompatibleTables(String),

    /// Panel error
    #[error("Panel error: {0}")]
    Panel(#[from] PanelError),

    /// Covariance error
    #[error("Covariance error: {0}")]
    Covariance(#[from] CovarianceError),

    /// Smoothing error
    #[error("Smoothing error: {0}")]
    Smoothing(#[from] SmoothingError),

    /// Polars error
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    /// CSV serialization error
    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
