//! Error types for panel operations.

use thiserror::Error;

/// Result type for panel operations.
pub type Result<T> = std::result::Result<T, PanelError>;

/// Errors that can occur while building or converting observation panels.
#[derive(Debug, Error)]
pub enum PanelError {
    /// Two observations share the same (cut, dimensions, category, month) key
    #[error("Duplicate observation for cut {cut}, dimensions {dimensions:?}, category {category}, month {month}")]
    DuplicateKey {
        /// Cut identifier of the duplicated key
        cut: i64,
        /// Dimension values of the duplicated key
        dimensions: Vec<String>,
        /// Category code of the duplicated key
        category: i64,
        /// Month of the duplicated key
        month: String,
    },

    /// An observation carries a different number of dimension values than the panel
    #[error("Dimension mismatch: panel declares {expected} dimensions, observation has {actual}")]
    DimensionMismatch {
        /// Number of dimensions declared by the panel
        expected: usize,
        /// Number of dimension values on the observation
        actual: usize,
    },

    /// A requested dimension is not part of the panel
    #[error("Unknown dimension: {0}")]
    UnknownDimension(String),

    /// A required column is absent or holds a null
    #[error("Missing value in column {column} at row {row}")]
    MissingValue {
        /// Column name
        column: String,
        /// Zero-based row index
        row: usize,
    },

    /// A month could not be parsed
    #[error("Invalid month {value:?}: {reason}")]
    InvalidMonth {
        /// The raw value
        value: String,
        /// Parser message
        reason: String,
    },

    /// Polars error
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}
