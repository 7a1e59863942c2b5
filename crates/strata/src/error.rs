//! Pipeline errors.

use strata_covariance::CovarianceError;
use strata_panel::PanelError;
use strata_reconcile::ReconcileError;
use strata_smoothing::SmoothingError;
use thiserror::Error;

/// Result type for the pipeline layer.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while configuring or running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Pipeline configuration is invalid
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// Input table is malformed
    #[error("Invalid table: {0}")]
    InvalidTable(String),

    /// Panel error
    #[error("Panel error: {0}")]
    Panel(#[from] PanelError),

    /// Covariance error
    #[error("Covariance error: {0}")]
    Covariance(#[from] CovarianceError),

    /// Smoothing error
    #[error("Smoothing error: {0}")]
    Smoothing(#[from] SmoothingError),

    /// Reconciliation error
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Polars error
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
