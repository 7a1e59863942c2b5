#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/strata/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod pipeline;
pub mod table;

// Re-export the workspace crates
pub use strata_covariance as covariance;
pub use strata_panel as panel;
pub use strata_reconcile as reconcile;
pub use strata_smoothing as smoothing;

pub use config::{PipelineConfig, ScalerSettings};
pub use error::{PipelineError, Result};
pub use pipeline::Pipeline;

// Common types
pub use strata_covariance::{CorrelationConfig, CorrelationMatrix, CorrelationMode};
pub use strata_panel::{ColumnMapping, CutId, Observation, ObservationPanel};
pub use strata_reconcile::{
    DeltaReconciler, MetricConfig, NationalAnchor, ReconciledTable, SimilarityReport,
    similarity_check,
};
pub use strata_smoothing::{KalmanSmoother, MetricTransform, ProgressHook};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
