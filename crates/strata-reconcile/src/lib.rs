#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/strata/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod anchor;
pub mod config;
pub mod error;
pub mod output;
pub mod reconciler;
pub mod similarity;

pub use anchor::{AnchorRow, NationalAnchor};
pub use config::{ClipRange, MetricConfig};
pub use error::{ReconcileError, Result};
pub use output::{Estimate, ReconciledTable, SmoothedRecord, ValueColumn, VariantEstimates};
pub use reconciler::DeltaReconciler;
pub use similarity::{
    DEFAULT_SIMILARITY_THRESHOLD, GroupSimilarity, SimilarityReport, similarity_check,
};

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
