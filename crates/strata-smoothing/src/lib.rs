#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/strata/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod hooks;
pub mod kalman;
mod linalg;
pub mod model;
pub mod partition;
pub mod runner;
pub mod scaler;
pub mod transform;

pub use error::{Result, SmoothingError};
pub use hooks::{PartitionHook, ProgressHook};
pub use kalman::{KalmanOutput, KalmanSmoother, SmoothingEngine};
pub use model::{
    KfModel, OutputKind, SharedModel, SmoothingModel, output_column, variant_prefix,
};
pub use partition::{Partition, PartitionKey, PartitionLayout};
pub use runner::Runner;
pub use scaler::{ColumnKey, FittedScaler, PartitionScaler, ScalerKind, ScalerScope};
pub use transform::{LOGIT_MAX, LOGIT_MIN, MetricTransform, inv_logit, logit};

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
