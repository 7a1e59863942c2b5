//! Smoothing model contract
//!
//! A model names the metric to smooth, where its sample sizes live and how its
//! output columns are prefixed, and supplies the process and measurement
//! covariance the engine needs for a partition.

use crate::error::Result;
use crate::partition::Partition;
use derive_more::Display;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strata_covariance::{CorrelationMode, CovarianceModel};

/// Which engine output a column holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum OutputKind {
    /// Forward filter estimate (`_KF`)
    #[display("KF")]
    Filtered,
    /// Rauch–Tung–Striebel smoothed estimate (`_RTS`)
    #[display("RTS")]
    Smoothed,
}

impl OutputKind {
    /// Column suffix
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Filtered => "KF",
            Self::Smoothed => "RTS",
        }
    }
}

/// Prefix for a metric smoothed under `mode`: `<METRIC>_CORR` or `<METRIC>_NO_CORR`.
pub fn variant_prefix(metric: &str, mode: CorrelationMode) -> String {
    format!("{metric}_{}", mode.suffix())
}

/// Output column name: `<prefix>_KF` or `<prefix>_RTS`.
pub fn output_column(prefix: &str, kind: OutputKind) -> String {
    format!("{prefix}_{}", kind.suffix())
}

/// A metric the smoothing engine can process
pub trait SmoothingModel: fmt::Debug + Send + Sync {
    /// Column holding the metric
    fn metric_col(&self) -> &str;

    /// Prefix of the output columns
    fn output_col_prefix(&self) -> &str;

    /// Column holding sample sizes
    fn sample_size_col(&self) -> &str;

    /// Random-walk process noise standard deviation
    fn process_std(&self) -> f64;

    /// Process covariance for the partition's categories (`C × C`).
    fn process_covariance(&self, partition: &Partition) -> Result<Array2<f64>>;

    /// Measurement covariance per time step (`T × C × C`).
    fn measurement_covariance(&self, partition: &Partition) -> Result<Array3<f64>>;

    /// Columns the engine adds for this model: `[<prefix>_KF, <prefix>_RTS]`.
    fn output_cols(&self) -> [String; 2] {
        [
            output_column(self.output_col_prefix(), OutputKind::Filtered),
            output_column(self.output_col_prefix(), OutputKind::Smoothed),
        ]
    }
}

/// Shared handle to a model
pub type SharedModel = Arc<dyn SmoothingModel>;

/// Standard model: random walk with covariance from a [`CovarianceModel`]
#[derive(Debug, Clone)]
pub struct KfModel {
    metric_col: String,
    output_col_prefix: String,
    sample_size_col: String,
    covariance: CovarianceModel,
}

impl KfModel {
    /// Create a model whose output prefix follows the covariance mode
    /// (`<metric>_CORR` / `<metric>_NO_CORR`).
    pub fn new(
        metric_col: impl Into<String>,
        sample_size_col: impl Into<String>,
        covariance: CovarianceModel,
    ) -> Self {
        let metric_col = metric_col.into();
        Self {
            output_col_prefix: variant_prefix(&metric_col, covariance.mode()),
            metric_col,
            sample_size_col: sample_size_col.into(),
            covariance,
        }
    }

    /// Override the output prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_col_prefix = prefix.into();
        self
    }

    /// Underlying covariance model
    pub const fn covariance(&self) -> &CovarianceModel {
        &self.covariance
    }

    /// Correlation mode of the covariance model
    pub const fn mode(&self) -> CorrelationMode {
        self.covariance.mode()
    }
}

impl SmoothingModel for KfModel {
    fn metric_col(&self) -> &str {
        &self.metric_col
    }

    fn output_col_prefix(&self) -> &str {
        &self.output_col_prefix
    }

    fn sample_size_col(&self) -> &str {
        &self.sample_size_col
    }

    fn process_std(&self) -> f64 {
        self.covariance.process_std()
    }

    fn process_covariance(&self, partition: &Partition) -> Result<Array2<f64>> {
        Ok(self.covariance.process_covariance(partition.categories()))
    }

    fn measurement_covariance(&self, partition: &Partition) -> Result<Array3<f64>> {
        let values = partition.column(&self.metric_col)?;
        let counts = partition.column(&self.sample_size_col)?;
        Ok(self
            .covariance
            .measurement_covariance(values.view(), counts.view())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionKey;
    use chrono::NaiveDate;
    use ndarray::array;
    use strata_panel::CutId;

    fn partition() -> Partition {
        let mut p = Partition::new(
            PartitionKey {
                cut: CutId::NATIONAL,
                dimensions: vec![],
            },
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            ],
            vec![1, 2],
        );
        p.insert_column("SPEND", array![[0.2, 0.4], [0.3, f64::NAN]])
            .unwrap();
        p.insert_column("ASK_COUNT", array![[100.0, 50.0], [80.0, 0.0]])
            .unwrap();
        p
    }

    #[test]
    fn test_prefix_follows_mode() {
        let model = KfModel::new(
            "SPEND",
            "ASK_COUNT",
            CovarianceModel::independent(0.02).unwrap(),
        );
        assert_eq!(model.output_col_prefix(), "SPEND_NO_CORR");
        assert_eq!(
            model.output_cols(),
            ["SPEND_NO_CORR_KF".to_string(), "SPEND_NO_CORR_RTS".to_string()]
        );
    }

    #[test]
    fn test_output_kind_display_matches_suffix() {
        for kind in [OutputKind::Filtered, OutputKind::Smoothed] {
            assert_eq!(kind.to_string(), kind.suffix());
        }
    }

    #[test]
    fn test_with_prefix() {
        let model = KfModel::new(
            "SPEND",
            "ASK_COUNT",
            CovarianceModel::independent(0.02).unwrap(),
        )
        .with_prefix("SPEND_ALT");
        assert_eq!(model.output_cols()[1], "SPEND_ALT_RTS");
    }

    #[test]
    fn test_covariances_follow_partition_shape() {
        let model = KfModel::new(
            "SPEND",
            "ASK_COUNT",
            CovarianceModel::independent(0.02).unwrap(),
        );
        let p = partition();
        assert_eq!(model.process_covariance(&p).unwrap().dim(), (2, 2));
        let r = model.measurement_covariance(&p).unwrap();
        assert_eq!(r.dim(), (2, 2, 2));
        assert!(r[[1, 1, 1]] > r[[0, 0, 0]]);
    }

    #[test]
    fn test_missing_sample_column_is_error() {
        let model = KfModel::new(
            "SPEND",
            "RESPONDENTS",
            CovarianceModel::independent(0.02).unwrap(),
        );
        assert!(model.measurement_covariance(&partition()).is_err());
    }
}
