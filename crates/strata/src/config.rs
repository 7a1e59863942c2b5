//! Pipeline configuration, loaded from JSON.
//!
//! Every field has a default, so a configuration file only needs to list the
//! metrics to reconcile:
//!
//! ```json
//! {
//!   "metrics": [
//!     { "metric": "TOTALTHINK", "transform": { "kind": "logit" }, "clip": { "min": 0.0, "max": 1.0 } },
//!     { "metric": "AVG_SPEND", "process_std": 0.05 }
//!   ],
//!   "stratify_by": "CHANNEL"
//! }
//! ```

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use strata_covariance::CorrelationConfig;
use strata_panel::{ColumnMapping, CompletionConfig};
use strata_reconcile::MetricConfig;
use strata_smoothing::{PartitionLayout, ScalerKind, ScalerScope};

/// Partition scaling settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerSettings {
    /// Scaling function (default: standard)
    pub kind: ScalerKind,
    /// Per-category or pooled scalers (default: per category)
    pub scope: ScalerScope,
}

/// Full pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Input column names
    pub columns: ColumnMapping,
    /// Auxiliary column names inside partitions
    pub layout: PartitionLayout,
    /// Correlation matrix construction
    pub correlation: CorrelationConfig,
    /// Expand every series over every month before smoothing (default: off)
    pub completion: Option<CompletionConfig>,
    /// Standardize metric columns around the engine (default: off)
    pub scaler: Option<ScalerSettings>,
    /// Metrics to reconcile, in order
    pub metrics: Vec<MetricConfig>,
    /// Reconcile each value of this dimension separately (default: off)
    pub stratify_by: Option<String>,
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Settings for `metric`, if configured
    pub fn metric(&self, metric: &str) -> Option<&MetricConfig> {
        self.metrics.iter().find(|m| m.metric == metric)
    }

    /// Check the configuration before a run.
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "no metrics configured".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.metrics.len());
        for metric in &self.metrics {
            metric.validate()?;
            if !seen.insert(metric.metric.as_str()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "metric {} configured twice",
                    metric.metric
                )));
            }
        }

        if self.correlation.min_periods == 0 {
            return Err(PipelineError::InvalidConfig(
                "correlation.min_periods must be at least 1".to_string(),
            ));
        }

        if let Some(dimension) = &self.stratify_by {
            if !self.columns.dimensions.contains(dimension) {
                return Err(PipelineError::InvalidConfig(format!(
                    "stratify_by {dimension} is not one of the dimensions {:?}",
                    self.columns.dimensions
                )));
            }
        }

        Ok(())
    }
}
