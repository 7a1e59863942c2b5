//! Per-metric reconciliation settings

use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use strata_covariance::CorrelationMode;
use strata_smoothing::MetricTransform;

/// Closed interval smoothed values are clipped to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRange {
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
}

impl ClipRange {
    /// The unit interval, for proportions.
    pub const UNIT: Self = Self { min: 0.0, max: 1.0 };

    /// Clip `x`; NaN stays NaN.
    pub fn apply(&self, x: f64) -> f64 {
        x.clamp(self.min, self.max)
    }
}

impl Default for ClipRange {
    fn default() -> Self {
        Self::UNIT
    }
}

/// How one metric is reconciled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Metric column
    pub metric: String,
    /// Random-walk process noise standard deviation (default: 0.02)
    pub process_std: f64,
    /// Transform applied before smoothing (default: identity)
    pub transform: MetricTransform,
    /// Clip range for smoothed outputs (default: none)
    pub clip: Option<ClipRange>,
    /// Keep the forward-filter `_KF` outputs (default: false)
    pub retain_filtered: bool,
    /// Correlation variants to produce (default: independent and correlated)
    pub variants: Vec<CorrelationMode>,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            metric: String::new(),
            process_std: 0.02,
            transform: MetricTransform::Identity,
            clip: None,
            retain_filtered: false,
            variants: vec![CorrelationMode::Independent, CorrelationMode::Correlated],
        }
    }
}

impl MetricConfig {
    /// Default settings for `metric`.
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            ..Self::default()
        }
    }

    /// Settings for a proportion: logit transform and clipping to [0, 1].
    pub fn proportion(metric: impl Into<String>) -> Self {
        Self {
            transform: MetricTransform::logit(),
            clip: Some(ClipRange::UNIT),
            ..Self::new(metric)
        }
    }

    /// Set the process noise.
    pub const fn with_process_std(mut self, process_std: f64) -> Self {
        self.process_std = process_std;
        self
    }

    /// Set the transform.
    pub const fn with_transform(mut self, transform: MetricTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Set the clip range.
    pub const fn with_clip(mut self, clip: Option<ClipRange>) -> Self {
        self.clip = clip;
        self
    }

    /// Keep or drop `_KF` outputs.
    pub const fn with_filtered(mut self, retain: bool) -> Self {
        self.retain_filtered = retain;
        self
    }

    /// Set the correlation variants.
    pub fn with_variants(mut self, variants: Vec<CorrelationMode>) -> Self {
        self.variants = variants;
        self
    }

    /// Check the settings before a run.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| ReconcileError::InvalidConfig {
            metric: self.metric.clone(),
            reason,
        };

        if self.metric.is_empty() {
            return Err(invalid("metric name is empty".to_string()));
        }
        if !(self.process_std.is_finite() && self.process_std > 0.0) {
            return Err(invalid(format!(
                "process_std must be positive, got {}",
                self.process_std
            )));
        }
        if let Some(clip) = self.clip {
            if !(clip.min <= clip.max) {
                return Err(invalid(format!(
                    "clip range [{}, {}] is not ordered",
                    clip.min, clip.max
                )));
            }
        }
        if self.variants.is_empty() {
            return Err(invalid("at least one variant is required".to_string()));
        }
        for (i, mode) in self.variants.iter().enumerate() {
            if self.variants[..i].contains(mode) {
                return Err(invalid(format!("variant {} listed twice", mode.suffix())));
            }
        }
        self.transform.validate().map_err(invalid)
    }
}
