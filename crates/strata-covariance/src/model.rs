//! Process and measurement covariance for a vector random walk
//!
//! Each category in a partition follows a random walk observed through
//! survey noise:
//!
//! x_t = x_{t-1} + w_t,   w_t ~ N(0, Q)
//! z_t = x_t + v_t,       v_t ~ N(0, R_t)
//!
//! Q couples categories through the squared correlation matrix; R_t is
//! diagonal with binomial-proportion sampling variance.

use crate::CovarianceError;
use crate::matrix::CorrelationMatrix;
use ndarray::{Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_panel::CategoryCode;

/// Floor added to sample counts and variances in the standard error
pub const MEASUREMENT_EPSILON: f64 = 1e-8;

/// Whether the process noise carries cross-category correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// Off-diagonal process covariance from the R² matrix
    #[default]
    Correlated,
    /// Off-diagonal process covariance zeroed
    Independent,
}

impl CorrelationMode {
    /// Suffix used in output column names (`CORR` / `NO_CORR`)
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Correlated => "CORR",
            Self::Independent => "NO_CORR",
        }
    }
}

/// Binomial-proportion standard error with small-sample inflation.
///
/// se = sqrt(|z(1-z) + ε| / (n+ε)) + sqrt(0.25 / (n+ε))
///
/// NaN inputs count as 0 and negative counts are floored at 0, so the result is
/// strictly positive and finite for any finite input.
pub fn measurement_standard_error(z: f64, n: f64) -> f64 {
    let z = if z.is_nan() { 0.0 } else { z };
    let n = if n.is_nan() { 0.0 } else { n.max(0.0) };
    let n_eps = n + MEASUREMENT_EPSILON;

    ((z * (1.0 - z) + MEASUREMENT_EPSILON).abs() / n_eps).sqrt() + (0.25 / n_eps).sqrt()
}

/// Covariance model handed to the smoothing engine for one metric
#[derive(Debug, Clone)]
pub struct CovarianceModel {
    correlation: Option<Arc<CorrelationMatrix>>,
    process_std: f64,
    mode: CorrelationMode,
}

impl CovarianceModel {
    /// Correlation-aware model: Q = process_std² · R²
    pub fn correlated(
        correlation: Arc<CorrelationMatrix>,
        process_std: f64,
    ) -> Result<Self, CovarianceError> {
        validate_process_std(process_std)?;
        Ok(Self {
            correlation: Some(correlation),
            process_std,
            mode: CorrelationMode::Correlated,
        })
    }

    /// Independence model: Q = process_std² · I
    pub fn independent(process_std: f64) -> Result<Self, CovarianceError> {
        validate_process_std(process_std)?;
        Ok(Self {
            correlation: None,
            process_std,
            mode: CorrelationMode::Independent,
        })
    }

    /// Build the model for `mode`, sharing `correlation` when it is needed.
    pub fn for_mode(
        mode: CorrelationMode,
        correlation: &Arc<CorrelationMatrix>,
        process_std: f64,
    ) -> Result<Self, CovarianceError> {
        match mode {
            CorrelationMode::Correlated => Self::correlated(Arc::clone(correlation), process_std),
            CorrelationMode::Independent => Self::independent(process_std),
        }
    }

    /// Process noise standard deviation
    pub const fn process_std(&self) -> f64 {
        self.process_std
    }

    /// Correlation mode
    pub const fn mode(&self) -> CorrelationMode {
        self.mode
    }

    /// Process covariance for the partition's categories, in their order.
    pub fn process_covariance(&self, categories: &[CategoryCode]) -> Array2<f64> {
        let variance = self.process_std * self.process_std;
        match (&self.correlation, self.mode) {
            (Some(correlation), CorrelationMode::Correlated) => {
                correlation.slice(categories) * variance
            }
            _ => Array2::eye(categories.len()) * variance,
        }
    }

    /// Per-step measurement variances (time × category), `se²`.
    pub fn measurement_variances(
        &self,
        values: ArrayView2<'_, f64>,
        counts: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, CovarianceError> {
        if values.dim() != counts.dim() {
            return Err(CovarianceError::DimensionMismatch {
                expected: values.len(),
                actual: counts.len(),
            });
        }

        let mut variances = Array2::<f64>::zeros(values.dim());
        ndarray::Zip::from(&mut variances)
            .and(&values)
            .and(&counts)
            .for_each(|out, &z, &n| {
                let se = measurement_standard_error(z, n);
                *out = se * se;
            });
        Ok(variances)
    }

    /// Per-step diagonal measurement covariance, shaped (time, category, category).
    pub fn measurement_covariance(
        &self,
        values: ArrayView2<'_, f64>,
        counts: ArrayView2<'_, f64>,
    ) -> Result<Array3<f64>, CovarianceError> {
        let variances = self.measurement_variances(values, counts)?;
        let (steps, categories) = variances.dim();

        let mut covariance = Array3::<f64>::zeros((steps, categories, categories));
        for t in 0..steps {
            for c in 0..categories {
                covariance[[t, c, c]] = variances[[t, c]];
            }
        }
        Ok(covariance)
    }
}

fn validate_process_std(process_std: f64) -> Result<(), CovarianceError> {
    if process_std.is_finite() && process_std >= 0.0 {
        Ok(())
    } else {
        Err(CovarianceError::InvalidParameter(format!(
            "process_std must be finite and non-negative, got {process_std}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn correlation() -> Arc<CorrelationMatrix> {
        Arc::new(
            CorrelationMatrix::new(
                vec![10, 20, 30],
                array![[1.0, 0.5, 0.1], [0.5, 1.0, 0.0], [0.1, 0.0, 1.0]],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_correlated_process_covariance() {
        let model = CovarianceModel::correlated(correlation(), 0.02).unwrap();
        let q = model.process_covariance(&[30, 10]);

        assert_relative_eq!(q[[0, 0]], 0.0004, epsilon = 1e-15);
        assert_relative_eq!(q[[1, 1]], 0.0004, epsilon = 1e-15);
        assert_relative_eq!(q[[0, 1]], 0.0004 * 0.1, epsilon = 1e-15);
        assert_relative_eq!(q[[1, 0]], 0.0004 * 0.1, epsilon = 1e-15);
    }

    #[test]
    fn test_independent_process_covariance() {
        let model =
            CovarianceModel::for_mode(CorrelationMode::Independent, &correlation(), 0.03).unwrap();
        let q = model.process_covariance(&[10, 20]);
        assert_relative_eq!(q[[0, 0]], 0.0009, epsilon = 1e-15);
        assert_eq!(q[[0, 1]], 0.0);
        assert_eq!(model.mode().suffix(), "NO_CORR");
    }

    #[test]
    fn test_invalid_process_std() {
        assert!(CovarianceModel::independent(-0.1).is_err());
        assert!(CovarianceModel::independent(f64::NAN).is_err());
        assert!(CovarianceModel::independent(0.0).is_ok());
    }

    #[test]
    fn test_standard_error_zero_count_is_large_and_finite() {
        let se = measurement_standard_error(0.5, 0.0);
        assert!(se.is_finite());
        // Governed by sqrt(0.25/ε) = 5000
        assert!(se > 5000.0);
    }

    #[test]
    fn test_standard_error_handles_nan() {
        assert_eq!(
            measurement_standard_error(f64::NAN, f64::NAN),
            measurement_standard_error(0.0, 0.0)
        );
    }

    #[test]
    fn test_standard_error_known_value() {
        // z = 0.2, n = 100 -> sqrt(0.16/100) + sqrt(0.25/100) = 0.04 + 0.05
        assert_relative_eq!(measurement_standard_error(0.2, 100.0), 0.09, epsilon = 1e-8);
    }

    #[test]
    fn test_measurement_covariance_is_diagonal() {
        let model = CovarianceModel::independent(0.02).unwrap();
        let values = array![[0.2, f64::NAN], [0.5, 0.1]];
        let counts = array![[100.0, 0.0], [50.0, f64::NAN]];
        let r = model.measurement_covariance(values.view(), counts.view()).unwrap();

        assert_eq!(r.dim(), (2, 2, 2));
        assert_relative_eq!(r[[0, 0, 0]], 0.09 * 0.09, epsilon = 1e-10);
        assert_eq!(r[[0, 0, 1]], 0.0);
        assert_eq!(r[[1, 1, 0]], 0.0);
        assert!(r[[0, 1, 1]] > 1e6);
    }

    #[test]
    fn test_measurement_shape_mismatch() {
        let model = CovarianceModel::independent(0.02).unwrap();
        let values = Array2::<f64>::zeros((3, 2));
        let counts = Array2::<f64>::zeros((2, 2));
        assert!(model.measurement_variances(values.view(), counts.view()).is_err());
    }
}
