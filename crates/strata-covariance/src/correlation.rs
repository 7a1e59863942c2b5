//! Cross-category correlation from historical survey series
//!
//! The national panel is pivoted so that each category becomes a column and
//! each (dimensions, month) combination a row. Pairwise Pearson correlations
//! are computed on jointly observed rows, repaired to a valid correlation
//! matrix and squared, so that the entries read as variance explained (R²)
//! when they scale the process covariance.

use crate::CovarianceError;
use crate::matrix::CorrelationMatrix;
use crate::repair::{RepairConfig, repair_correlation};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strata_panel::{CategoryCode, ObservationPanel};
use tracing::{debug, info};

/// Correlation builder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Minimum jointly observed rows for a pair; sparser pairs get 0 (default: 12)
    pub min_periods: usize,
    /// Apply the eigenvalue-clipping repair (default: true).
    /// Only disable for diagnostics.
    pub ensure_positive_definite: bool,
    /// Square every entry after repair (default: true)
    pub square: bool,
    /// Repair settings
    pub repair: RepairConfig,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            min_periods: 12,
            ensure_positive_definite: true,
            square: true,
            repair: RepairConfig::default(),
        }
    }
}

/// Wide view of the panel: one column per category, NaN where unobserved
#[derive(Debug, Clone)]
pub struct PivotTable {
    /// Column categories, ascending
    pub categories: Vec<CategoryCode>,
    /// Rows × categories
    pub values: Array2<f64>,
}

/// Builds repaired correlation matrices from the national panel
#[derive(Debug, Default)]
pub struct CorrelationMatrixBuilder {
    config: CorrelationConfig,
}

impl CorrelationMatrixBuilder {
    /// Create a builder with the given configuration
    pub fn new(config: CorrelationConfig) -> Result<Self, CovarianceError> {
        if config.min_periods == 0 {
            return Err(CovarianceError::InvalidParameter(
                "min_periods must be at least 1".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// Builder configuration
    pub const fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Pivot the national rows of `panel` to (dimensions, month) × category.
    pub fn pivot(&self, panel: &ObservationPanel) -> PivotTable {
        let national = panel.national();
        let categories = national.categories();
        let column: BTreeMap<CategoryCode, usize> =
            categories.iter().enumerate().map(|(i, &c)| (c, i)).collect();

        let rows: BTreeSet<_> = national
            .observations()
            .iter()
            .map(|o| (o.dimensions.clone(), o.month))
            .collect();
        let row: BTreeMap<_, usize> = rows.into_iter().enumerate().map(|(i, k)| (k, i)).collect();

        let mut values = Array2::<f64>::from_elem((row.len(), categories.len()), f64::NAN);
        for obs in national.observations() {
            let r = row[&(obs.dimensions.clone(), obs.month)];
            values[[r, column[&obs.category]]] = obs.value;
        }

        PivotTable { categories, values }
    }

    /// Pairwise Pearson correlation over jointly finite rows.
    ///
    /// Pairs with fewer than `min_periods` joint rows, or with no variance on the
    /// joint support, are 0. The diagonal is exactly 1.
    pub fn pearson(&self, pivot: &PivotTable) -> Array2<f64> {
        let (n_rows, n_cols) = pivot.values.dim();
        let mut corr = Array2::<f64>::eye(n_cols);
        let mut sparse_pairs = 0usize;

        for i in 0..n_cols {
            for j in (i + 1)..n_cols {
                let pairs: Vec<(f64, f64)> = (0..n_rows)
                    .map(|r| (pivot.values[[r, i]], pivot.values[[r, j]]))
                    .filter(|(x, y)| x.is_finite() && y.is_finite())
                    .collect();

                let r = if pairs.len() < self.config.min_periods.max(2) {
                    sparse_pairs += 1;
                    0.0
                } else {
                    pearson_pair(&pairs)
                };
                corr[[i, j]] = r;
                corr[[j, i]] = r;
            }
        }

        debug!(
            categories = n_cols,
            rows = n_rows,
            sparse_pairs,
            "computed pairwise correlations"
        );
        corr
    }

    /// Build the repaired (and, by default, squared) correlation matrix.
    pub fn build(&self, panel: &ObservationPanel) -> Result<CorrelationMatrix, CovarianceError> {
        let pivot = self.pivot(panel);
        if pivot.categories.is_empty() {
            return Err(CovarianceError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }

        let mut corr = self.pearson(&pivot);
        if self.config.ensure_positive_definite {
            corr = repair_correlation(&corr, &self.config.repair)?;
        }
        if self.config.square {
            corr.mapv_inplace(|r| r * r);
        }

        info!(
            metric = panel.metric(),
            categories = pivot.categories.len(),
            rows = pivot.values.nrows(),
            "built correlation matrix"
        );
        CorrelationMatrix::new(pivot.categories, corr)
    }
}

fn pearson_pair(pairs: &[(f64, f64)]) -> f64 {
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for &(x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let denom = (sxx * syy).sqrt();
    if denom > 0.0 && denom.is_finite() {
        (sxy / denom).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
