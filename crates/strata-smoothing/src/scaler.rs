//! Per-partition standardization of metric columns
//!
//! [`PartitionScaler`] fits a scaler on each metric column when a partition
//! starts and inverts it on the metric and on every derived output column when
//! the partition ends. Fits are cached by partition identity between the two
//! calls and dropped afterwards.

use crate::error::{Result, SmoothingError};
use crate::hooks::PartitionHook;
use crate::model::SharedModel;
use crate::partition::{Partition, PartitionKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use strata_panel::CategoryCode;
use tracing::{debug, warn};

/// Scaling applied to a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    /// Zero mean, unit variance
    #[default]
    Standard,
    /// `asinh` followed by standardization, for heavy-tailed metrics such as spend
    AsinhStandard,
}

/// Granularity of the fitted scalers inside a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerScope {
    /// One scaler per (metric, category) column
    #[default]
    PerCategory,
    /// One scaler per metric, pooled over the partition's categories
    Pooled,
}

/// Column identity a scaler is keyed by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnKey {
    /// Metric column
    pub column: String,
    /// Category, for per-category scalers
    pub category: Option<CategoryCode>,
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            Some(category) => write!(f, "{}[{category}]", self.column),
            None => f.write_str(&self.column),
        }
    }
}

/// Fitted location and scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedScaler {
    kind: ScalerKind,
    mean: f64,
    scale: f64,
}

impl FittedScaler {
    /// Fit on the finite values of `values`. A constant or empty column gets scale 1.
    pub fn fit<I>(kind: ScalerKind, values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let pre: Vec<f64> = values
            .into_iter()
            .filter(|v| v.is_finite())
            .map(|v| pre_transform(kind, v))
            .collect();

        if pre.is_empty() {
            return Self {
                kind,
                mean: 0.0,
                scale: 1.0,
            };
        }

        let n = pre.len() as f64;
        let mean = pre.iter().sum::<f64>() / n;
        let variance = pre.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();
        let scale = if std > 0.0 && std.is_finite() { std } else { 1.0 };

        Self { kind, mean, scale }
    }

    /// Fitted mean (after the pre-transform)
    pub const fn mean(&self) -> f64 {
        self.mean
    }

    /// Fitted scale (after the pre-transform)
    pub const fn scale(&self) -> f64 {
        self.scale
    }

    /// Scale one value. NaN passes through.
    pub fn transform(&self, x: f64) -> f64 {
        (pre_transform(self.kind, x) - self.mean) / self.scale
    }

    /// Undo [`Self::transform`].
    pub fn inverse(&self, y: f64) -> f64 {
        let z = y * self.scale + self.mean;
        match self.kind {
            ScalerKind::Standard => z,
            ScalerKind::AsinhStandard => z.sinh(),
        }
    }
}

fn pre_transform(kind: ScalerKind, x: f64) -> f64 {
    match kind {
        ScalerKind::Standard => x,
        ScalerKind::AsinhStandard => x.asinh(),
    }
}

type PartitionScalers = HashMap<ColumnKey, FittedScaler>;

/// Hook that standardizes metric columns per partition and restores them afterwards
#[derive(Debug, Default)]
pub struct PartitionScaler {
    kind: ScalerKind,
    scope: ScalerScope,
    fitted: Mutex<HashMap<PartitionKey, PartitionScalers>>,
}

impl PartitionScaler {
    /// Create a scaler hook.
    pub fn new(kind: ScalerKind, scope: ScalerScope) -> Self {
        Self {
            kind,
            scope,
            fitted: Mutex::new(HashMap::new()),
        }
    }

    /// Scaler kind
    pub const fn kind(&self) -> ScalerKind {
        self.kind
    }

    /// Scaler scope
    pub const fn scope(&self) -> ScalerScope {
        self.scope
    }

    /// Partitions started but not yet ended
    pub fn pending_partitions(&self) -> Result<usize> {
        Ok(self
            .fitted
            .lock()
            .map_err(|_| SmoothingError::LockPoisoned)?
            .len())
    }

    fn column_key(&self, column: &str, category: CategoryCode) -> ColumnKey {
        ColumnKey {
            column: column.to_string(),
            category: match self.scope {
                ScalerScope::PerCategory => Some(category),
                ScalerScope::Pooled => None,
            },
        }
    }
}

impl PartitionHook for PartitionScaler {
    fn on_partition_start(&self, models: &[SharedModel], partition: &mut Partition) -> Result<()> {
        let metrics: BTreeSet<&str> = models.iter().map(|m| m.metric_col()).collect();
        let categories = partition.categories().to_vec();
        let mut scalers = PartitionScalers::new();

        for metric in metrics {
            let values = partition.column_mut(metric)?;
            match self.scope {
                ScalerScope::PerCategory => {
                    for (c, mut cells) in values.columns_mut().into_iter().enumerate() {
                        let scaler = FittedScaler::fit(self.kind, cells.iter().copied());
                        cells.mapv_inplace(|x| scaler.transform(x));
                        scalers.insert(self.column_key(metric, categories[c]), scaler);
                    }
                }
                ScalerScope::Pooled => {
                    let scaler = FittedScaler::fit(self.kind, values.iter().copied());
                    values.mapv_inplace(|x| scaler.transform(x));
                    scalers.insert(
                        ColumnKey {
                            column: metric.to_string(),
                            category: None,
                        },
                        scaler,
                    );
                }
            }
        }

        debug!(partition = %partition.key(), scalers = scalers.len(), "fitted partition scalers");
        let previous = self
            .fitted
            .lock()
            .map_err(|_| SmoothingError::LockPoisoned)?
            .insert(partition.key().clone(), scalers);
        if previous.is_some() {
            warn!(partition = %partition.key(), "partition started twice, replacing fitted scalers");
        }
        Ok(())
    }

    fn on_partition_end(&self, models: &[SharedModel], partition: &mut Partition) -> Result<()> {
        let partition_name = partition.key().to_string();
        let scalers = self
            .fitted
            .lock()
            .map_err(|_| SmoothingError::LockPoisoned)?
            .remove(partition.key())
            .ok_or_else(|| SmoothingError::ScalerNotFitted {
                partition: partition_name.clone(),
                column: models
                    .first()
                    .map(|m| m.metric_col().to_string())
                    .unwrap_or_default(),
            })?;

        let categories = partition.categories().to_vec();
        let mut inverted: HashSet<String> = HashSet::new();

        for model in models {
            let metric = model.metric_col();
            let [filtered, smoothed] = model.output_cols();
            for column in [metric.to_string(), filtered, smoothed] {
                if inverted.contains(&column) {
                    continue;
                }

                let values = partition.column_mut(&column)?;
                for (c, mut cells) in values.columns_mut().into_iter().enumerate() {
                    // derived columns reuse the metric's scaler for the same category
                    let key = self.column_key(metric, categories[c]);
                    let scaler =
                        scalers
                            .get(&key)
                            .ok_or_else(|| SmoothingError::ScalerNotFitted {
                                partition: partition_name.clone(),
                                column: key.to_string(),
                            })?;
                    cells.mapv_inplace(|y| scaler.inverse(y));
                }
                inverted.insert(column);
            }
        }

        debug!(partition = %partition_name, columns = inverted.len(), "inverted partition scalers");
        Ok(())
    }

    fn on_partition_error(&self, _models: &[SharedModel], partition: &Partition) {
        match self.fitted.lock() {
            Ok(mut fitted) => {
                if fitted.remove(partition.key()).is_some() {
                    debug!(partition = %partition.key(), "dropped scalers of failed partition");
                }
            }
            Err(_) => warn!(partition = %partition.key(), "scaler cache lock poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::KfModel;
    use crate::partition::PartitionKey;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use ndarray::array;
    use std::sync::Arc;
    use strata_covariance::CovarianceModel;
    use strata_panel::CutId;

    fn partition() -> Partition {
        let mut p = Partition::new(
            PartitionKey {
                cut: CutId::new(10010),
                dimensions: vec!["ECOM".to_string()],
            },
            (1..=3)
                .map(|m| NaiveDate::from_ymd_opt(2024, m, 1).unwrap())
                .collect(),
            vec![7, 9],
        );
        p.insert_column("SPEND", array![[10.0, 100.0], [20.0, f64::NAN], [30.0, 300.0]])
            .unwrap();
        p.insert_column("ASK_COUNT", array![[5.0, 5.0], [5.0, 0.0], [5.0, 5.0]])
            .unwrap();
        p
    }

    fn models() -> Vec<SharedModel> {
        vec![Arc::new(KfModel::new(
            "SPEND",
            "ASK_COUNT",
            CovarianceModel::independent(0.02).unwrap(),
        ))]
    }

    #[test]
    fn test_fit_matches_population_std() {
        let scaler = FittedScaler::fit(ScalerKind::Standard, [1.0, 2.0, 3.0, f64::NAN]);
        assert_relative_eq!(scaler.mean(), 2.0);
        assert_relative_eq!(scaler.scale(), (2.0f64 / 3.0).sqrt());
        assert!(scaler.transform(f64::NAN).is_nan());
    }

    #[test]
    fn test_constant_column_has_unit_scale() {
        let scaler = FittedScaler::fit(ScalerKind::Standard, [4.0, 4.0]);
        assert_eq!(scaler.scale(), 1.0);
        assert_eq!(scaler.transform(4.0), 0.0);
    }

    #[test]
    fn test_asinh_round_trip() {
        let scaler = FittedScaler::fit(ScalerKind::AsinhStandard, [0.0, 15.0, 1200.0]);
        for x in [0.0, 15.0, 1200.0, -3.0] {
            assert_relative_eq!(scaler.inverse(scaler.transform(x)), x, max_relative = 1e-10);
        }
    }

    #[test]
    fn test_start_standardizes_each_category() {
        let scaler = PartitionScaler::default();
        let mut p = partition();
        scaler.on_partition_start(&models(), &mut p).unwrap();

        let spend = p.column("SPEND").unwrap();
        assert_relative_eq!(spend[[1, 0]], 0.0, epsilon = 1e-12);
        assert_relative_eq!(spend[[0, 1]], -1.0, epsilon = 1e-12);
        assert!(spend[[1, 1]].is_nan());
        // counts are untouched
        assert_eq!(p.column("ASK_COUNT").unwrap()[[0, 0]], 5.0);
        assert_eq!(scaler.pending_partitions().unwrap(), 1);
    }

    #[test]
    fn test_end_without_start_is_fatal() {
        let scaler = PartitionScaler::default();
        let mut p = partition();
        let err = scaler.on_partition_end(&models(), &mut p).unwrap_err();
        assert!(matches!(err, SmoothingError::ScalerNotFitted { .. }));
        assert!(err.to_string().contains("10010"));
    }

    #[test]
    fn test_pooled_scope_uses_one_scaler() {
        let scaler = PartitionScaler::new(ScalerKind::Standard, ScalerScope::Pooled);
        let mut p = partition();
        scaler.on_partition_start(&models(), &mut p).unwrap();

        let spend = p.column("SPEND").unwrap();
        let finite: Vec<f64> = spend.iter().copied().filter(|v| v.is_finite()).collect();
        let mean = finite.iter().sum::<f64>() / finite.len() as f64;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-12);
    }
}
