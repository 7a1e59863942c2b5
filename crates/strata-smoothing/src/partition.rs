//! Partitions: the unit of work of the smoothing engine
//!
//! A partition fixes every identifying level except the category axis. Inside
//! it each column is a dense `month × category` matrix; cells with no
//! observation hold NaN.

use crate::error::{Result, SmoothingError};
use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strata_panel::{CategoryCode, CutId, ObservationPanel};
use tracing::debug;

/// Identity of a partition: cut and dimension values, without the category
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    /// Cut identifier
    pub cut: CutId,
    /// Dimension values, in panel order
    pub dimensions: Vec<String>,
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.cut)?;
        for dim in &self.dimensions {
            write!(f, ", {dim}")?;
        }
        write!(f, ")")
    }
}

/// Names of the auxiliary columns carried next to the metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionLayout {
    /// Column holding sample counts (default: `ASK_COUNT`)
    pub sample_count_col: String,
    /// Column holding sample weights (default: `ASK_WEIGHT`)
    pub sample_weight_col: String,
}

impl Default for PartitionLayout {
    fn default() -> Self {
        Self {
            sample_count_col: "ASK_COUNT".to_string(),
            sample_weight_col: "ASK_WEIGHT".to_string(),
        }
    }
}

/// One partition laid out as `month × category` matrices
#[derive(Debug, Clone)]
pub struct Partition {
    key: PartitionKey,
    months: Vec<NaiveDate>,
    categories: Vec<CategoryCode>,
    columns: BTreeMap<String, Array2<f64>>,
}

impl Partition {
    /// Create an empty partition over the given axes.
    pub fn new(key: PartitionKey, months: Vec<NaiveDate>, categories: Vec<CategoryCode>) -> Self {
        Self {
            key,
            months,
            categories,
            columns: BTreeMap::new(),
        }
    }

    /// Split a panel into partitions, one per (cut, dimensions).
    ///
    /// Each partition carries the panel's metric column plus the sample count and
    /// weight columns named by `layout`. Months and categories are those observed
    /// inside the partition, ascending.
    pub fn split_panel(panel: &ObservationPanel, layout: &PartitionLayout) -> Vec<Self> {
        let mut grouped: BTreeMap<PartitionKey, Vec<usize>> = BTreeMap::new();
        for (idx, obs) in panel.observations().iter().enumerate() {
            grouped
                .entry(PartitionKey {
                    cut: obs.cut,
                    dimensions: obs.dimensions.clone(),
                })
                .or_default()
                .push(idx);
        }

        let observations = panel.observations();
        let partitions: Vec<Self> = grouped
            .into_iter()
            .map(|(key, rows)| {
                let mut months: Vec<NaiveDate> = rows.iter().map(|&r| observations[r].month).collect();
                months.sort_unstable();
                months.dedup();
                let mut categories: Vec<CategoryCode> =
                    rows.iter().map(|&r| observations[r].category).collect();
                categories.sort_unstable();
                categories.dedup();

                let shape = (months.len(), categories.len());
                let mut values = Array2::from_elem(shape, f64::NAN);
                let mut counts = Array2::from_elem(shape, f64::NAN);
                let mut weights = Array2::from_elem(shape, f64::NAN);

                for &r in &rows {
                    let obs = &observations[r];
                    // Both searches succeed: the axes were built from these rows
                    if let (Ok(t), Ok(c)) = (
                        months.binary_search(&obs.month),
                        categories.binary_search(&obs.category),
                    ) {
                        values[[t, c]] = obs.value;
                        counts[[t, c]] = obs.sample_count;
                        weights[[t, c]] = obs.sample_weight;
                    }
                }

                let mut partition = Self::new(key, months, categories);
                partition.columns.insert(panel.metric().to_string(), values);
                partition
                    .columns
                    .insert(layout.sample_count_col.clone(), counts);
                partition
                    .columns
                    .insert(layout.sample_weight_col.clone(), weights);
                partition
            })
            .collect();

        debug!(
            metric = panel.metric(),
            partitions = partitions.len(),
            "split panel into partitions"
        );
        partitions
    }

    /// Partition identity
    pub const fn key(&self) -> &PartitionKey {
        &self.key
    }

    /// Months along the time axis, ascending
    pub fn months(&self) -> &[NaiveDate] {
        &self.months
    }

    /// Categories along the category axis, ascending
    pub fn categories(&self) -> &[CategoryCode] {
        &self.categories
    }

    /// Number of time steps
    pub fn n_steps(&self) -> usize {
        self.months.len()
    }

    /// Number of categories
    pub fn n_categories(&self) -> usize {
        self.categories.len()
    }

    /// Column names, ascending
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Whether the partition carries `name`
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Column matrix, or a [`SmoothingError::MissingColumn`] naming this partition.
    pub fn column(&self, name: &str) -> Result<&Array2<f64>> {
        self.columns
            .get(name)
            .ok_or_else(|| self.missing_column(name))
    }

    /// Mutable column matrix.
    pub fn column_mut(&mut self, name: &str) -> Result<&mut Array2<f64>> {
        let key = &self.key;
        self.columns
            .get_mut(name)
            .ok_or_else(|| SmoothingError::MissingColumn {
                partition: key.to_string(),
                column: name.to_string(),
            })
    }

    /// Add or replace a column; its shape must be `n_steps × n_categories`.
    pub fn insert_column(&mut self, name: impl Into<String>, values: Array2<f64>) -> Result<()> {
        let expected = (self.n_steps(), self.n_categories());
        if values.dim() != expected {
            return Err(SmoothingError::DimensionMismatch {
                expected: vec![expected.0, expected.1],
                actual: values.shape().to_vec(),
            });
        }
        self.columns.insert(name.into(), values);
        Ok(())
    }

    /// Remove a column, returning it when present.
    pub fn remove_column(&mut self, name: &str) -> Option<Array2<f64>> {
        self.columns.remove(name)
    }

    /// Value of `column` at (`month`, `category`), if both axes contain them.
    pub fn value(&self, column: &str, month: NaiveDate, category: CategoryCode) -> Option<f64> {
        let t = self.months.binary_search(&month).ok()?;
        let c = self.categories.binary_search(&category).ok()?;
        self.columns.get(column).map(|values| values[[t, c]])
    }

    fn missing_column(&self, name: &str) -> SmoothingError {
        SmoothingError::MissingColumn {
            partition: self.key.to_string(),
            column: name.to_string(),
        }
    }
}
