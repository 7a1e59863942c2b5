//! Category-indexed correlation matrix
//!
//! The matrix is built once from the historical panel and then shared,
//! read-only, by every covariance model of a smoothing run.

use super::CovarianceError;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use strata_panel::CategoryCode;
use tracing::warn;

/// One row of the long-form correlation table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    /// Category code
    pub category: CategoryCode,
    /// Category it is correlated with
    pub similar_category: CategoryCode,
    /// Correlation value (R² once squared by the builder)
    pub correlation: f64,
}

/// Square correlation matrix indexed by category code on both axes
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    categories: Vec<CategoryCode>,
    values: Array2<f64>,
    positions: HashMap<CategoryCode, usize>,
}

impl CorrelationMatrix {
    /// Wrap a dense matrix whose rows and columns follow `categories`.
    pub fn new(categories: Vec<CategoryCode>, values: Array2<f64>) -> Result<Self, CovarianceError> {
        let n = categories.len();
        if values.dim() != (n, n) {
            return Err(CovarianceError::DimensionMismatch {
                expected: n,
                actual: values.nrows().max(values.ncols()),
            });
        }
        if let Some(((row, col), _)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(CovarianceError::NonFinite { row, col });
        }

        let mut positions = HashMap::with_capacity(n);
        for (idx, &code) in categories.iter().enumerate() {
            if positions.insert(code, idx).is_some() {
                return Err(CovarianceError::DuplicateCategory(code));
            }
        }

        Ok(Self {
            categories,
            values,
            positions,
        })
    }

    /// Identity matrix: every category independent.
    pub fn identity(categories: Vec<CategoryCode>) -> Result<Self, CovarianceError> {
        let n = categories.len();
        Self::new(categories, Array2::eye(n))
    }

    /// Rebuild a matrix from its long-form table.
    ///
    /// The axis is the sorted union of every code in the table. Pairs absent from
    /// the table are 0, except the diagonal which defaults to 1.
    pub fn from_entries(entries: &[CorrelationEntry]) -> Result<Self, CovarianceError> {
        let categories: Vec<CategoryCode> = entries
            .iter()
            .flat_map(|e| [e.category, e.similar_category])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let positions: HashMap<CategoryCode, usize> =
            categories.iter().enumerate().map(|(i, &c)| (c, i)).collect();

        let mut values = Array2::<f64>::eye(categories.len());
        for entry in entries {
            let i = positions[&entry.category];
            let j = positions[&entry.similar_category];
            values[[i, j]] = entry.correlation;
        }

        Self::new(categories, values)
    }

    /// Category codes along both axes
    pub fn categories(&self) -> &[CategoryCode] {
        &self.categories
    }

    /// Dense values
    pub const fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Number of categories
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Whether the matrix has no categories
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Whether `category` is on the axis
    pub fn contains(&self, category: CategoryCode) -> bool {
        self.positions.contains_key(&category)
    }

    /// Entry for a pair of categories
    pub fn get(&self, category: CategoryCode, similar: CategoryCode) -> Option<f64> {
        let i = *self.positions.get(&category)?;
        let j = *self.positions.get(&similar)?;
        Some(self.values[[i, j]])
    }

    /// Dense sub-matrix for `categories`, in the given order.
    ///
    /// Codes missing from the matrix are treated as independent of everything:
    /// unit diagonal, zero off-diagonal.
    pub fn slice(&self, categories: &[CategoryCode]) -> Array2<f64> {
        let n = categories.len();
        let idx: Vec<Option<usize>> = categories
            .iter()
            .map(|c| self.positions.get(c).copied())
            .collect();

        let unknown: Vec<CategoryCode> = categories
            .iter()
            .zip(&idx)
            .filter(|(_, i)| i.is_none())
            .map(|(c, _)| *c)
            .collect();
        if !unknown.is_empty() {
            warn!(?unknown, "categories missing from correlation matrix, treating as independent");
        }

        let mut out = Array2::<f64>::zeros((n, n));
        for a in 0..n {
            for b in 0..n {
                out[[a, b]] = match (idx[a], idx[b]) {
                    (Some(i), Some(j)) => self.values[[i, j]],
                    _ if a == b => 1.0,
                    _ => 0.0,
                };
            }
        }
        out
    }

    /// Long-form table sorted by category ascending, then correlation descending.
    pub fn to_entries(&self) -> Vec<CorrelationEntry> {
        let mut entries = Vec::with_capacity(self.len() * self.len());
        for (i, &category) in self.categories.iter().enumerate() {
            for (j, &similar_category) in self.categories.iter().enumerate() {
                entries.push(CorrelationEntry {
                    category,
                    similar_category,
                    correlation: self.values[[i, j]],
                });
            }
        }
        entries.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| b.correlation.total_cmp(&a.correlation))
                .then_with(|| a.similar_category.cmp(&b.similar_category))
        });
        entries
    }

    /// Long-form `DataFrame` with columns `<category_col>`, `SIMILAR_<category_col>`
    /// and `CORRELATION`.
    pub fn to_dataframe(&self, category_col: &str) -> Result<DataFrame, CovarianceError> {
        let entries = self.to_entries();
        let similar_col = format!("SIMILAR_{category_col}");

        let df = DataFrame::new(vec![
            Series::new(
                category_col.into(),
                entries.iter().map(|e| e.category).collect::<Vec<_>>(),
            )
            .into(),
            Series::new(
                similar_col.as_str().into(),
                entries.iter().map(|e| e.similar_category).collect::<Vec<_>>(),
            )
            .into(),
            Series::new(
                "CORRELATION".into(),
                entries.iter().map(|e| e.correlation).collect::<Vec<_>>(),
            )
            .into(),
        ])?;

        Ok(df)
    }

    /// Read a long-form `DataFrame` written by [`Self::to_dataframe`].
    pub fn from_dataframe(df: &DataFrame, category_col: &str) -> Result<Self, CovarianceError> {
        let similar_col = format!("SIMILAR_{category_col}");
        let categories = df.column(category_col)?.cast(&DataType::Int64)?;
        let categories = categories.i64()?;
        let similar = df.column(&similar_col)?.cast(&DataType::Int64)?;
        let similar = similar.i64()?;
        let correlations = df.column("CORRELATION")?.cast(&DataType::Float64)?;
        let correlations = correlations.f64()?;

        let entries = categories
            .into_iter()
            .zip(similar)
            .zip(correlations)
            .filter_map(|((c, s), r)| {
                Some(CorrelationEntry {
                    category: c?,
                    similar_category: s?,
                    correlation: r?,
                })
            })
            .collect::<Vec<_>>();

        Self::from_entries(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CorrelationMatrix {
        CorrelationMatrix::new(
            vec![102, 117, 449],
            Array2::from_shape_vec(
                (3, 3),
                vec![1.0, 0.64, 0.09, 0.64, 1.0, 0.25, 0.09, 0.25, 1.0],
            )
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_duplicate_category() {
        let result = CorrelationMatrix::new(vec![1, 1], Array2::eye(2));
        assert!(matches!(result, Err(CovarianceError::DuplicateCategory(1))));
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let result = CorrelationMatrix::new(vec![1, 2, 3], Array2::eye(2));
        assert!(matches!(result, Err(CovarianceError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_slice_follows_requested_order() {
        let m = sample();
        let sliced = m.slice(&[449, 102]);
        assert_eq!(sliced[[0, 0]], 1.0);
        assert_eq!(sliced[[0, 1]], 0.09);
        assert_eq!(sliced[[1, 0]], 0.09);
    }

    #[test]
    fn test_slice_unknown_category_is_independent() {
        let m = sample();
        let sliced = m.slice(&[102, 999, 117]);
        assert_eq!(sliced[[1, 1]], 1.0);
        assert_eq!(sliced[[0, 1]], 0.0);
        assert_eq!(sliced[[1, 2]], 0.0);
        assert_eq!(sliced[[0, 2]], 0.64);
    }

    #[test]
    fn test_entries_sorted_by_correlation_desc() {
        let entries = sample().to_entries();
        assert_eq!(entries.len(), 9);
        let first_block: Vec<_> = entries[..3].iter().map(|e| e.similar_category).collect();
        assert_eq!(first_block, vec![102, 117, 449]);
        let last_block: Vec<_> = entries[6..].iter().map(|e| e.similar_category).collect();
        assert_eq!(last_block, vec![449, 117, 102]);
    }

    #[test]
    fn test_entries_round_trip() {
        let m = sample();
        let back = CorrelationMatrix::from_entries(&m.to_entries()).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_dataframe_round_trip() {
        let m = sample();
        let df = m.to_dataframe("BIZCATE_CODE").unwrap();
        assert_eq!(df.height(), 9);
        assert!(df.column("SIMILAR_BIZCATE_CODE").is_ok());

        let back = CorrelationMatrix::from_dataframe(&df, "BIZCATE_CODE").unwrap();
        assert_eq!(back, m);
    }
}
