//! National series a delta pass can be anchored to
//!
//! An anchor stands in for the national pass of a reconciliation. Cut rows are
//! smoothed as deviations from the anchor's raw values and recombined with its
//! smoothed values. Anchors come from a previous [`ReconciledTable`], so that
//! reconciliations chain level by level, or from a parent series smoothed
//! elsewhere.

use crate::error::{ReconcileError, Result};
use crate::output::{Estimate, ReconciledTable, VariantEstimates};
use std::collections::HashMap;
use strata_panel::{CrossCutKey, CutId};
use strata_smoothing::MetricTransform;

/// Raw value and smoothed estimates of one anchor row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorRow {
    /// Raw value
    pub raw: f64,
    /// Estimates per correlation variant
    pub estimates: VariantEstimates,
}

impl AnchorRow {
    pub(crate) fn map<F>(self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        Self {
            raw: f(self.raw),
            estimates: self.estimates.map(f),
        }
    }
}

/// Natural-domain national rows keyed by dimensions, category and month
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NationalAnchor {
    metric: String,
    rows: HashMap<CrossCutKey, AnchorRow>,
}

impl NationalAnchor {
    /// Empty anchor for `metric`.
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            rows: HashMap::new(),
        }
    }

    /// Add a row; a key can only be anchored once.
    pub fn insert(&mut self, key: CrossCutKey, row: AnchorRow) -> Result<()> {
        if self.rows.contains_key(&key) {
            return Err(ReconcileError::DuplicateAnchorRow {
                dimensions: key.dimensions,
                category: key.category,
                month: key.month,
            });
        }
        self.rows.insert(key, row);
        Ok(())
    }

    /// Anchor on the rows of `cut` in a reconciled table.
    ///
    /// Every variant and estimate kind the table carries is kept, so a cut
    /// reconciled against this anchor recombines per variant.
    pub fn from_table(table: &ReconciledTable, cut: CutId) -> Result<Self> {
        let mut anchor = Self::new(table.metric());
        for record in table.records().iter().filter(|r| r.cut == cut) {
            anchor.insert(
                CrossCutKey {
                    dimensions: record.dimensions.clone(),
                    category: record.category,
                    month: record.month,
                },
                AnchorRow {
                    raw: record.raw,
                    estimates: record.estimates,
                },
            )?;
        }
        Ok(anchor)
    }

    /// Anchor on a parent series given as `(key, raw, smoothed)`.
    ///
    /// The parent carries a single smoothed value, which serves every variant.
    pub fn from_series<I>(metric: impl Into<String>, series: I) -> Result<Self>
    where
        I: IntoIterator<Item = (CrossCutKey, f64, f64)>,
    {
        let mut anchor = Self::new(metric);
        for (key, raw, smoothed) in series {
            let estimate = Estimate {
                filtered: None,
                smoothed,
            };
            anchor.insert(
                key,
                AnchorRow {
                    raw,
                    estimates: VariantEstimates {
                        no_corr: Some(estimate),
                        corr: Some(estimate),
                    },
                },
            )?;
        }
        Ok(anchor)
    }

    /// Metric the anchor carries
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Number of anchored keys
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether nothing is anchored
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row anchored at `key`
    pub fn get(&self, key: &CrossCutKey) -> Option<&AnchorRow> {
        self.rows.get(key)
    }

    /// Rows mapped into the smoothing domain of `transform`.
    pub(crate) fn forward(&self, transform: MetricTransform) -> HashMap<CrossCutKey, AnchorRow> {
        self.rows
            .iter()
            .map(|(key, row)| (key.clone(), row.map(|v| transform.forward(v))))
            .collect()
    }
}
