//! Post-run sanity check comparing smoothed and raw series.
//!
//! For every (cut, dimensions, category) group of a reconciled table, the
//! sample-count weighted means of the raw and smoothed values are compared.
//! Groups whose smoothed mean drifts from the raw mean by more than a relative
//! threshold are flagged.

use crate::output::ReconciledTable;
use std::collections::BTreeMap;
use std::fmt;
use strata_covariance::CorrelationMode;
use strata_panel::{CategoryCode, CutId};
use tracing::{info, warn};

/// Default relative threshold above which a group is flagged
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.10;

/// Comparison of raw and smoothed means for one series
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSimilarity {
    /// Cut identifier
    pub cut: CutId,
    /// Dimension values
    pub dimensions: Vec<String>,
    /// Category code
    pub category: CategoryCode,
    /// Count-weighted mean of the raw values
    pub raw_mean: f64,
    /// Count-weighted mean of the smoothed values
    pub smoothed_mean: f64,
    /// `|raw_mean - smoothed_mean|`
    pub delta: f64,
    /// `delta / |raw_mean|`; 0 without drift, infinite for drift off a zero raw mean
    pub relative_delta: f64,
}

impl GroupSimilarity {
    /// Whether the group exceeds `threshold`
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.relative_delta > threshold
    }
}

/// Result of [`similarity_check`], groups sorted by relative delta, largest first
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityReport {
    /// Relative threshold used
    pub threshold: f64,
    /// Per-group comparison
    pub groups: Vec<GroupSimilarity>,
}

impl SimilarityReport {
    /// Number of flagged groups
    pub fn flagged(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| g.exceeds(self.threshold))
            .count()
    }

    /// Flagged groups
    pub fn flagged_groups(&self) -> impl Iterator<Item = &GroupSimilarity> {
        self.groups.iter().filter(|g| g.exceeds(self.threshold))
    }

    /// Share of groups flagged, 0 when there are no groups
    pub fn share_flagged(&self) -> f64 {
        if self.groups.is_empty() {
            0.0
        } else {
            self.flagged() as f64 / self.groups.len() as f64
        }
    }

    /// Whether no group was flagged
    pub fn passed(&self) -> bool {
        self.flagged() == 0
    }
}

impl fmt::Display for SimilarityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} groups ({:.2}%) exceed the {} threshold",
            self.flagged(),
            self.groups.len(),
            self.share_flagged() * 100.0,
            self.threshold
        )
    }
}

fn relative_delta(delta: f64, raw_mean: f64) -> f64 {
    if delta == 0.0 {
        0.0
    } else if raw_mean == 0.0 {
        f64::INFINITY
    } else {
        delta / raw_mean.abs()
    }
}

#[derive(Default)]
struct WeightedMeans {
    weight: f64,
    raw: f64,
    smoothed: f64,
}

/// Compare the smoothed output of `mode` against the raw values of `table`.
///
/// Only rows with a positive sample count and finite raw and smoothed values
/// contribute. Groups with no contributing rows are omitted.
pub fn similarity_check(
    table: &ReconciledTable,
    mode: CorrelationMode,
    threshold: f64,
) -> SimilarityReport {
    let mut sums: BTreeMap<(CutId, &[String], CategoryCode), WeightedMeans> = BTreeMap::new();

    for record in table.records() {
        let Some(estimate) = record.estimates.get(mode) else {
            continue;
        };
        let n = record.sample_count;
        if !(n > 0.0 && record.raw.is_finite() && estimate.smoothed.is_finite()) {
            continue;
        }
        let entry = sums
            .entry((record.cut, record.dimensions.as_slice(), record.category))
            .or_default();
        entry.weight += n;
        entry.raw += n * record.raw;
        entry.smoothed += n * estimate.smoothed;
    }

    let mut groups: Vec<GroupSimilarity> = sums
        .into_iter()
        .map(|((cut, dimensions, category), sum)| {
            let raw_mean = sum.raw / sum.weight;
            let smoothed_mean = sum.smoothed / sum.weight;
            let delta = (raw_mean - smoothed_mean).abs();
            GroupSimilarity {
                cut,
                dimensions: dimensions.to_vec(),
                category,
                raw_mean,
                smoothed_mean,
                delta,
                relative_delta: relative_delta(delta, raw_mean),
            }
        })
        .collect();
    groups.sort_by(|a, b| b.relative_delta.total_cmp(&a.relative_delta));

    let report = SimilarityReport { threshold, groups };
    if report.passed() {
        info!(metric = table.metric(), variant = mode.suffix(), "{report}");
    } else {
        warn!(metric = table.metric(), variant = mode.suffix(), "{report}");
    }
    report
}
