//! Observation panels.
//!
//! A panel holds the long-form survey rows for a single metric. Every row is
//! uniquely keyed by (cut, dimensions, category, month); construction rejects
//! duplicates so downstream partitioning can rely on that invariant.

use crate::error::{PanelError, Result};
use crate::types::{CategoryCode, CrossCutKey, CutId, Observation, SeriesKey};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Options for [`ObservationPanel::complete`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Take the sample count and weight of an inserted row from any observed row
    /// with the same cut, category and month (e.g. another retailer asked in the
    /// same wave). When false, inserted rows carry zero counts.
    pub fill_counts_from_siblings: bool,
}

/// Long-form panel of observations for one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationPanel {
    metric: String,
    dimension_names: Vec<String>,
    observations: Vec<Observation>,
}

impl ObservationPanel {
    /// Build a panel, validating dimension arity and key uniqueness.
    ///
    /// Observations are sorted by series key and month.
    pub fn new(
        metric: impl Into<String>,
        dimension_names: Vec<String>,
        mut observations: Vec<Observation>,
    ) -> Result<Self> {
        let mut seen = HashSet::with_capacity(observations.len());
        for obs in &observations {
            if obs.dimensions.len() != dimension_names.len() {
                return Err(PanelError::DimensionMismatch {
                    expected: dimension_names.len(),
                    actual: obs.dimensions.len(),
                });
            }
            if !seen.insert((obs.series_key(), obs.month)) {
                return Err(PanelError::DuplicateKey {
                    cut: obs.cut.get(),
                    dimensions: obs.dimensions.clone(),
                    category: obs.category,
                    month: obs.month.to_string(),
                });
            }
        }

        observations.sort_by(|a, b| {
            (a.cut, &a.dimensions, a.category, a.month).cmp(&(
                b.cut,
                &b.dimensions,
                b.category,
                b.month,
            ))
        });

        Ok(Self {
            metric: metric.into(),
            dimension_names,
            observations,
        })
    }

    /// Name of the metric carried in [`Observation::value`].
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Rename the metric.
    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    /// Names of the identifying dimensions, in the order of [`Observation::dimensions`].
    pub fn dimension_names(&self) -> &[String] {
        &self.dimension_names
    }

    /// All observations, sorted by series key and month.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Consume the panel, returning its observations.
    pub fn into_observations(self) -> Vec<Observation> {
        self.observations
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Whether the panel holds no observations.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Distinct months, ascending.
    pub fn months(&self) -> Vec<NaiveDate> {
        self.observations
            .iter()
            .map(|o| o.month)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct category codes, ascending.
    pub fn categories(&self) -> Vec<CategoryCode> {
        self.observations
            .iter()
            .map(|o| o.category)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct cuts, ascending.
    pub fn cuts(&self) -> Vec<CutId> {
        self.observations
            .iter()
            .map(|o| o.cut)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Keep only observations matching `predicate`.
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Observation) -> bool,
    {
        Self {
            metric: self.metric.clone(),
            dimension_names: self.dimension_names.clone(),
            observations: self
                .observations
                .iter()
                .filter(|o| predicate(o))
                .cloned()
                .collect(),
        }
    }

    /// Rows of the national cut.
    pub fn national(&self) -> Self {
        self.filter(|o| o.cut.is_national())
    }

    /// Rows of every cut other than national.
    pub fn finer_cuts(&self) -> Self {
        self.filter(|o| !o.cut.is_national())
    }

    /// Apply `f` to every metric value.
    pub fn map_values<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        let mut mapped = self.clone();
        for obs in &mut mapped.observations {
            obs.value = f(obs.value);
        }
        mapped
    }

    /// Position of a named dimension.
    pub fn dimension_index(&self, name: &str) -> Result<usize> {
        self.dimension_names
            .iter()
            .position(|d| d == name)
            .ok_or_else(|| PanelError::UnknownDimension(name.to_string()))
    }

    /// Split the panel on the values of one dimension.
    pub fn stratify(&self, dimension: &str) -> Result<BTreeMap<String, Self>> {
        let idx = self.dimension_index(dimension)?;
        let mut strata: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
        for obs in &self.observations {
            strata
                .entry(obs.dimensions[idx].clone())
                .or_default()
                .push(obs.clone());
        }

        Ok(strata
            .into_iter()
            .map(|(value, observations)| {
                (
                    value,
                    Self {
                        metric: self.metric.clone(),
                        dimension_names: self.dimension_names.clone(),
                        observations,
                    },
                )
            })
            .collect())
    }

    /// Index observations by their cross-cut join key.
    ///
    /// Only meaningful on a single-cut panel such as [`Self::national`]; with
    /// several cuts the last one in sort order wins.
    pub fn index_by_cross_cut(&self) -> HashMap<CrossCutKey, &Observation> {
        self.observations
            .iter()
            .map(|o| (o.cross_cut_key(), o))
            .collect()
    }

    /// Expand every series over every month present in the panel.
    ///
    /// Inserted rows carry a zero value. Their counts are zero unless
    /// [`CompletionConfig::fill_counts_from_siblings`] is set.
    pub fn complete(&self, config: &CompletionConfig) -> Self {
        let months = self.months();
        let series: BTreeSet<SeriesKey> =
            self.observations.iter().map(Observation::series_key).collect();
        let existing: HashMap<(SeriesKey, NaiveDate), &Observation> = self
            .observations
            .iter()
            .map(|o| ((o.series_key(), o.month), o))
            .collect();

        let mut sibling_counts: HashMap<(CutId, CategoryCode, NaiveDate), (f64, f64)> =
            HashMap::new();
        if config.fill_counts_from_siblings {
            for obs in &self.observations {
                sibling_counts
                    .entry((obs.cut, obs.category, obs.month))
                    .or_insert((obs.sample_count, obs.sample_weight));
            }
        }

        let mut observations = Vec::with_capacity(series.len() * months.len());
        let mut inserted = 0usize;
        for key in &series {
            for &month in &months {
                if let Some(obs) = existing.get(&(key.clone(), month)) {
                    observations.push((*obs).clone());
                    continue;
                }
                let (sample_count, sample_weight) = sibling_counts
                    .get(&(key.cut, key.category, month))
                    .copied()
                    .unwrap_or((0.0, 0.0));
                observations.push(Observation::new(
                    key.cut,
                    key.dimensions.clone(),
                    key.category,
                    month,
                    0.0,
                    sample_count,
                    sample_weight,
                ));
                inserted += 1;
            }
        }

        debug!(
            metric = %self.metric,
            series = series.len(),
            months = months.len(),
            inserted,
            "completed panel"
        );

        Self {
            metric: self.metric.clone(),
            dimension_names: self.dimension_names.clone(),
            observations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, 1).unwrap()
    }

    fn obs(cut: i64, retailer: &str, category: i64, m: u32, value: f64, n: f64) -> Observation {
        Observation::new(
            CutId::new(cut),
            vec![retailer.to_string()],
            category,
            month(m),
            value,
            n,
            n,
        )
    }

    fn dims() -> Vec<String> {
        vec!["RETAILER_CODE".to_string()]
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let result = ObservationPanel::new(
            "TOM",
            dims(),
            vec![obs(1, "115", 102, 1, 0.2, 10.0), obs(1, "115", 102, 1, 0.3, 12.0)],
        );
        assert!(matches!(result, Err(PanelError::DuplicateKey { .. })));
    }

    #[test]
    fn test_rejects_dimension_arity() {
        let mut bad = obs(1, "115", 102, 1, 0.2, 10.0);
        bad.dimensions.push("extra".to_string());
        let result = ObservationPanel::new("TOM", dims(), vec![bad]);
        assert!(matches!(
            result,
            Err(PanelError::DimensionMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_national_and_finer_split() {
        let panel = ObservationPanel::new(
            "TOM",
            dims(),
            vec![
                obs(2, "115", 102, 1, 0.3, 5.0),
                obs(1, "115", 102, 1, 0.2, 10.0),
                obs(3, "115", 102, 1, 0.1, 4.0),
            ],
        )
        .unwrap();

        assert_eq!(panel.national().len(), 1);
        assert_eq!(panel.finer_cuts().len(), 2);
        assert_eq!(panel.cuts(), vec![CutId::new(1), CutId::new(2), CutId::new(3)]);
        // Sorted by cut first
        assert!(panel.observations()[0].cut.is_national());
    }

    #[test]
    fn test_complete_fills_missing_months_with_zero() {
        let panel = ObservationPanel::new(
            "SHARE_FINAL",
            dims(),
            vec![
                obs(1, "115", 102, 1, 0.2, 10.0),
                obs(1, "115", 102, 3, 0.4, 12.0),
                obs(1, "116", 102, 2, 0.5, 8.0),
            ],
        )
        .unwrap();

        let completed = panel.complete(&CompletionConfig::default());
        assert_eq!(completed.len(), 6);

        let inserted = completed
            .observations()
            .iter()
            .find(|o| o.dimensions[0] == "115" && o.month == month(2))
            .unwrap();
        assert_eq!(inserted.value, 0.0);
        assert_eq!(inserted.sample_count, 0.0);
    }

    #[test]
    fn test_complete_fills_counts_from_siblings() {
        let panel = ObservationPanel::new(
            "TOTALTHINK",
            dims(),
            vec![
                obs(1, "115", 102, 1, 0.2, 10.0),
                obs(1, "116", 102, 1, 0.5, 10.0),
                obs(1, "116", 102, 2, 0.5, 14.0),
            ],
        )
        .unwrap();

        let completed = panel.complete(&CompletionConfig {
            fill_counts_from_siblings: true,
        });
        let inserted = completed
            .observations()
            .iter()
            .find(|o| o.dimensions[0] == "115" && o.month == month(2))
            .unwrap();
        assert_eq!(inserted.value, 0.0);
        assert_eq!(inserted.sample_count, 14.0);
    }

    #[test]
    fn test_stratify() {
        let panel = ObservationPanel::new(
            "TOM",
            vec!["CHANNEL".to_string()],
            vec![
                Observation::new(CutId::NATIONAL, vec!["BM".into()], 1, month(1), 0.1, 1.0, 1.0),
                Observation::new(CutId::NATIONAL, vec!["Ecom".into()], 1, month(1), 0.2, 1.0, 1.0),
                Observation::new(CutId::new(2), vec!["Ecom".into()], 1, month(1), 0.3, 1.0, 1.0),
            ],
        )
        .unwrap();

        let strata = panel.stratify("CHANNEL").unwrap();
        assert_eq!(strata.len(), 2);
        assert_eq!(strata["BM"].len(), 1);
        assert_eq!(strata["Ecom"].len(), 2);
        assert!(panel.stratify("REGION").is_err());
    }
}
