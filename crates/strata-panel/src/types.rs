//! Core record types shared by every panel operation.

use chrono::NaiveDate;
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Category code, the trailing axis of every partition (sub-category, bizcategory).
pub type CategoryCode = i64;

/// Survey cut identifier.
///
/// Cut `1` is the national aggregate; every other value is a finer slice
/// (region, demographic, retailer subset).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[serde(transparent)]
pub struct CutId(i64);

impl CutId {
    /// The national aggregate.
    pub const NATIONAL: Self = Self(1);

    /// Wrap a raw cut identifier.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this is the national aggregate.
    pub const fn is_national(self) -> bool {
        self.0 == Self::NATIONAL.0
    }
}

/// Identity of one time series inside a panel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Cut the series belongs to
    pub cut: CutId,
    /// Values of the panel's identifying dimensions, in panel order
    pub dimensions: Vec<String>,
    /// Category code
    pub category: CategoryCode,
}

/// Key shared by a finer-cut row and its national counterpart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CrossCutKey {
    /// Values of the identifying dimensions
    pub dimensions: Vec<String>,
    /// Category code
    pub category: CategoryCode,
    /// Month of the observation
    pub month: NaiveDate,
}

/// A single survey observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Cut identifier
    pub cut: CutId,
    /// Values of the identifying dimensions, aligned with the panel's dimension names
    pub dimensions: Vec<String>,
    /// Category code
    pub category: CategoryCode,
    /// First day of the observed month
    pub month: NaiveDate,
    /// Metric value (proportion, share, average)
    pub value: f64,
    /// Number of respondents asked
    pub sample_count: f64,
    /// Weighted respondent count
    pub sample_weight: f64,
}

impl Observation {
    /// Create a new observation.
    pub const fn new(
        cut: CutId,
        dimensions: Vec<String>,
        category: CategoryCode,
        month: NaiveDate,
        value: f64,
        sample_count: f64,
        sample_weight: f64,
    ) -> Self {
        Self {
            cut,
            dimensions,
            category,
            month,
            value,
            sample_count,
            sample_weight,
        }
    }

    /// The series this observation belongs to.
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            cut: self.cut,
            dimensions: self.dimensions.clone(),
            category: self.category,
        }
    }

    /// The key used to join this row against another cut.
    pub fn cross_cut_key(&self) -> CrossCutKey {
        CrossCutKey {
            dimensions: self.dimensions.clone(),
            category: self.category,
            month: self.month,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_national_cut() {
        assert!(CutId::NATIONAL.is_national());
        assert!(!CutId::new(10010).is_national());
        assert_eq!(CutId::from(3).get(), 3);
        assert_eq!(CutId::new(2).to_string(), "2");
    }

    #[test]
    fn test_cross_cut_key_ignores_cut() {
        let month = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let national = Observation::new(
            CutId::NATIONAL,
            vec!["BM".to_string()],
            102,
            month,
            0.4,
            100.0,
            98.0,
        );
        let regional = Observation {
            cut: CutId::new(2),
            value: 0.35,
            ..national.clone()
        };

        assert_eq!(national.cross_cut_key(), regional.cross_cut_key());
        assert_ne!(national.series_key(), regional.series_key());
    }
}
