//! Conversion between observation panels and polars `DataFrame`s.

use crate::error::{PanelError, Result};
use crate::panel::ObservationPanel;
use crate::types::{CutId, Observation};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Names of the warehouse columns holding each panel field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    /// Cut identifier column (default: `CUT_ID`)
    pub cut: String,
    /// Category code column (default: `BIZCATE_CODE`)
    pub category: String,
    /// Month column, a date or `YYYY-MM-DD` string (default: `MONTH_YEAR`)
    pub month: String,
    /// Sample count column (default: `ASK_COUNT`)
    pub sample_count: String,
    /// Sample weight column; the sample count is reused when absent (default: `ASK_WEIGHT`)
    pub sample_weight: Option<String>,
    /// Identifying dimensions other than cut, category and month
    pub dimensions: Vec<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            cut: "CUT_ID".to_string(),
            category: "BIZCATE_CODE".to_string(),
            month: "MONTH_YEAR".to_string(),
            sample_count: "ASK_COUNT".to_string(),
            sample_weight: Some("ASK_WEIGHT".to_string()),
            dimensions: vec!["CHANNEL".to_string(), "RETAILER_CODE".to_string()],
        }
    }
}

/// Parse a month from a date-like string, ignoring any time component.
pub fn parse_month(value: &str) -> Result<NaiveDate> {
    let date_part = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|e| PanelError::InvalidMonth {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl ColumnMapping {
    /// Read a panel for `metric` out of a long-form `DataFrame`.
    ///
    /// Rows with a null metric are skipped; null sample counts and weights are
    /// read as zero. Null keys are an error.
    pub fn panel_from_dataframe(&self, df: &DataFrame, metric: &str) -> Result<ObservationPanel> {
        let cuts = df.column(&self.cut)?.cast(&DataType::Int64)?;
        let cuts = cuts.i64()?;
        let categories = df.column(&self.category)?.cast(&DataType::Int64)?;
        let categories = categories.i64()?;
        let months = df.column(&self.month)?.cast(&DataType::String)?;
        let months = months.str()?;
        let values = df.column(metric)?.cast(&DataType::Float64)?;
        let values = values.f64()?;
        let counts = df.column(&self.sample_count)?.cast(&DataType::Float64)?;
        let counts = counts.f64()?;
        let weights = match &self.sample_weight {
            Some(name) => Some(df.column(name)?.cast(&DataType::Float64)?),
            None => None,
        };
        let weights = weights.as_ref().map(|w| w.f64()).transpose()?;

        let dimension_columns = self
            .dimensions
            .iter()
            .map(|name| df.column(name)?.cast(&DataType::String))
            .collect::<PolarsResult<Vec<_>>>()?;
        let dimension_values = dimension_columns
            .iter()
            .map(|c| c.str())
            .collect::<PolarsResult<Vec<_>>>()?;

        let missing = |column: &str, row: usize| PanelError::MissingValue {
            column: column.to_string(),
            row,
        };

        let mut observations = Vec::with_capacity(df.height());
        let mut skipped = 0usize;
        for row in 0..df.height() {
            let Some(value) = values.get(row) else {
                skipped += 1;
                continue;
            };
            let cut = cuts.get(row).ok_or_else(|| missing(&self.cut, row))?;
            let category = categories
                .get(row)
                .ok_or_else(|| missing(&self.category, row))?;
            let month = parse_month(months.get(row).ok_or_else(|| missing(&self.month, row))?)?;
            let sample_count = counts.get(row).unwrap_or(0.0);
            let sample_weight = match weights {
                Some(w) => w.get(row).unwrap_or(0.0),
                None => sample_count,
            };
            let dimensions = dimension_values
                .iter()
                .zip(&self.dimensions)
                .map(|(col, name)| {
                    col.get(row)
                        .map(str::to_string)
                        .ok_or_else(|| missing(name, row))
                })
                .collect::<Result<Vec<_>>>()?;

            observations.push(Observation::new(
                CutId::new(cut),
                dimensions,
                category,
                month,
                value,
                sample_count,
                sample_weight,
            ));
        }

        debug!(metric, rows = df.height(), skipped, "read panel from dataframe");
        ObservationPanel::new(metric, self.dimensions.clone(), observations)
    }

    /// Write a panel back to a long-form `DataFrame` using this mapping's names.
    pub fn panel_to_dataframe(&self, panel: &ObservationPanel) -> Result<DataFrame> {
        let obs = panel.observations();
        let mut columns: Vec<Column> = Vec::with_capacity(self.dimensions.len() + 6);

        columns.push(
            Series::new(
                self.cut.as_str().into(),
                obs.iter().map(|o| o.cut.get()).collect::<Vec<_>>(),
            )
            .into(),
        );
        for (idx, name) in panel.dimension_names().iter().enumerate() {
            columns.push(
                Series::new(
                    name.as_str().into(),
                    obs.iter()
                        .map(|o| o.dimensions[idx].clone())
                        .collect::<Vec<_>>(),
                )
                .into(),
            );
        }
        columns.push(
            Series::new(
                self.category.as_str().into(),
                obs.iter().map(|o| o.category).collect::<Vec<_>>(),
            )
            .into(),
        );
        columns.push(
            Series::new(
                self.month.as_str().into(),
                obs.iter().map(|o| o.month.to_string()).collect::<Vec<_>>(),
            )
            .into(),
        );
        columns.push(
            Series::new(
                self.sample_count.as_str().into(),
                obs.iter().map(|o| o.sample_count).collect::<Vec<_>>(),
            )
            .into(),
        );
        if let Some(weight) = &self.sample_weight {
            columns.push(
                Series::new(
                    weight.as_str().into(),
                    obs.iter().map(|o| o.sample_weight).collect::<Vec<_>>(),
                )
                .into(),
            );
        }
        columns.push(
            Series::new(
                panel.metric().into(),
                obs.iter().map(|o| o.value).collect::<Vec<_>>(),
            )
            .into(),
        );

        let df = DataFrame::new(columns)?
            .lazy()
            .with_column(col(self.month.as_str()).cast(DataType::Date))
            .collect()?;

        Ok(df)
    }
}
