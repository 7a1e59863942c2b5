//! Reconciled output records and their tabular exports
//!
//! Output column names are derived here, and only here, from the metric name,
//! the correlation variant and the estimate kind.

use crate::error::{ReconcileError, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use strata_covariance::CorrelationMode;
use strata_panel::{CategoryCode, ColumnMapping, CutId};
use strata_smoothing::{OutputKind, output_column, variant_prefix};
use tracing::debug;

/// Filtered and smoothed estimate for one variant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// Forward filter value, when retained
    pub filtered: Option<f64>,
    /// Backward-smoothed value
    pub smoothed: f64,
}

impl Estimate {
    /// Apply `f` to every value.
    pub fn map<F>(self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        Self {
            filtered: self.filtered.map(&f),
            smoothed: f(self.smoothed),
        }
    }

    /// Value of the given kind
    pub const fn get(&self, kind: OutputKind) -> Option<f64> {
        match kind {
            OutputKind::Filtered => self.filtered,
            OutputKind::Smoothed => Some(self.smoothed),
        }
    }
}

/// Estimates per correlation variant
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantEstimates {
    /// Independence variant (`_NO_CORR`)
    pub no_corr: Option<Estimate>,
    /// Correlation-aware variant (`_CORR`)
    pub corr: Option<Estimate>,
}

impl VariantEstimates {
    /// Estimate for `mode`
    pub const fn get(&self, mode: CorrelationMode) -> Option<&Estimate> {
        match mode {
            CorrelationMode::Independent => self.no_corr.as_ref(),
            CorrelationMode::Correlated => self.corr.as_ref(),
        }
    }

    /// Store the estimate for `mode`.
    pub const fn set(&mut self, mode: CorrelationMode, estimate: Estimate) {
        match mode {
            CorrelationMode::Independent => self.no_corr = Some(estimate),
            CorrelationMode::Correlated => self.corr = Some(estimate),
        }
    }

    /// Apply `f` to every stored value.
    pub fn map<F>(self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        Self {
            no_corr: self.no_corr.map(|e| e.map(&f)),
            corr: self.corr.map(|e| e.map(&f)),
        }
    }
}

/// One output row: a (cut, dimensions, category, month) key with its estimates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothedRecord {
    /// Cut identifier
    pub cut: CutId,
    /// Dimension values
    pub dimensions: Vec<String>,
    /// Category code
    pub category: CategoryCode,
    /// Month
    pub month: NaiveDate,
    /// Sample count
    pub sample_count: f64,
    /// Sample weight
    pub sample_weight: f64,
    /// Raw metric value, natural domain
    pub raw: f64,
    /// Smoothed estimates, natural domain
    pub estimates: VariantEstimates,
}

/// Value column of a reconciled table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueColumn {
    /// Column name
    pub name: String,
    /// Correlation variant
    pub mode: CorrelationMode,
    /// Estimate kind
    pub kind: OutputKind,
}

/// Long-form reconciliation output for one metric
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledTable {
    metric: String,
    dimension_names: Vec<String>,
    variants: Vec<CorrelationMode>,
    retain_filtered: bool,
    records: Vec<SmoothedRecord>,
}

impl ReconciledTable {
    /// Wrap records; they are sorted by (cut, dimensions, category, month).
    pub fn new(
        metric: impl Into<String>,
        dimension_names: Vec<String>,
        variants: Vec<CorrelationMode>,
        retain_filtered: bool,
        mut records: Vec<SmoothedRecord>,
    ) -> Self {
        sort_records(&mut records);
        Self {
            metric: metric.into(),
            dimension_names,
            variants,
            retain_filtered,
            records,
        }
    }

    /// Concatenate tables produced with the same settings.
    pub fn concat(tables: Vec<Self>) -> Result<Self> {
        let mut iter = tables.into_iter();
        let Some(mut first) = iter.next() else {
            return Err(ReconcileError::IncompatibleTables(
                "nothing to concatenate".to_string(),
            ));
        };

        for table in iter {
            if table.metric != first.metric
                || table.dimension_names != first.dimension_names
                || table.variants != first.variants
                || table.retain_filtered != first.retain_filtered
            {
                return Err(ReconcileError::IncompatibleTables(format!(
                    "{} and {} differ in layout",
                    first.metric, table.metric
                )));
            }
            first.records.extend(table.records);
        }

        sort_records(&mut first.records);
        Ok(first)
    }

    /// Metric name
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Dimension names
    pub fn dimension_names(&self) -> &[String] {
        &self.dimension_names
    }

    /// Correlation variants carried
    pub fn variants(&self) -> &[CorrelationMode] {
        &self.variants
    }

    /// Whether `_KF` columns are carried
    pub const fn retains_filtered(&self) -> bool {
        self.retain_filtered
    }

    /// Output rows
    pub fn records(&self) -> &[SmoothedRecord] {
        &self.records
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Row for a key, if present.
    pub fn find(
        &self,
        cut: CutId,
        dimensions: &[String],
        category: CategoryCode,
        month: NaiveDate,
    ) -> Option<&SmoothedRecord> {
        self.records
            .binary_search_by(|r| {
                (r.cut, r.dimensions.as_slice(), r.category, r.month).cmp(&(
                    cut,
                    dimensions,
                    category,
                    month,
                ))
            })
            .ok()
            .map(|i| &self.records[i])
    }

    /// Value columns in output order: per variant, `_KF` (when retained) then `_RTS`.
    pub fn value_columns(&self) -> Vec<ValueColumn> {
        let mut columns = Vec::with_capacity(self.variants.len() * 2);
        for &mode in &self.variants {
            let prefix = variant_prefix(&self.metric, mode);
            if self.retain_filtered {
                columns.push(ValueColumn {
                    name: output_column(&prefix, OutputKind::Filtered),
                    mode,
                    kind: OutputKind::Filtered,
                });
            }
            columns.push(ValueColumn {
                name: output_column(&prefix, OutputKind::Smoothed),
                mode,
                kind: OutputKind::Smoothed,
            });
        }
        columns
    }

    /// Every column name in output order, identifying columns named by `mapping`.
    pub fn column_names(&self, mapping: &ColumnMapping) -> Vec<String> {
        let mut names = vec![mapping.cut.clone()];
        names.extend(self.dimension_names.iter().cloned());
        names.push(mapping.category.clone());
        names.push(mapping.month.clone());
        names.push(mapping.sample_count.clone());
        if let Some(weight) = &mapping.sample_weight {
            names.push(weight.clone());
        }
        names.push(self.metric.clone());
        names.extend(self.value_columns().into_iter().map(|c| c.name));
        names
    }

    fn value(record: &SmoothedRecord, column: &ValueColumn) -> Option<f64> {
        record
            .estimates
            .get(column.mode)
            .and_then(|e| e.get(column.kind))
    }

    /// Long-form `DataFrame`; missing estimates are null.
    pub fn to_dataframe(&self, mapping: &ColumnMapping) -> Result<DataFrame> {
        let rows = &self.records;
        let mut columns: Vec<Column> = Vec::with_capacity(self.dimension_names.len() + 10);

        columns.push(
            Series::new(
                mapping.cut.as_str().into(),
                rows.iter().map(|r| r.cut.get()).collect::<Vec<_>>(),
            )
            .into(),
        );
        for (idx, name) in self.dimension_names.iter().enumerate() {
            columns.push(
                Series::new(
                    name.as_str().into(),
                    rows.iter()
                        .map(|r| r.dimensions[idx].clone())
                        .collect::<Vec<_>>(),
                )
                .into(),
            );
        }
        columns.push(
            Series::new(
                mapping.category.as_str().into(),
                rows.iter().map(|r| r.category).collect::<Vec<_>>(),
            )
            .into(),
        );
        columns.push(
            Series::new(
                mapping.month.as_str().into(),
                rows.iter().map(|r| r.month.to_string()).collect::<Vec<_>>(),
            )
            .into(),
        );
        columns.push(
            Series::new(
                mapping.sample_count.as_str().into(),
                rows.iter().map(|r| r.sample_count).collect::<Vec<_>>(),
            )
            .into(),
        );
        if let Some(weight) = &mapping.sample_weight {
            columns.push(
                Series::new(
                    weight.as_str().into(),
                    rows.iter().map(|r| r.sample_weight).collect::<Vec<_>>(),
                )
                .into(),
            );
        }
        columns.push(
            Series::new(
                self.metric.as_str().into(),
                rows.iter().map(|r| r.raw).collect::<Vec<_>>(),
            )
            .into(),
        );
        for column in self.value_columns() {
            columns.push(
                Series::new(
                    column.name.as_str().into(),
                    rows.iter()
                        .map(|r| Self::value(r, &column))
                        .collect::<Vec<Option<f64>>>(),
                )
                .into(),
            );
        }

        let df = DataFrame::new(columns)?
            .lazy()
            .with_column(col(mapping.month.as_str()).cast(DataType::Date))
            .collect()?;

        debug!(metric = %self.metric, rows = df.height(), "exported reconciled table");
        Ok(df)
    }

    /// Write the table as CSV with a header row; missing estimates are empty fields.
    pub fn write_csv<W: Write>(&self, mapping: &ColumnMapping, writer: W) -> Result<()> {
        let value_columns = self.value_columns();
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.column_names(mapping))?;

        for record in &self.records {
            let mut row: Vec<String> = Vec::with_capacity(value_columns.len() + 8);
            row.push(record.cut.to_string());
            row.extend(record.dimensions.iter().cloned());
            row.push(record.category.to_string());
            row.push(record.month.to_string());
            row.push(record.sample_count.to_string());
            if mapping.sample_weight.is_some() {
                row.push(record.sample_weight.to_string());
            }
            row.push(record.raw.to_string());
            for column in &value_columns {
                row.push(
                    Self::value(record, column)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
            }
            wtr.write_record(&row)?;
        }

        wtr.flush()?;
        Ok(())
    }
}

fn sort_records(records: &mut [SmoothedRecord]) {
    records.sort_by(|a, b| {
        (a.cut, &a.dimensions, a.category, a.month).cmp(&(b.cut, &b.dimensions, b.category, b.month))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cut: i64, category: i64, month: u32, smoothed: f64) -> SmoothedRecord {
        let mut estimates = VariantEstimates::default();
        estimates.set(
            CorrelationMode::Correlated,
            Estimate {
                filtered: Some(smoothed + 0.01),
                smoothed,
            },
        );
        SmoothedRecord {
            cut: CutId::new(cut),
            dimensions: vec!["BM".to_string()],
            category,
            month: NaiveDate::from_ymd_opt(2024, month, 1).unwrap(),
            sample_count: 30.0,
            sample_weight: 28.5,
            raw: smoothed - 0.02,
            estimates,
        }
    }

    fn table(retain_filtered: bool) -> ReconciledTable {
        ReconciledTable::new(
            "TOM",
            vec!["CHANNEL".to_string()],
            vec![CorrelationMode::Independent, CorrelationMode::Correlated],
            retain_filtered,
            vec![record(10010, 5, 2, 0.3), record(1, 5, 1, 0.4), record(1, 5, 2, 0.5)],
        )
    }

    fn mapping() -> ColumnMapping {
        ColumnMapping {
            dimensions: vec!["CHANNEL".to_string()],
            ..ColumnMapping::default()
        }
    }

    #[test]
    fn test_records_sorted() {
        let t = table(false);
        assert!(t.records()[0].cut.is_national());
        assert_eq!(t.records()[2].cut, CutId::new(10010));
    }

    #[test]
    fn test_value_column_names() {
        let names: Vec<String> = table(true).value_columns().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec!["TOM_NO_CORR_KF", "TOM_NO_CORR_RTS", "TOM_CORR_KF", "TOM_CORR_RTS"]
        );
        let names: Vec<String> = table(false).value_columns().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["TOM_NO_CORR_RTS", "TOM_CORR_RTS"]);
    }

    #[test]
    fn test_find() {
        let t = table(false);
        let month = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let found = t.find(CutId::NATIONAL, &["BM".to_string()], 5, month).unwrap();
        assert_eq!(found.estimates.corr.unwrap().smoothed, 0.5);
        assert!(t.find(CutId::new(7), &["BM".to_string()], 5, month).is_none());
    }

    #[test]
    fn test_dataframe_has_nulls_for_missing_variant() {
        let df = table(false).to_dataframe(&mapping()).unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(df.column("TOM_NO_CORR_RTS").unwrap().null_count(), 3);
        assert_eq!(df.column("TOM_CORR_RTS").unwrap().null_count(), 0);
        assert_eq!(df.column("MONTH_YEAR").unwrap().dtype(), &DataType::Date);
    }

    #[test]
    fn test_csv_header_and_rows() {
        let mut buffer = Vec::new();
        table(true).write_csv(&mapping(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "CUT_ID,CHANNEL,BIZCATE_CODE,MONTH_YEAR,ASK_COUNT,ASK_WEIGHT,TOM,\
             TOM_NO_CORR_KF,TOM_NO_CORR_RTS,TOM_CORR_KF,TOM_CORR_RTS"
        );
        assert_eq!(lines.next().unwrap(), "1,BM,5,2024-01-01,30,28.5,0.38,,,0.41000000000000003,0.4");
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn test_concat_rejects_mismatched_layout() {
        let a = table(false);
        let b = table(true);
        assert!(ReconciledTable::concat(vec![a.clone(), a.clone()]).is_ok());
        assert!(ReconciledTable::concat(vec![a, b]).is_err());
        assert!(ReconciledTable::concat(vec![]).is_err());
    }
}
