//! CSV input and output for the command-line front end.
//!
//! Input tables are read as string columns; typed conversion happens in
//! [`ColumnMapping::panel_from_dataframe`](strata_panel::ColumnMapping) and
//! [`CorrelationMatrix::from_dataframe`], which cast each column as needed.
//! Empty fields become nulls.

use crate::error::{PipelineError, Result};
use polars::prelude::*;
use std::io::{Read, Write};
use strata_covariance::CorrelationMatrix;
use tracing::debug;

/// Read a CSV table with a header row into a `DataFrame` of string columns.
pub fn read_csv<R: Read>(reader: R) -> Result<DataFrame> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return Err(PipelineError::InvalidTable("missing header row".to_string()));
    }

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for record in rdr.records() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(PipelineError::InvalidTable(format!(
                "row {} has {} fields, expected {}",
                columns[0].len() + 1,
                record.len(),
                headers.len()
            )));
        }
        for (column, field) in columns.iter_mut().zip(record.iter()) {
            let field = field.trim();
            column.push((!field.is_empty()).then(|| field.to_string()));
        }
    }

    debug!(
        columns = headers.len(),
        rows = columns[0].len(),
        "read csv table"
    );

    let columns = headers
        .iter()
        .zip(columns)
        .map(|(name, values)| Series::new(name.as_str().into(), values).into())
        .collect::<Vec<Column>>();
    Ok(DataFrame::new(columns)?)
}

/// Read a long-form correlation table written by [`write_correlation_csv`].
pub fn read_correlation_csv<R: Read>(reader: R, category_col: &str) -> Result<CorrelationMatrix> {
    let df = read_csv(reader)?;
    Ok(CorrelationMatrix::from_dataframe(&df, category_col)?)
}

/// Write `matrix` as a long-form table with columns `<category_col>`,
/// `SIMILAR_<category_col>` and `CORRELATION`.
pub fn write_correlation_csv<W: Write>(
    matrix: &CorrelationMatrix,
    category_col: &str,
    writer: W,
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        category_col.to_string(),
        format!("SIMILAR_{category_col}"),
        "CORRELATION".to_string(),
    ])?;
    for entry in matrix.to_entries() {
        wtr.write_record([
            entry.category.to_string(),
            entry.similar_category.to_string(),
            entry.correlation.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use polars::prelude::DataType;

    #[test]
    fn test_read_csv_keeps_nulls() {
        let csv = "CUT_ID,BIZCATE_CODE,TOM\n1,102,0.4\n1,117,\n";
        let df = read_csv(csv.as_bytes()).unwrap();

        assert_eq!(df.height(), 2);
        assert_eq!(df.get_column_names().len(), 3);
        let tom = df.column("TOM").unwrap().cast(&DataType::Float64).unwrap();
        let tom = tom.f64().unwrap();
        assert_eq!(tom.get(0), Some(0.4));
        assert_eq!(tom.get(1), None);
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let result = read_csv("A,B\n1,2\n3\n".as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn test_correlation_csv_round_trip() {
        let matrix = CorrelationMatrix::new(
            vec![102, 117],
            ndarray::array![[1.0, 0.36], [0.36, 1.0]],
        )
        .unwrap();

        let mut buffer = Vec::new();
        write_correlation_csv(&matrix, "BIZCATE_CODE", &mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("BIZCATE_CODE,SIMILAR_BIZCATE_CODE,CORRELATION\n102,102,1\n"));

        let back = read_correlation_csv(buffer.as_slice(), "BIZCATE_CODE").unwrap();
        assert_eq!(back.categories(), &[102, 117]);
        assert_abs_diff_eq!(back.get(117, 102).unwrap(), 0.36);
    }
}
