//! Pipeline runs over CSV input.

use std::fmt::Write as _;
use std::sync::Arc;
use strata::table::{read_correlation_csv, read_csv, write_correlation_csv};
use strata::smoothing::PartitionHook;
use strata::{CorrelationMode, CutId, Pipeline, PipelineConfig, ProgressHook, similarity_check};

const HEADER: &str = "CUT_ID,CHANNEL,BIZCATE_CODE,MONTH_YEAR,ASK_COUNT,ASK_WEIGHT,TOTALTHINK,AVG_SPEND";

fn input_csv() -> String {
    let wobble_a = [0.0, 0.02, -0.01, 0.015, -0.02, 0.01];
    let wobble_b = [0.01, -0.005, 0.02, -0.015, 0.0, 0.012];

    let mut csv = format!("{HEADER}\n");
    for channel in ["BM", "ECOM"] {
        for cut in [1, 10010] {
            for (category, wobble) in [(102, wobble_a), (117, wobble_b)] {
                for m in 1..=12usize {
                    let level = if cut == 1 { 0.45 } else { 0.38 };
                    let shift = if category == 117 { 0.1 } else { 0.0 };
                    let think = level + shift + wobble[(m - 1) % 6];
                    let spend = 120.0 + 40.0 * think;
                    let count = if cut == 1 { 900 } else { 75 };
                    // one cut row with no TOTALTHINK answer
                    let think = if cut == 10010 && category == 117 && m == 3 {
                        String::new()
                    } else {
                        think.to_string()
                    };
                    writeln!(
                        csv,
                        "{cut},{channel},{category},2024-{m:02}-01,{count},{},{think},{spend}",
                        count as f64 * 0.98
                    )
                    .unwrap();
                }
            }
        }
    }
    csv
}

fn config() -> PipelineConfig {
    PipelineConfig::from_json_str(
        r#"{
            "columns": { "dimensions": ["CHANNEL"] },
            "correlation": { "min_periods": 6 },
            "metrics": [
                { "metric": "TOTALTHINK", "transform": { "kind": "logit" }, "clip": { "min": 0.0, "max": 1.0 } },
                { "metric": "AVG_SPEND", "process_std": 0.5, "variants": ["correlated"] }
            ],
            "stratify_by": "CHANNEL"
        }"#,
    )
    .unwrap()
}

#[test]
fn test_correlation_from_csv_panel() {
    let frame = read_csv(input_csv().as_bytes()).unwrap();
    let pipeline = Pipeline::new(config()).unwrap();
    let matrix = pipeline.build_correlation(&frame, "TOTALTHINK").unwrap();

    assert_eq!(matrix.categories(), &[102, 117]);
    assert_eq!(matrix.get(102, 102), Some(1.0));
    let r2 = matrix.get(102, 117).unwrap();
    assert!((0.0..=1.0).contains(&r2));

    let mut buffer = Vec::new();
    write_correlation_csv(&matrix, "BIZCATE_CODE", &mut buffer).unwrap();
    let back = read_correlation_csv(buffer.as_slice(), "BIZCATE_CODE").unwrap();
    assert_eq!(back.categories(), matrix.categories());
}

#[test]
fn test_configured_run_reconciles_every_metric() {
    let frame = read_csv(input_csv().as_bytes()).unwrap();
    let pipeline = Pipeline::new(config()).unwrap();
    let correlation = Arc::new(pipeline.build_correlation(&frame, "TOTALTHINK").unwrap());

    let planned = pipeline.planned_partitions(&frame).unwrap();
    // two metrics, two channels, national and one finer cut
    assert_eq!(planned, 8);
    let progress = Arc::new(ProgressHook::new(planned));
    let hooks: Vec<Arc<dyn PartitionHook>> = vec![progress.clone()];

    let tables = pipeline.run(&frame, correlation, &hooks).unwrap();
    assert_eq!(progress.completed(), planned);
    assert_eq!(tables.len(), 2);

    let think = &tables[0];
    assert_eq!(think.metric(), "TOTALTHINK");
    // the unanswered row is skipped
    assert_eq!(think.len(), 95);
    for record in think.records() {
        let smoothed = record.estimates.corr.unwrap().smoothed;
        assert!((0.0..=1.0).contains(&smoothed));
    }
    assert!(
        think
            .find(CutId::new(10010), &["ECOM".to_string()], 117, month(3))
            .is_none()
    );
    assert!(similarity_check(think, CorrelationMode::Correlated, 0.10).passed());

    let spend = &tables[1];
    assert_eq!(spend.len(), 96);
    assert!(spend.records().iter().all(|r| r.estimates.no_corr.is_none()));

    let mut out = Vec::new();
    spend.write_csv(&pipeline.config().columns, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(
        text.lines().next().unwrap(),
        "CUT_ID,CHANNEL,BIZCATE_CODE,MONTH_YEAR,ASK_COUNT,ASK_WEIGHT,AVG_SPEND,AVG_SPEND_CORR_RTS"
    );
    assert_eq!(text.lines().count(), 97);
}

#[test]
fn test_unknown_metric_column_fails() {
    let frame = read_csv(input_csv().as_bytes()).unwrap();
    let pipeline = Pipeline::new(config()).unwrap();
    assert!(pipeline.build_correlation(&frame, "TOM").is_err());
}

fn month(m: u32) -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(2024, m, 1).unwrap()
}
