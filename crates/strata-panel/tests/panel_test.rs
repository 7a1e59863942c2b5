//! Integration tests for panel construction and completion.

use chrono::NaiveDate;
use rstest::rstest;
use strata_panel::{CompletionConfig, CutId, Observation, ObservationPanel};

fn month(m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, m, 1).unwrap()
}

fn regional_panel() -> ObservationPanel {
    let mut observations = Vec::new();
    for m in 1..=12 {
        observations.push(Observation::new(
            CutId::NATIONAL,
            vec!["Ecom".to_string(), "75".to_string()],
            449,
            month(m),
            0.30 + 0.01 * m as f64,
            400.0,
            395.0,
        ));
        observations.push(Observation::new(
            CutId::new(10010),
            vec!["Ecom".to_string(), "76".to_string()],
            449,
            month(m),
            0.18,
            40.0,
            41.5,
        ));
        if m % 3 != 0 {
            observations.push(Observation::new(
                CutId::new(10010),
                vec!["Ecom".to_string(), "75".to_string()],
                449,
                month(m),
                0.25,
                35.0,
                33.0,
            ));
        }
    }
    ObservationPanel::new(
        "PERCENT_YES_SPEND",
        vec!["CHANNEL".to_string(), "RETAILER_CODE".to_string()],
        observations,
    )
    .unwrap()
}

#[rstest]
#[case(false, 0.0)]
#[case(true, 40.0)]
fn test_completion_count_policy(#[case] fill_from_siblings: bool, #[case] expected_count: f64) {
    let panel = regional_panel();
    assert_eq!(panel.len(), 12 + 12 + 8);

    let completed = panel.complete(&CompletionConfig {
        fill_counts_from_siblings: fill_from_siblings,
    });
    assert_eq!(completed.len(), 36);

    // Retailer 76 was asked in the same cut and month, never the national row
    let inserted = completed
        .observations()
        .iter()
        .find(|o| o.cut == CutId::new(10010) && o.dimensions[1] == "75" && o.month == month(3))
        .unwrap();
    assert_eq!(inserted.value, 0.0);
    assert_eq!(inserted.sample_count, expected_count);
}

#[test]
fn test_completion_is_idempotent() {
    let config = CompletionConfig::default();
    let once = regional_panel().complete(&config);
    let twice = once.complete(&config);
    assert_eq!(once, twice);
}

#[test]
fn test_cross_cut_index_on_national() {
    let panel = regional_panel();
    let national = panel.national();
    let index = national.index_by_cross_cut();
    assert_eq!(index.len(), 12);

    // Retailer 76 has no national counterpart
    let unmatched = panel
        .finer_cuts()
        .observations()
        .iter()
        .filter(|o| !index.contains_key(&o.cross_cut_key()))
        .count();
    assert_eq!(unmatched, 12);

    for obs in panel
        .finer_cuts()
        .observations()
        .iter()
        .filter(|o| o.dimensions[1] == "75")
    {
        let matched = index.get(&obs.cross_cut_key()).unwrap();
        assert!(matched.cut.is_national());
        assert_eq!(matched.month, obs.month);
    }
}
