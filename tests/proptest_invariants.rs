//! Property tests for segmentation, windowing and aggregation

#![forbid(unsafe_code)]

use bme_window_agent::collector::{RawLabel, Reading};
use bme_window_agent::core::{segment, ValidityPolicy, WindowGenerator, WindowParams};
use bme_window_agent::stream::PredictionSummary;
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

const MIN_PROPTEST_CASES: u32 = 256;

fn proptest_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|parsed| parsed.max(MIN_PROPTEST_CASES))
        .unwrap_or(MIN_PROPTEST_CASES)
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn readings_from(samples: &[(Option<i64>, i64)]) -> Vec<Reading> {
    samples
        .iter()
        .map(|&(offset_ms, label)| {
            Reading::new(
                offset_ms.map(|ms| base() + Duration::milliseconds(ms)),
                Some(RawLabel::Int(label)),
            )
        })
        .collect()
}

fn sample_strategy() -> impl Strategy<Value = Vec<(Option<i64>, i64)>> {
    prop::collection::vec((prop::option::weighted(0.95, 0i64..60_000), 0i64..3), 0..120)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_cases(),
        .. ProptestConfig::default()
    })]

    #[test]
    fn segmentation_partitions_timed_readings(
        samples in sample_strategy(),
        gap_ms in 500i64..15_000,
    ) {
        let readings = readings_from(&samples);
        let gap = Duration::milliseconds(gap_ms);
        let blocks = segment(&readings, gap);

        let timed = readings.iter().filter(|r| r.timestamp.is_some()).count();
        let placed: usize = blocks.iter().map(|b| b.len()).sum();
        prop_assert_eq!(placed, timed);

        for block in &blocks {
            prop_assert!(!block.is_empty());
            let times: Vec<DateTime<Utc>> = block.readings().iter().filter_map(|r| r.timestamp).collect();
            prop_assert_eq!(times.len(), block.len());
            for pair in times.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
                prop_assert!(pair[1] - pair[0] <= gap);
            }
        }
        for pair in blocks.windows(2) {
            prop_assert!(pair[1].start() - pair[0].end() > gap);
        }
    }

    #[test]
    fn windows_stay_inside_their_block(
        samples in sample_strategy(),
        size_ms in 1_000i64..8_000,
        stride_ms in 200i64..3_000,
        coverage in 0.1f64..1.0,
    ) {
        let readings = readings_from(&samples);
        let params = WindowParams::from_secs(size_ms as f64 / 1000.0, stride_ms as f64 / 1000.0).unwrap();
        let generator = WindowGenerator::new(params, ValidityPolicy::MinCoverageFraction(coverage));

        for block in segment(&readings, Duration::seconds(10)) {
            let mut seen = 0;
            for candidate in generator.candidates(&block) {
                seen += 1;
                prop_assert!(candidate.start >= block.start());
                prop_assert!(candidate.start + params.size() <= block.end());

                if let Ok(window) = candidate.verdict {
                    prop_assert!(!window.is_empty());
                    prop_assert_eq!(window.end, window.start + params.size());
                    for reading in window.readings {
                        let ts = reading.timestamp.unwrap();
                        prop_assert!(ts >= window.start && ts < window.end);
                        prop_assert_eq!(reading.label.as_ref(), Some(&window.label));
                    }
                }
            }
            prop_assert_eq!(seen, generator.count_candidates(&block));
        }
    }

    #[test]
    fn aggregation_shares_are_consistent(
        predictions in prop::collection::vec(prop::sample::select(vec!["A", "B", "C", "D"]), 1..60),
    ) {
        let summary = PredictionSummary::from_predictions(&predictions).unwrap();

        prop_assert_eq!(summary.total(), predictions.len());
        let counted: usize = summary.shares().iter().map(|s| s.count).sum();
        prop_assert_eq!(counted, predictions.len());

        let percent: f64 = summary.shares().iter().map(|s| s.percent).sum();
        prop_assert!((percent - 100.0).abs() < 1e-6);

        let top = &summary.shares()[0];
        prop_assert!(summary.shares().iter().all(|s| s.count <= top.count));
        prop_assert_eq!(summary.majority(), top.label.as_str());
    }
}
