//! The windowed feature pipeline.
//!
//! One call takes a reading sequence through segmentation, windowing, feature
//! computation, and label resolution. The same pipeline serves offline files
//! and every streaming batch; it keeps no state between calls.

use crate::collector::schema::ChannelSchema;
use crate::collector::types::Reading;
use crate::core::features::FeatureEngine;
use crate::core::segmentation::segment;
use crate::core::windowing::{ValidityPolicy, WindowError, WindowGenerator, WindowParams};
use crate::labels::LabelCatalog;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

/// Failures that abort a whole pipeline call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("no reading carries a parseable timestamp")]
    NoTimeSignal,
    #[error("missing mandatory channels: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("invalid window parameters: {0}")]
    InvalidWindow(#[from] WindowError),
}

/// Named feature values in computation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features(Vec<(String, f64)>);

impl Features {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        Self(pairs.into_iter().collect())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.0.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Features of one valid window with its start time and class name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub start: DateTime<Utc>,
    pub label: String,
    pub features: Features,
}

/// Tabular pipeline output: shared column names plus one row per window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<FeatureVector>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parameters fixed for one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub window: WindowParams,
    pub gap_threshold: Duration,
    pub validity: ValidityPolicy,
}

impl PipelineConfig {
    pub fn new(
        window_size_secs: f64,
        stride_secs: f64,
        gap_threshold: Duration,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            window: WindowParams::from_secs(window_size_secs, stride_secs)?,
            gap_threshold,
            validity: ValidityPolicy::default(),
        })
    }

    pub fn with_validity(mut self, validity: ValidityPolicy) -> Self {
        self.validity = validity;
        self
    }
}

/// Progress callback: `(candidates_done, candidates_total)`.
pub type Progress<'p> = &'p mut dyn FnMut(usize, usize);

/// Segmenter, window generator, feature engine, and label catalog in one call.
#[derive(Debug, Clone)]
pub struct WindowedPipeline {
    config: PipelineConfig,
    generator: WindowGenerator,
    engine: FeatureEngine,
    schema: ChannelSchema,
}

impl WindowedPipeline {
    pub fn new(config: PipelineConfig, engine: FeatureEngine, schema: ChannelSchema) -> Self {
        Self {
            generator: WindowGenerator::new(config.window, config.validity),
            config,
            engine,
            schema,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &FeatureEngine {
        &self.engine
    }

    pub fn schema(&self) -> &ChannelSchema {
        &self.schema
    }

    /// Check that every mandatory channel appears in at least one reading.
    pub fn check_channels(&self, readings: &[Reading]) -> Result<(), PipelineError> {
        if readings.is_empty() {
            return Ok(());
        }
        let present: HashSet<&str> = readings
            .iter()
            .flat_map(|r| r.channels.keys().map(String::as_str))
            .collect();
        let missing: Vec<String> = self
            .schema
            .required_channels()
            .into_iter()
            .filter(|c| !present.contains(c.as_str()))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::MissingColumns(missing))
        }
    }

    /// Offline entry point: precondition check, then [`run`](Self::run).
    pub fn process(
        &self,
        readings: &[Reading],
        catalog: &LabelCatalog,
        progress: Option<Progress<'_>>,
    ) -> Result<Vec<FeatureVector>, PipelineError> {
        self.check_channels(readings)?;
        self.run(readings, catalog, progress)
    }

    /// Like [`process`](Self::process) without progress, returning a table.
    pub fn process_batch(
        &self,
        readings: &[Reading],
        catalog: &LabelCatalog,
    ) -> Result<FeatureTable, PipelineError> {
        let rows = self.process(readings, catalog, None)?;
        Ok(FeatureTable {
            columns: self.engine.names().to_vec(),
            rows,
        })
    }

    /// Convert readings into feature vectors, in block then window order.
    ///
    /// An empty input yields no vectors. A non-empty input in which no reading
    /// has a timestamp fails with [`PipelineError::NoTimeSignal`].
    pub fn run(
        &self,
        readings: &[Reading],
        catalog: &LabelCatalog,
        mut progress: Option<Progress<'_>>,
    ) -> Result<Vec<FeatureVector>, PipelineError> {
        if readings.is_empty() {
            return Ok(Vec::new());
        }
        let untimed = readings.iter().filter(|r| r.timestamp.is_none()).count();
        if untimed == readings.len() {
            return Err(PipelineError::NoTimeSignal);
        }
        if untimed > 0 {
            debug!(untimed, "readings without a timestamp left out");
        }

        let blocks = segment(readings, self.config.gap_threshold);
        let total: usize = blocks
            .iter()
            .map(|b| self.generator.count_candidates(b))
            .sum();

        let mut vectors = Vec::new();
        let mut done = 0;

        for (index, block) in blocks.iter().enumerate() {
            let before = vectors.len();
            for candidate in self.generator.candidates(block) {
                done += 1;
                match candidate.verdict {
                    Ok(window) => {
                        let values = self.engine.compute(window.readings);
                        let label = catalog.resolve(&window.label);
                        let features = Features::from_pairs(
                            self.engine.names().iter().cloned().zip(values),
                        );
                        vectors.push(FeatureVector {
                            start: window.start,
                            label,
                            features,
                        });
                    }
                    Err(rejection) => {
                        debug!(start = %candidate.start, ?rejection, "window skipped");
                    }
                }
                if let Some(report) = progress.as_deref_mut() {
                    report(done, total);
                }
            }
            debug!(
                block = index,
                readings = block.len(),
                windows = vectors.len() - before,
                "block processed"
            );
        }

        info!(
            readings = readings.len(),
            blocks = blocks.len(),
            candidates = total,
            vectors = vectors.len(),
            "pipeline run complete"
        );
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::{ChannelValue, RawLabel};
    use chrono::TimeZone;

    fn pipeline() -> WindowedPipeline {
        let config = PipelineConfig::new(5.0, 1.0, Duration::seconds(10)).unwrap();
        let engine = FeatureEngine::from_names(["Temperature_Mean_Sensor1"]);
        WindowedPipeline::new(config, engine, ChannelSchema::new(1))
    }

    fn full_reading(secs: i64, label: i64) -> Reading {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut reading = Reading::new(Some(base + Duration::seconds(secs)), Some(RawLabel::Int(label)));
        for column in ChannelSchema::new(1).required_channels() {
            let value = if column.ends_with("_Status") {
                ChannelValue::Status("OK".into())
            } else {
                ChannelValue::Number(secs as f64)
            };
            reading = reading.with_channel(column, value);
        }
        reading
    }

    #[test]
    fn test_invalid_window_parameters() {
        let err = PipelineConfig::new(5.0, -1.0, Duration::seconds(10)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidWindow(_)));
    }

    #[test]
    fn test_empty_input_is_not_an_error() {
        let catalog = LabelCatalog::in_memory();
        assert!(pipeline().run(&[], &catalog, None).unwrap().is_empty());
    }

    #[test]
    fn test_no_time_signal() {
        let catalog = LabelCatalog::in_memory();
        let readings = vec![Reading::new(None, Some(RawLabel::Int(1)))];
        assert_eq!(
            pipeline().run(&readings, &catalog, None),
            Err(PipelineError::NoTimeSignal)
        );
    }

    #[test]
    fn test_missing_channels_are_enumerated() {
        let catalog = LabelCatalog::in_memory();
        let readings = vec![Reading::new(None, None).with_channel(
            "Sensor1_Temperature_deg_C",
            ChannelValue::Number(1.0),
        )];
        match pipeline().process(&readings, &catalog, None) {
            Err(PipelineError::MissingColumns(cols)) => {
                assert_eq!(cols.len(), 4);
                assert!(cols.contains(&"Sensor1_Status".to_string()));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_progress_reaches_total() {
        let catalog = LabelCatalog::in_memory();
        let readings: Vec<Reading> = (0..=12).map(|s| full_reading(s, 1)).collect();
        let mut calls = Vec::new();
        let mut record = |done: usize, total: usize| calls.push((done, total));

        let vectors = pipeline()
            .process(&readings, &catalog, Some(&mut record))
            .unwrap();
        assert_eq!(vectors.len(), 8);
        assert_eq!(calls.len(), 8);
        assert_eq!(calls.last(), Some(&(8, 8)));
    }

    #[test]
    fn test_progress_counts_rejected_candidates() {
        let catalog = LabelCatalog::in_memory();
        // Label change at 6s plus a gap after 12s
        let mut readings: Vec<Reading> = (0..=12)
            .map(|s| full_reading(s, if s < 6 { 1 } else { 2 }))
            .collect();
        readings.extend((30..=36).map(|s| full_reading(s, 2)));
        let pipeline = pipeline();

        let generator = WindowGenerator::new(pipeline.config().window, pipeline.config().validity);
        let expected: usize = segment(&readings, pipeline.config().gap_threshold)
            .iter()
            .map(|b| generator.count_candidates(b))
            .sum();

        let mut calls = Vec::new();
        let mut record = |done: usize, total: usize| calls.push((done, total));
        let with_progress = pipeline
            .process(&readings, &catalog, Some(&mut record))
            .unwrap();
        let without_progress = pipeline.process(&readings, &catalog, None).unwrap();

        assert_eq!(expected, 10);
        assert_eq!(with_progress.len(), 6);
        assert!(calls.len() > with_progress.len());
        assert_eq!(calls.len(), expected);
        let dones: Vec<usize> = calls.iter().map(|&(done, _)| done).collect();
        assert_eq!(dones, (1..=expected).collect::<Vec<_>>());
        assert!(calls.iter().all(|&(_, total)| total == expected));
        assert_eq!(with_progress, without_progress);
    }

    #[test]
    fn test_process_batch_table() {
        let catalog = LabelCatalog::in_memory();
        let readings: Vec<Reading> = (0..=5).map(|s| full_reading(s, 3)).collect();
        let table = pipeline().process_batch(&readings, &catalog).unwrap();

        assert_eq!(table.columns, vec!["Temperature_Mean_Sensor1".to_string()]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].label, "3");
        assert_eq!(table.rows[0].features.get("Temperature_Mean_Sensor1"), Some(2.0));
    }
}
