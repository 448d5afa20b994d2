//! The classifier seam and a nearest-centroid reference model.
//!
//! The stream only ever calls [`Classifier::predict`]; any model that maps a
//! feature set to a class name can be plugged in. [`CentroidClassifier`] is the
//! model the command line trains and loads.

use crate::core::pipeline::{FeatureVector, Features};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Errors from fitting, predicting, or persisting a classifier.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier has not been fitted")]
    NotFitted,
    #[error("no training samples")]
    EmptyTrainingSet,
    #[error("expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("no feature is comparable with any class")]
    NoComparableFeatures,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("model format error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A model mapping feature values to class names.
pub trait Classifier: Send + Sync {
    fn fit(&mut self, samples: &[FeatureVector]) -> Result<(), ClassifierError>;

    fn predict(&self, features: &Features) -> Result<String, ClassifierError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Centroid {
    label: String,
    samples: usize,
    mean: Vec<f64>,
}

/// Nearest class centroid after per-feature standardisation.
///
/// NaN values are left out of both the centroid means and the distances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CentroidClassifier {
    feature_names: Vec<String>,
    scale: Vec<f64>,
    centroids: Vec<Centroid>,
}

impl CentroidClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Class names the model knows, in training order.
    pub fn classes(&self) -> Vec<&str> {
        self.centroids.iter().map(|c| c.label.as_str()).collect()
    }

    pub fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn column(samples: &[FeatureVector], index: usize) -> Vec<f64> {
        samples
            .iter()
            .filter_map(|s| s.features.values().nth(index))
            .filter(|v| v.is_finite())
            .collect()
    }
}

impl Classifier for CentroidClassifier {
    fn fit(&mut self, samples: &[FeatureVector]) -> Result<(), ClassifierError> {
        let first = samples.first().ok_or(ClassifierError::EmptyTrainingSet)?;
        let feature_names: Vec<String> = first.features.names().map(str::to_string).collect();
        let dims = feature_names.len();

        if let Some(bad) = samples.iter().find(|s| s.features.len() != dims) {
            return Err(ClassifierError::DimensionMismatch {
                expected: dims,
                actual: bad.features.len(),
            });
        }

        let scale: Vec<f64> = (0..dims)
            .map(|i| {
                let values = Self::column(samples, i);
                let sd = if values.is_empty() {
                    f64::NAN
                } else {
                    values.population_std_dev()
                };
                if sd.is_finite() && sd > 0.0 {
                    sd
                } else {
                    1.0
                }
            })
            .collect();

        // Group in first-seen order
        let mut order: Vec<&str> = Vec::new();
        let mut groups: BTreeMap<&str, Vec<FeatureVector>> = BTreeMap::new();
        for sample in samples {
            let label = sample.label.as_str();
            if !groups.contains_key(label) {
                order.push(label);
            }
            groups.entry(label).or_default().push(sample.clone());
        }

        let centroids = order
            .into_iter()
            .map(|label| {
                let members = &groups[label];
                let mean = (0..dims)
                    .map(|i| {
                        let values = Self::column(members, i);
                        if values.is_empty() {
                            f64::NAN
                        } else {
                            values.mean()
                        }
                    })
                    .collect();
                Centroid {
                    label: label.to_string(),
                    samples: members.len(),
                    mean,
                }
            })
            .collect::<Vec<_>>();

        info!(
            samples = samples.len(),
            classes = centroids.len(),
            features = dims,
            "centroid classifier fitted"
        );
        self.feature_names = feature_names;
        self.scale = scale;
        self.centroids = centroids;
        Ok(())
    }

    fn predict(&self, features: &Features) -> Result<String, ClassifierError> {
        if !self.is_fitted() {
            return Err(ClassifierError::NotFitted);
        }
        if features.len() != self.feature_names.len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.feature_names.len(),
                actual: features.len(),
            });
        }

        let values: Vec<f64> = self
            .feature_names
            .iter()
            .map(|name| features.get(name).unwrap_or(f64::NAN))
            .collect();

        let mut best: Option<(f64, &str)> = None;
        for centroid in &self.centroids {
            let mut sum = 0.0;
            let mut used = 0usize;
            for ((value, mean), scale) in values.iter().zip(&centroid.mean).zip(&self.scale) {
                if value.is_finite() && mean.is_finite() {
                    let z = (value - mean) / scale;
                    sum += z * z;
                    used += 1;
                }
            }
            if used == 0 {
                continue;
            }
            let distance = sum / used as f64;
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, centroid.label.as_str()));
            }
        }

        best.map(|(_, label)| label.to_string())
            .ok_or(ClassifierError::NoComparableFeatures)
    }
}
