//! Feature computation over window readings.
//!
//! Every feature is a `(measurement, sensor, statistic)` triple named
//! `{Measurement}_{Statistic}_Sensor{n}`. The name space is a fixed table
//! built once; each entry maps to a small pure function over the channel's
//! values. A feature that cannot be computed becomes NaN without affecting the
//! others.

use crate::collector::schema::Measurement;
use crate::collector::types::{ChannelValue, Reading};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Number of decimal digits kept in feature values.
pub const FEATURE_PRECISION: i32 = 2;

/// Aggregate computed over a channel within a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Statistic {
    Mean,
    StdDev,
    Min,
    Max,
}

impl Statistic {
    pub const ALL: [Statistic; 4] = [
        Statistic::Mean,
        Statistic::StdDev,
        Statistic::Min,
        Statistic::Max,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Statistic::Mean => "Mean",
            Statistic::StdDev => "StdDev",
            Statistic::Min => "Min",
            Statistic::Max => "Max",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Apply to a non-empty slice of finite values.
    ///
    /// Standard deviation is the population form (divides by n).
    pub fn apply(self, values: &[f64]) -> f64 {
        match self {
            Statistic::Mean => values.mean(),
            Statistic::StdDev => values.population_std_dev(),
            Statistic::Min => values.min(),
            Statistic::Max => values.max(),
        }
    }
}

/// One entry of the feature name space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub measurement: Measurement,
    pub statistic: Statistic,
    pub sensor: u8,
}

impl FeatureSpec {
    pub fn new(measurement: Measurement, statistic: Statistic, sensor: u8) -> Self {
        Self {
            measurement,
            statistic,
            sensor,
        }
    }

    /// Parse `Temperature_Mean_Sensor3`.
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.splitn(3, '_');
        let measurement = Measurement::from_name(parts.next()?)?;
        let statistic = Statistic::from_name(parts.next()?)?;
        let sensor = parts.next()?.strip_prefix("Sensor")?.parse::<u8>().ok()?;
        if sensor == 0 {
            return None;
        }
        Some(Self::new(measurement, statistic, sensor))
    }

    pub fn name(&self) -> String {
        format!(
            "{}_{}_Sensor{}",
            self.measurement.name(),
            self.statistic.name(),
            self.sensor
        )
    }

    /// Data column this feature reads.
    pub fn column(&self) -> String {
        self.measurement.column(self.sensor)
    }

    /// The default name space: the four mandatory measurements for every sensor.
    pub fn default_set(sensor_count: u8) -> Vec<FeatureSpec> {
        Self::cross_product(&Measurement::MANDATORY, sensor_count)
    }

    /// Every recognised feature, including gas index aggregates.
    pub fn full_set(sensor_count: u8) -> Vec<FeatureSpec> {
        Self::cross_product(&Measurement::ALL, sensor_count)
    }

    fn cross_product(measurements: &[Measurement], sensor_count: u8) -> Vec<FeatureSpec> {
        let mut specs = Vec::with_capacity(measurements.len() * sensor_count as usize * 4);
        for &measurement in measurements {
            for sensor in 1..=sensor_count {
                for statistic in Statistic::ALL {
                    specs.push(FeatureSpec::new(measurement, statistic, sensor));
                }
            }
        }
        specs
    }
}

impl fmt::Display for FeatureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Reasons a single feature could not be computed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("column {0} is absent from the window")]
    MissingColumn(String),
    #[error("column {0} has no numeric values in the window")]
    AllNull(String),
    #[error("column {0} holds non-numeric values")]
    TypeMismatch(String),
}

/// Round to the fixed output precision.
pub fn round_value(value: f64) -> f64 {
    let scale = 10f64.powi(FEATURE_PRECISION);
    (value * scale).round() / scale
}

/// Computes a fixed, ordered selection of features.
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    specs: Vec<FeatureSpec>,
    names: Vec<String>,
}

impl FeatureEngine {
    /// Build from explicit specs.
    pub fn new(specs: Vec<FeatureSpec>) -> Self {
        let names = specs.iter().map(FeatureSpec::name).collect();
        Self { specs, names }
    }

    /// Build from feature names. Unrecognised names are skipped with a warning.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut specs = Vec::new();
        for name in names {
            let name = name.as_ref();
            match FeatureSpec::parse(name) {
                Some(spec) if !specs.contains(&spec) => specs.push(spec),
                Some(_) => debug!(feature = name, "duplicate feature name ignored"),
                None => warn!(feature = name, "unknown feature name ignored"),
            }
        }
        Self::new(specs)
    }

    /// The default selection for a board.
    pub fn default_for(sensor_count: u8) -> Self {
        Self::new(FeatureSpec::default_set(sensor_count))
    }

    pub fn specs(&self) -> &[FeatureSpec] {
        &self.specs
    }

    /// Output names, in computation order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Compute every selected feature over the readings.
    ///
    /// Values are rounded to two decimals; failures become NaN.
    pub fn compute(&self, readings: &[&Reading]) -> Vec<f64> {
        self.specs
            .iter()
            .map(|spec| match compute_one(spec, readings) {
                Ok(value) => round_value(value),
                Err(e) => {
                    debug!(feature = %spec, error = %e, "feature set to NaN");
                    f64::NAN
                }
            })
            .collect()
    }
}

/// Compute a single feature.
pub fn compute_one(spec: &FeatureSpec, readings: &[&Reading]) -> Result<f64, FeatureError> {
    let column = spec.column();
    let values = channel_values(&column, readings)?;
    Ok(spec.statistic.apply(&values))
}

/// Finite numeric values of a column; NaN entries are skipped like pandas does.
fn channel_values(column: &str, readings: &[&Reading]) -> Result<Vec<f64>, FeatureError> {
    let mut seen = false;
    let mut values = Vec::with_capacity(readings.len());

    for reading in readings {
        match reading.channel(column) {
            Some(ChannelValue::Number(v)) => {
                seen = true;
                if v.is_finite() {
                    values.push(*v);
                }
            }
            Some(ChannelValue::Status(_)) => {
                return Err(FeatureError::TypeMismatch(column.to_string()));
            }
            None => {}
        }
    }

    if !seen {
        return Err(FeatureError::MissingColumn(column.to_string()));
    }
    if values.is_empty() {
        return Err(FeatureError::AllNull(column.to_string()));
    }
    Ok(values)
}
