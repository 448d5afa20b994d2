//! Configuration for the BME window agent.

use crate::collector::line_source::DEFAULT_CHANNEL_CAPACITY;
use crate::collector::schema::DEFAULT_SENSOR_COUNT;
use crate::core::pipeline::{PipelineConfig, PipelineError};
use crate::core::windowing::{secs_to_duration, ValidityPolicy, WindowParams};
use crate::stream::worker::{StreamConfig, DEFAULT_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// How the gap that splits blocks is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GapThreshold {
    /// A fixed number of seconds
    Fixed { secs: f64 },
    /// A multiple of the nominal sampling interval
    SampleMultiple { interval_secs: f64, multiple: f64 },
}

impl GapThreshold {
    pub fn secs(&self) -> f64 {
        match *self {
            GapThreshold::Fixed { secs } => secs,
            GapThreshold::SampleMultiple {
                interval_secs,
                multiple,
            } => interval_secs * multiple,
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        secs_to_duration(self.secs())
    }
}

impl Default for GapThreshold {
    fn default() -> Self {
        GapThreshold::Fixed { secs: 10.0 }
    }
}

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window_size_secs: f64,
    pub stride_secs: f64,
    pub gap_threshold: GapThreshold,
    pub validity: ValidityPolicy,

    /// Wall-clock length of one streaming batch
    #[serde(with = "duration_serde")]
    pub batch_length: Duration,

    pub sensor_count: u8,

    /// Explicit feature selection; `None` means the default set
    pub feature_names: Option<Vec<String>>,

    /// Persisted label table
    pub label_store_path: PathBuf,

    /// Path for storing state and stream statistics
    pub data_path: PathBuf,

    /// Path for feature tables
    pub export_path: PathBuf,

    /// Path of the trained model
    pub model_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bme-window-agent");

        Self {
            window_size_secs: 5.0,
            stride_secs: 1.0,
            gap_threshold: GapThreshold::default(),
            validity: ValidityPolicy::default(),
            batch_length: Duration::from_secs(5),
            sensor_count: DEFAULT_SENSOR_COUNT,
            feature_names: None,
            label_store_path: data_dir.join("Label_Encoder.csv"),
            export_path: data_dir.join("exports"),
            model_path: data_dir.join("model.json"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bme-window-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Path of the persisted stream statistics.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stream_stats.json")
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window_params()?;
        if self.gap_threshold.duration().is_none() {
            return Err(ConfigError::Invalid(format!(
                "gap threshold must be positive (got {}s)",
                self.gap_threshold.secs()
            )));
        }
        match self.validity {
            ValidityPolicy::MinCoverageFraction(f) if !(f > 0.0 && f <= 1.0) => {
                return Err(ConfigError::Invalid(format!(
                    "coverage fraction must be in (0, 1] (got {f})"
                )));
            }
            _ => {}
        }
        if self.batch_length.is_zero() {
            return Err(ConfigError::Invalid("batch length must be positive".into()));
        }
        if self.sensor_count == 0 {
            return Err(ConfigError::Invalid("sensor count must be at least 1".into()));
        }
        Ok(())
    }

    pub fn window_params(&self) -> Result<WindowParams, ConfigError> {
        WindowParams::from_secs(self.window_size_secs, self.stride_secs)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        self.validate()?;
        let gap = self.gap_threshold.duration().ok_or_else(|| {
            ConfigError::Invalid(format!("invalid gap threshold {}s", self.gap_threshold.secs()))
        })?;
        let config = PipelineConfig::new(self.window_size_secs, self.stride_secs, gap)
            .map_err(|e: PipelineError| ConfigError::Invalid(e.to_string()))?;
        Ok(config.with_validity(self.validity))
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            batch_length: self.batch_length,
            poll_interval: DEFAULT_POLL_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            flush_on_close: false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window_size_secs, 5.0);
        assert_eq!(config.stride_secs, 1.0);
        assert_eq!(config.batch_length, Duration::from_secs(5));
        assert_eq!(config.sensor_count, 8);
        assert_eq!(config.gap_threshold.secs(), 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gap_threshold_strategies() {
        let multiple = GapThreshold::SampleMultiple {
            interval_secs: 1.5,
            multiple: 3.0,
        };
        assert_eq!(multiple.secs(), 4.5);
        assert_eq!(multiple.duration(), Some(chrono::Duration::milliseconds(4500)));
        assert_eq!(GapThreshold::Fixed { secs: 0.0 }.duration(), None);
    }

    #[test]
    fn test_validation() {
        let mut config = Config {
            stride_secs: 0.0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.stride_secs = 1.0;
        config.validity = ValidityPolicy::MinCoverageFraction(1.5);
        assert!(config.validate().is_err());

        config.validity = ValidityPolicy::MinRowCount(3);
        assert!(config.validate().is_ok());

        config.batch_length = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"window_size_secs": 8.0, "batch_length": 2.5,
                "validity": {"policy": "min_row_count", "value": 4},
                "gap_threshold": {"kind": "sample_multiple", "interval_secs": 1.0, "multiple": 3.0}}"#,
        )
        .unwrap();
        assert_eq!(config.window_size_secs, 8.0);
        assert_eq!(config.stride_secs, 1.0);
        assert_eq!(config.batch_length, Duration::from_millis(2500));
        assert_eq!(config.validity, ValidityPolicy::MinRowCount(4));
        assert_eq!(config.gap_threshold.secs(), 3.0);
    }

    #[test]
    fn test_pipeline_config() {
        let config = Config::default();
        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.window.size(), chrono::Duration::seconds(5));
        assert_eq!(pipeline.gap_threshold, chrono::Duration::seconds(10));
    }
}
