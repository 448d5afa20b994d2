//! Reading types shared by the offline and streaming paths.
//!
//! A [`Reading`] is one sample of the whole sensor array: a wall-clock timestamp,
//! the raw label the operator tagged it with, the heater profile, and one value
//! per channel column.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A raw label as it appears in the data, normalized.
///
/// Anything that parses as a number becomes an integer key (`"1.0"` and `1`
/// are the same label); everything else is kept as trimmed text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawLabel {
    Int(i64),
    Text(String),
}

impl RawLabel {
    /// Normalize a raw field. Empty fields and `nan` are treated as absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
            return None;
        }

        // Numbers outside the i64 range stay text
        const LOWER: f64 = i64::MIN as f64;
        const UPPER: f64 = 9_223_372_036_854_775_808.0;
        match trimmed.parse::<f64>().map(f64::trunc) {
            Ok(value) if (LOWER..UPPER).contains(&value) => Some(RawLabel::Int(value as i64)),
            _ => Some(RawLabel::Text(trimmed.to_string())),
        }
    }
}

impl fmt::Display for RawLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawLabel::Int(v) => write!(f, "{v}"),
            RawLabel::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RawLabel {
    fn from(value: i64) -> Self {
        RawLabel::Int(value)
    }
}

impl From<&str> for RawLabel {
    fn from(value: &str) -> Self {
        RawLabel::parse(value).unwrap_or_else(|| RawLabel::Text(String::new()))
    }
}

/// Value of a single channel column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    /// Numeric measurement. NaN marks a value that failed numeric coercion.
    Number(f64),
    /// Sensor status or any other non-numeric field.
    Status(String),
}

impl ChannelValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ChannelValue::Number(v) => Some(*v),
            ChannelValue::Status(_) => None,
        }
    }
}

/// One timestamped multi-channel sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Wall-clock time of the sample; `None` when the source value was unparseable
    pub timestamp: Option<DateTime<Utc>>,
    /// Device-side millisecond counter, if present
    pub device_millis: Option<i64>,
    /// Raw label tag; `None` when the field was empty
    pub label: Option<RawLabel>,
    /// Heater profile identifier
    pub profile_id: Option<String>,
    /// Channel column name to value
    pub channels: HashMap<String, ChannelValue>,
}

impl Reading {
    /// Create a reading with no channels.
    pub fn new(timestamp: Option<DateTime<Utc>>, label: Option<RawLabel>) -> Self {
        Self {
            timestamp,
            device_millis: None,
            label,
            profile_id: None,
            channels: HashMap::new(),
        }
    }

    /// Builder-style channel insertion.
    pub fn with_channel(mut self, column: impl Into<String>, value: ChannelValue) -> Self {
        self.channels.insert(column.into(), value);
        self
    }

    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }

    /// Look up a channel by column name.
    pub fn channel(&self, column: &str) -> Option<&ChannelValue> {
        self.channels.get(column)
    }
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

/// Parse a `Real_Time` field.
///
/// Accepts RFC 3339 and the naive `YYYY-MM-DD HH:MM:SS[.fff]` form written by the
/// collection firmware. Naive timestamps are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Render a timestamp the way the collection firmware writes it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
