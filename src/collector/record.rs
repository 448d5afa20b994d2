//! Parsing of comma-separated records arriving from the line source.

use crate::collector::schema::{ChannelSchema, ColumnKind};
use crate::collector::types::{parse_timestamp, ChannelValue, RawLabel, Reading};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a line was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("line is not valid UTF-8")]
    Undecodable,
    #[error("empty line")]
    Empty,
    #[error("expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
}

/// Parses lines in the firmware's fixed column order into readings.
#[derive(Debug, Clone)]
pub struct RecordParser {
    schema: ChannelSchema,
}

impl RecordParser {
    pub fn new(schema: ChannelSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &ChannelSchema {
        &self.schema
    }

    /// Parse one raw line.
    ///
    /// A record one field short is taken to have its leading timestamp omitted;
    /// `now` is used in its place. Numeric fields that fail to parse become NaN.
    pub fn parse(&self, line: &[u8], now: DateTime<Utc>) -> Result<Reading, RecordError> {
        let text = std::str::from_utf8(line).map_err(|_| RecordError::Undecodable)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(RecordError::Empty);
        }

        let stamp = now.to_rfc3339();
        let mut fields: Vec<&str> = text.split(',').map(clean_field).collect();
        let expected = self.schema.field_count();

        if fields.len() + 1 == expected {
            fields.insert(0, stamp.as_str());
        } else if fields.len() != expected {
            return Err(RecordError::FieldCount {
                expected,
                actual: fields.len(),
            });
        }

        let mut reading = Reading::new(None, None);
        for ((column, kind), raw) in self.schema.columns().iter().zip(fields) {
            match kind {
                ColumnKind::Timestamp => reading.timestamp = parse_timestamp(raw),
                ColumnKind::DeviceMillis => {
                    reading.device_millis = raw.parse::<f64>().ok().map(|v| v as i64)
                }
                ColumnKind::Label => reading.label = RawLabel::parse(raw),
                ColumnKind::Profile => {
                    if !raw.is_empty() {
                        reading.profile_id = Some(raw.to_string());
                    }
                }
                ColumnKind::Numeric => {
                    let value = raw.parse::<f64>().unwrap_or(f64::NAN);
                    reading
                        .channels
                        .insert(column.clone(), ChannelValue::Number(value));
                }
                ColumnKind::Status => {
                    reading
                        .channels
                        .insert(column.clone(), ChannelValue::Status(raw.to_string()));
                }
            }
        }

        Ok(reading)
    }
}

fn clean_field(field: &str) -> &str {
    field.trim().trim_matches('"')
}
