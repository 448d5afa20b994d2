//! Comma-separated table reading and writing for the offline path.
//!
//! Raw recordings carry a header row naming every column. Feature tables are
//! written as `Real_Time,<features...>,Label_Tag` with two-decimal values.

use crate::collector::schema::{ChannelSchema, ColumnKind};
use crate::collector::types::{format_timestamp, parse_timestamp, ChannelValue, RawLabel, Reading};
use crate::core::pipeline::{FeatureTable, FeatureVector, Features};
use std::io::{BufRead, Write};
use thiserror::Error;
use tracing::debug;

/// Errors reading or writing tables.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("table has no header row")]
    MissingHeader,
    #[error("missing columns: {0:?}")]
    MissingColumns(Vec<String>),
}

/// Split one record on commas, honouring double-quoted fields.
pub(crate) fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Quote a field if it would not survive [`split_record`] as-is.
pub(crate) fn quote_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Read a raw recording into readings.
///
/// Required columns are checked against the header before any row is parsed.
/// Rows whose field count does not match the header are skipped.
pub fn read_readings<R: BufRead>(reader: R, schema: &ChannelSchema) -> Result<Vec<Reading>, TableError> {
    let mut lines = reader.lines();
    let header = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break split_record(line.trim_end_matches('\r'));
                }
            }
            None => return Err(TableError::MissingHeader),
        }
    };
    let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();

    let missing = schema.missing_columns(header.iter().map(String::as_str));
    if !missing.is_empty() {
        return Err(TableError::MissingColumns(missing));
    }

    let kinds: Vec<Option<ColumnKind>> = header.iter().map(|h| schema.kind_of(h)).collect();
    let mut readings = Vec::new();

    for (row, line) in lines.enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let fields = split_record(line);
        if fields.len() != header.len() {
            debug!(row = row + 2, fields = fields.len(), "skipping row with wrong field count");
            continue;
        }

        let mut reading = Reading::new(None, None);
        for ((column, kind), raw) in header.iter().zip(&kinds).zip(&fields) {
            let raw = raw.trim();
            match kind {
                Some(ColumnKind::Timestamp) => reading.timestamp = parse_timestamp(raw),
                Some(ColumnKind::DeviceMillis) => {
                    reading.device_millis = raw.parse::<f64>().ok().map(|v| v as i64)
                }
                Some(ColumnKind::Label) => reading.label = RawLabel::parse(raw),
                Some(ColumnKind::Profile) => {
                    if !raw.is_empty() {
                        reading.profile_id = Some(raw.to_string())
                    }
                }
                Some(ColumnKind::Numeric) => {
                    let value = raw.parse::<f64>().unwrap_or(f64::NAN);
                    reading
                        .channels
                        .insert(column.clone(), ChannelValue::Number(value));
                }
                Some(ColumnKind::Status) => {
                    reading
                        .channels
                        .insert(column.clone(), ChannelValue::Status(raw.to_string()));
                }
                None => {
                    // Extra column: keep it, numeric when it parses
                    let value = match raw.parse::<f64>() {
                        Ok(v) => ChannelValue::Number(v),
                        Err(_) => ChannelValue::Status(raw.to_string()),
                    };
                    reading.channels.insert(column.clone(), value);
                }
            }
        }
        readings.push(reading);
    }

    Ok(readings)
}

/// Write a feature table.
pub fn write_feature_table<W: Write>(table: &FeatureTable, mut writer: W) -> Result<(), TableError> {
    let mut header = Vec::with_capacity(table.columns.len() + 2);
    header.push("Real_Time".to_string());
    header.extend(table.columns.iter().map(|c| quote_field(c)));
    header.push("Label_Tag".to_string());
    writeln!(writer, "{}", header.join(","))?;

    for row in &table.rows {
        let mut fields = Vec::with_capacity(header.len());
        fields.push(format_timestamp(&row.start));
        fields.extend(row.features.values().map(|v| {
            if v.is_finite() {
                format!("{v:.2}")
            } else {
                String::new()
            }
        }));
        fields.push(quote_field(&row.label));
        writeln!(writer, "{}", fields.join(","))?;
    }

    writer.flush()?;
    Ok(())
}

/// Read a feature table previously written by [`write_feature_table`].
pub fn read_feature_table<R: BufRead>(reader: R) -> Result<FeatureTable, TableError> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(line) => split_record(line?.trim_end_matches('\r')),
        None => return Err(TableError::MissingHeader),
    };

    let mut missing = Vec::new();
    if header.first().map(String::as_str) != Some("Real_Time") {
        missing.push("Real_Time".to_string());
    }
    if header.last().map(String::as_str) != Some("Label_Tag") {
        missing.push("Label_Tag".to_string());
    }
    if !missing.is_empty() {
        return Err(TableError::MissingColumns(missing));
    }

    let columns: Vec<String> = header[1..header.len() - 1].to_vec();
    let mut rows = Vec::new();

    for line in lines {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_record(line);
        if fields.len() != header.len() {
            continue;
        }

        let Some(start) = parse_timestamp(&fields[0]) else {
            continue;
        };
        let features = Features::from_pairs(
            columns
                .iter()
                .zip(&fields[1..fields.len() - 1])
                .map(|(name, raw)| (name.clone(), raw.trim().parse::<f64>().unwrap_or(f64::NAN))),
        );
        rows.push(FeatureVector {
            start,
            label: fields[fields.len() - 1].clone(),
            features,
        });
    }

    Ok(FeatureTable { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;

    #[test]
    fn test_split_record_quotes() {
        assert_eq!(split_record("a,b,,c"), vec!["a", "b", "", "c"]);
        assert_eq!(split_record("\"x,y\",z"), vec!["x,y", "z"]);
        assert_eq!(split_record("\"say \"\"hi\"\"\""), vec!["say \"hi\""]);
        assert_eq!(split_record(&quote_field("a,\"b\"")), vec!["a,\"b\""]);
    }

    fn header(schema: &ChannelSchema) -> String {
        schema
            .columns()
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn test_read_readings() {
        let schema = ChannelSchema::new(1);
        let csv = format!(
            "{}\n2024-01-01 00:00:00,0,1,HP1,21.5,100000,40,5000,OK,1\n\
             2024-01-01 00:00:01,1000,1,HP1,oops,100000,40,5000,OK,1\n\
             short,row\n",
            header(&schema)
        );

        let readings = read_readings(Cursor::new(csv), &schema).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(
            readings[0].timestamp,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(readings[0].label, Some(RawLabel::Int(1)));
        assert_eq!(
            readings[0].channel("Sensor1_Temperature_deg_C"),
            Some(&ChannelValue::Number(21.5))
        );
        let coerced = readings[1]
            .channel("Sensor1_Temperature_deg_C")
            .and_then(ChannelValue::as_number)
            .unwrap();
        assert!(coerced.is_nan());
    }

    #[test]
    fn test_read_readings_missing_columns() {
        let schema = ChannelSchema::new(1);
        let err = read_readings(Cursor::new("Real_Time,Label_Tag\n"), &schema).unwrap_err();
        match err {
            TableError::MissingColumns(cols) => {
                assert!(cols.contains(&"HeaterProfile_ID".to_string()));
                assert!(cols.contains(&"Sensor1_Status".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_feature_table_write_then_read() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let table = FeatureTable {
            columns: vec!["Temperature_Mean_Sensor1".into(), "Humidity_Max_Sensor1".into()],
            rows: vec![FeatureVector {
                start,
                label: "coffee, dark".into(),
                features: Features::from_pairs([
                    ("Temperature_Mean_Sensor1".to_string(), 21.456),
                    ("Humidity_Max_Sensor1".to_string(), f64::NAN),
                ]),
            }],
        };

        let mut out = Vec::new();
        write_feature_table(&table, &mut out).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with("Real_Time,Temperature_Mean_Sensor1,Humidity_Max_Sensor1,Label_Tag\n"));
        assert!(text.contains(",21.46,,\"coffee, dark\""));

        let back = read_feature_table(Cursor::new(out)).unwrap();
        assert_eq!(back.columns, table.columns);
        assert_eq!(back.rows.len(), 1);
        assert_eq!(back.rows[0].label, "coffee, dark");
        assert_eq!(back.rows[0].start, start);
        assert_eq!(back.rows[0].features.get("Temperature_Mean_Sensor1"), Some(21.46));
        assert!(back.rows[0].features.get("Humidity_Max_Sensor1").unwrap().is_nan());
    }
}
