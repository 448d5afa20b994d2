//! Logging a live line stream to a recording.
//!
//! Every accepted record is written under the schema's header, with its
//! `Real_Time` filled in when the firmware left it out. The result is the
//! same recording format [`read_readings`](crate::collector::read_readings)
//! takes, so a logged session can be processed or trained on directly.

use crate::collector::line_source::SourceEvent;
use crate::collector::record::RecordParser;
use crate::collector::schema::ColumnKind;
use crate::collector::table::quote_field;
use crate::collector::types::{format_timestamp, ChannelValue, Reading};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport failed: {0}")]
    Transport(String),
}

/// Counts for a finished recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingSummary {
    pub written: u64,
    pub dropped: u64,
}

/// Writes parsed records as rows of a recording.
pub struct Recorder<W: Write> {
    parser: RecordParser,
    writer: W,
    summary: RecordingSummary,
}

impl<W: Write> Recorder<W> {
    /// Start a recording; the header row is written immediately.
    pub fn new(parser: RecordParser, mut writer: W) -> Result<Self, RecordingError> {
        let header: Vec<String> = parser
            .schema()
            .columns()
            .iter()
            .map(|(name, _)| quote_field(name))
            .collect();
        writeln!(writer, "{}", header.join(","))?;
        writer.flush()?;

        Ok(Self {
            parser,
            writer,
            summary: RecordingSummary::default(),
        })
    }

    /// Write one raw line. Returns `false` when the line was malformed and dropped.
    pub fn record_line(&mut self, line: &[u8], now: DateTime<Utc>) -> Result<bool, RecordingError> {
        let reading = match self.parser.parse(line, now) {
            Ok(reading) => reading,
            Err(e) => {
                self.summary.dropped += 1;
                debug!(error = %e, "record not logged");
                return Ok(false);
            }
        };

        let row = self.row(&reading);
        writeln!(self.writer, "{}", row.join(","))?;
        // Flushed per row so an interrupted session keeps what it logged
        self.writer.flush()?;
        self.summary.written += 1;
        Ok(true)
    }

    pub fn summary(&self) -> RecordingSummary {
        self.summary
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn row(&self, reading: &Reading) -> Vec<String> {
        self.parser
            .schema()
            .columns()
            .iter()
            .map(|(column, kind)| match kind {
                ColumnKind::Timestamp => reading
                    .timestamp
                    .map(|ts| format_timestamp(&ts))
                    .unwrap_or_default(),
                ColumnKind::DeviceMillis => reading
                    .device_millis
                    .map(|ms| ms.to_string())
                    .unwrap_or_default(),
                ColumnKind::Label => reading
                    .label
                    .as_ref()
                    .map(|label| quote_field(&label.to_string()))
                    .unwrap_or_default(),
                ColumnKind::Profile => reading
                    .profile_id
                    .as_deref()
                    .map(quote_field)
                    .unwrap_or_default(),
                ColumnKind::Numeric | ColumnKind::Status => match reading.channel(column) {
                    Some(ChannelValue::Number(v)) if v.is_finite() => v.to_string(),
                    Some(ChannelValue::Status(s)) => quote_field(s),
                    _ => String::new(),
                },
            })
            .collect()
    }
}

/// Log lines from `source` until it closes or `running` is cleared.
pub fn record_stream<W: Write>(
    source: &Receiver<SourceEvent>,
    recorder: &mut Recorder<W>,
    running: &AtomicBool,
    poll_interval: Duration,
) -> Result<RecordingSummary, RecordingError> {
    while running.load(Ordering::SeqCst) {
        match source.recv_timeout(poll_interval) {
            Ok(SourceEvent::Line(bytes)) => {
                recorder.record_line(&bytes, Utc::now())?;
            }
            Ok(SourceEvent::Closed) => break,
            Ok(SourceEvent::Failed(reason)) => {
                warn!(error = %reason, "recording stopped by transport failure");
                return Err(RecordingError::Transport(reason));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RecordingError::Transport("line source disconnected".to_string()))
            }
        }
    }

    let summary = recorder.summary();
    info!(written = summary.written, dropped = summary.dropped, "recording finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::line_source::{CollectorConfig, LineCollector};
    use crate::collector::schema::ChannelSchema;
    use crate::collector::table::read_readings;
    use crate::collector::types::RawLabel;
    use chrono::TimeZone;
    use std::io::Cursor;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 15, 0).unwrap()
    }

    #[test]
    fn test_recording_reads_back() {
        let schema = ChannelSchema::new(1);
        let mut recorder = Recorder::new(RecordParser::new(schema.clone()), Vec::new()).unwrap();

        // Firmware line without Real_Time
        assert!(recorder
            .record_line(b"1500,2,HP-354,21.5,100000,40.25,5000,OK,1", now())
            .unwrap());
        assert!(recorder
            .record_line(
                b"2024-03-01 08:15:03,4500,coffee,HP-354,22,100010,abc,5100,OK,2",
                now()
            )
            .unwrap());
        assert!(!recorder.record_line(b"1,2,3", now()).unwrap());
        assert_eq!(
            recorder.summary(),
            RecordingSummary {
                written: 2,
                dropped: 1
            }
        );

        let bytes = recorder.into_inner();
        let readings = read_readings(Cursor::new(bytes), &schema).unwrap();
        assert_eq!(readings.len(), 2);

        assert_eq!(readings[0].timestamp, Some(now()));
        assert_eq!(readings[0].device_millis, Some(1500));
        assert_eq!(readings[0].label, Some(RawLabel::Int(2)));
        assert_eq!(readings[0].profile_id.as_deref(), Some("HP-354"));
        assert_eq!(
            readings[0].channel("Sensor1_Humidity_%"),
            Some(&ChannelValue::Number(40.25))
        );
        assert_eq!(
            readings[0].channel("Sensor1_Status"),
            Some(&ChannelValue::Status("OK".to_string()))
        );

        assert_eq!(readings[1].label, Some(RawLabel::Text("coffee".to_string())));
        assert_eq!(
            readings[1].timestamp,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 15, 3).unwrap())
        );
        // Unparseable numeric fields come back as missing
        match readings[1].channel("Sensor1_Humidity_%") {
            Some(ChannelValue::Number(v)) => assert!(v.is_nan()),
            other => panic!("unexpected humidity {other:?}"),
        }
    }

    #[test]
    fn test_record_stream_until_close() {
        let schema = ChannelSchema::new(1);
        let mut collector = LineCollector::new(CollectorConfig::default());
        collector
            .start(Cursor::new(
                b"0,1,HP1,21.5,100000,40,5000,OK,1\nnoise\n1000,1,HP1,21.6,100000,40,5000,OK,1\n"
                    .to_vec(),
            ))
            .unwrap();

        let mut recorder = Recorder::new(RecordParser::new(schema.clone()), Vec::new()).unwrap();
        let running = AtomicBool::new(true);
        let summary = record_stream(
            collector.receiver(),
            &mut recorder,
            &running,
            Duration::from_millis(20),
        )
        .unwrap();

        assert_eq!(summary.written, 2);
        assert_eq!(summary.dropped, 1);
        let readings = read_readings(Cursor::new(recorder.into_inner()), &schema).unwrap();
        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.timestamp.is_some()));
    }
}
