//! Reading collection for the windowing pipeline.
//!
//! This module provides the reading data model, the sensor array's column
//! schema, the streaming record parser, the line-oriented transport reader,
//! logging of a live stream to a recording, and table I/O for offline
//! recordings.

pub mod line_source;
pub mod record;
pub mod recorder;
pub mod schema;
pub mod table;
pub mod types;

// Re-export commonly used types
pub use line_source::{CollectorConfig, CollectorError, LineCollector, SourceEvent};
pub use record::{RecordError, RecordParser};
pub use recorder::{record_stream, Recorder, RecordingError, RecordingSummary};
pub use schema::{ChannelSchema, ColumnKind, Measurement};
pub use table::{read_feature_table, read_readings, write_feature_table, TableError};
pub use types::{parse_timestamp, ChannelValue, RawLabel, Reading};
