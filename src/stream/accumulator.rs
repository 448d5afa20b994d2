//! Batch accumulation state machine for the streaming path.
//!
//! The accumulator owns the current batch and the flush timer. It never reads
//! the clock itself: callers pass the arrival instant, which keeps every state
//! transition testable without sleeping.

use crate::collector::record::{RecordError, RecordParser};
use crate::collector::types::Reading;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::debug;

/// Where the accumulator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing buffered, timer unset
    Idle,
    Collecting,
    /// A batch has been handed out and is being processed
    Flushing,
    Stopped,
}

/// Readings gathered between two flushes.
#[derive(Debug, Clone, Default)]
pub struct StreamBatch {
    /// 1-based batch number
    pub sequence: u64,
    pub readings: Vec<Reading>,
}

impl StreamBatch {
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Buffers parsed readings and decides when a batch is due.
#[derive(Debug)]
pub struct StreamAccumulator {
    parser: RecordParser,
    batch_length: Duration,
    state: StreamState,
    batch: Vec<Reading>,
    timer_started: Option<Instant>,
    flushed: u64,
}

impl StreamAccumulator {
    pub fn new(parser: RecordParser, batch_length: Duration) -> Self {
        Self {
            parser,
            batch_length,
            state: StreamState::Idle,
            batch: Vec::new(),
            timer_started: None,
            flushed: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn batch_length(&self) -> Duration {
        self.batch_length
    }

    /// Readings waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.batch.len()
    }

    /// Batches handed out so far.
    pub fn flushed(&self) -> u64 {
        self.flushed
    }

    /// Parse one line and buffer the reading.
    ///
    /// The first reading after start arms the flush timer at `arrived`. Lines
    /// received after [`stop`](Self::stop) are ignored.
    pub fn push_line(
        &mut self,
        line: &[u8],
        arrived: Instant,
        wall_clock: DateTime<Utc>,
    ) -> Result<(), RecordError> {
        if self.state == StreamState::Stopped {
            debug!("line after stop ignored");
            return Ok(());
        }

        let reading = self.parser.parse(line, wall_clock)?;
        self.push(reading, arrived);
        Ok(())
    }

    /// Buffer an already parsed reading.
    pub fn push(&mut self, reading: Reading, arrived: Instant) {
        if self.state == StreamState::Stopped {
            return;
        }
        if self.timer_started.is_none() {
            self.timer_started = Some(arrived);
        }
        if self.state == StreamState::Idle {
            self.state = StreamState::Collecting;
        }
        self.batch.push(reading);
    }

    /// Whether `batch_length` has elapsed since the timer was armed.
    pub fn flush_due(&self, now: Instant) -> bool {
        if self.state != StreamState::Collecting {
            return false;
        }
        self.timer_started
            .map(|started| now.saturating_duration_since(started) >= self.batch_length)
            .unwrap_or(false)
    }

    /// Hand out the current batch and enter `Flushing`.
    pub fn begin_flush(&mut self) -> StreamBatch {
        self.flushed += 1;
        self.state = StreamState::Flushing;
        StreamBatch {
            sequence: self.flushed,
            readings: std::mem::take(&mut self.batch),
        }
    }

    /// Back to `Collecting` with the timer restarted at `now`.
    pub fn finish_flush(&mut self, now: Instant) {
        if self.state == StreamState::Stopped {
            return;
        }
        self.timer_started = Some(now);
        self.state = StreamState::Collecting;
    }

    /// Stop for good, discarding the partial batch. Returns how many readings were dropped.
    pub fn stop(&mut self) -> usize {
        let discarded = self.batch.len();
        self.batch.clear();
        self.timer_started = None;
        self.state = StreamState::Stopped;
        discarded
    }
}
