//! The background stream worker and its controller.
//!
//! A [`LineCollector`] thread feeds raw lines to the worker thread, which
//! parses and buffers them, flushes a batch through the pipeline every
//! `batch_length`, classifies the resulting vectors, and publishes the rolling
//! prediction. Caller and worker talk only through channels and one stop flag.

use crate::collector::line_source::{
    CollectorConfig, LineCollector, SourceEvent, DEFAULT_CHANNEL_CAPACITY,
};
use crate::collector::record::RecordParser;
use crate::core::pipeline::WindowedPipeline;
use crate::labels::LabelCatalog;
use crate::stats::StreamStats;
use crate::stream::accumulator::{StreamAccumulator, StreamBatch};
use crate::stream::aggregate::CurrentPrediction;
use crate::stream::classifier::Classifier;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How long the worker waits for a line before re-checking the flag and timer.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default wall-clock length of one batch.
pub const DEFAULT_BATCH_LENGTH: Duration = Duration::from_secs(5);

/// Streaming parameters.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub batch_length: Duration,
    pub poll_interval: Duration,
    pub channel_capacity: usize,
    /// Classify the readings still buffered when the source ends (finite replays)
    pub flush_on_close: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_length: DEFAULT_BATCH_LENGTH,
            poll_interval: DEFAULT_POLL_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            flush_on_close: false,
        }
    }
}

/// What the worker publishes to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A line as received, for display
    RawLine(String),
    Prediction(CurrentPrediction),
    /// The transport failed; no further events follow
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("a stream is already running")]
    AlreadyRunning,
    #[error("no stream is running")]
    NotRunning,
    #[error("failed to start stream: {0}")]
    Start(String),
    #[error("stream worker panicked")]
    WorkerPanicked,
}

/// Why a stream ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    SourceClosed,
}

/// Summary of a finished stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub reason: StopReason,
    pub batches: u64,
    /// Readings buffered since the last flush, dropped at stop
    pub discarded: usize,
}

struct ActiveStream {
    running: Arc<AtomicBool>,
    collector: LineCollector,
    worker: JoinHandle<Result<StreamReport, StreamError>>,
}

/// Starts and stops the streaming worker.
pub struct StreamController {
    config: StreamConfig,
    pipeline: Arc<WindowedPipeline>,
    catalog: Arc<LabelCatalog>,
    classifier: Arc<dyn Classifier>,
    stats: Arc<StreamStats>,
    active: Option<ActiveStream>,
}

impl StreamController {
    pub fn new(
        config: StreamConfig,
        pipeline: WindowedPipeline,
        catalog: Arc<LabelCatalog>,
        classifier: Arc<dyn Classifier>,
        stats: Arc<StreamStats>,
    ) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
            catalog,
            classifier,
            stats,
            active: None,
        }
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    /// Whether a worker is alive.
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| !a.worker.is_finished())
            .unwrap_or(false)
    }

    /// Start streaming from `reader`. Returns the event receiver.
    pub fn start_stream<R>(&mut self, reader: R) -> Result<Receiver<StreamEvent>, StreamError>
    where
        R: BufRead + Send + 'static,
    {
        if self.is_running() {
            return Err(StreamError::AlreadyRunning);
        }
        if let Some(previous) = self.active.take() {
            // Reap a worker that already ended on its own
            let _ = finish(previous);
        }

        let mut collector = LineCollector::new(CollectorConfig {
            channel_capacity: self.config.channel_capacity,
        });
        collector
            .start(reader)
            .map_err(|e| StreamError::Start(e.to_string()))?;

        let (events, receiver) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let parser = RecordParser::new(self.pipeline.schema().clone());

        let worker = StreamWorker {
            accumulator: StreamAccumulator::new(parser, self.config.batch_length),
            pipeline: Arc::clone(&self.pipeline),
            catalog: Arc::clone(&self.catalog),
            classifier: Arc::clone(&self.classifier),
            stats: Arc::clone(&self.stats),
            running: Arc::clone(&running),
            poll_interval: self.config.poll_interval,
            flush_on_close: self.config.flush_on_close,
        };
        let source = collector.receiver().clone();

        let handle = thread::Builder::new()
            .name("stream-worker".to_string())
            .spawn(move || worker.run(source, events))
            .map_err(|e| StreamError::Start(e.to_string()))?;

        info!(
            session = %self.stats.session_id(),
            batch_length_ms = self.config.batch_length.as_millis() as u64,
            "stream started"
        );
        self.active = Some(ActiveStream {
            running,
            collector,
            worker: handle,
        });
        Ok(receiver)
    }

    /// Signal the worker to stop and wait for it. The partial batch is discarded.
    pub fn stop_stream(&mut self) -> Result<StreamReport, StreamError> {
        let active = self.active.take().ok_or(StreamError::NotRunning)?;
        active.running.store(false, Ordering::SeqCst);
        finish(active)
    }

    /// Wait for the worker to end on its own (source closed or failed).
    pub fn wait(&mut self) -> Result<StreamReport, StreamError> {
        let active = self.active.take().ok_or(StreamError::NotRunning)?;
        finish(active)
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.running.store(false, Ordering::SeqCst);
            let _ = finish(active);
        }
    }
}

fn finish(active: ActiveStream) -> Result<StreamReport, StreamError> {
    let ActiveStream {
        mut collector,
        worker,
        ..
    } = active;
    let result = worker.join().map_err(|_| StreamError::WorkerPanicked)?;
    collector.stop();
    result
}

struct StreamWorker {
    accumulator: StreamAccumulator,
    pipeline: Arc<WindowedPipeline>,
    catalog: Arc<LabelCatalog>,
    classifier: Arc<dyn Classifier>,
    stats: Arc<StreamStats>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    flush_on_close: bool,
}

impl StreamWorker {
    fn run(
        mut self,
        source: Receiver<SourceEvent>,
        events: Sender<StreamEvent>,
    ) -> Result<StreamReport, StreamError> {
        let outcome = loop {
            if !self.running.load(Ordering::SeqCst) {
                break Ok(StopReason::Requested);
            }

            match source.recv_timeout(self.poll_interval) {
                Ok(SourceEvent::Line(bytes)) => self.handle_line(&bytes, &events),
                Ok(SourceEvent::Closed) => {
                    if self.flush_on_close && self.accumulator.buffered() > 0 {
                        self.flush(&events);
                    }
                    break Ok(StopReason::SourceClosed);
                }
                Ok(SourceEvent::Failed(reason)) => break Err(reason),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    break Err("line source disconnected".to_string())
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break Ok(StopReason::Requested);
            }
            if self.accumulator.flush_due(Instant::now()) {
                self.flush(&events);
            }
        };

        let discarded = self.accumulator.stop();
        self.stats.record_discarded(discarded as u64);

        match outcome {
            Ok(reason) => {
                info!(?reason, discarded, batches = self.accumulator.flushed(), "stream stopped");
                Ok(StreamReport {
                    reason,
                    batches: self.accumulator.flushed(),
                    discarded,
                })
            }
            Err(reason) => {
                error!(error = %reason, "transport failure, stream stopped");
                let _ = events.send(StreamEvent::Fatal(reason.clone()));
                Err(StreamError::Transport(reason))
            }
        }
    }

    fn handle_line(&mut self, line: &[u8], events: &Sender<StreamEvent>) {
        self.stats.record_line();
        let _ = events.send(StreamEvent::RawLine(String::from_utf8_lossy(line).into_owned()));

        match self.accumulator.push_line(line, Instant::now(), Utc::now()) {
            Ok(()) => self.stats.record_reading(),
            Err(e) => {
                self.stats.record_malformed();
                debug!(error = %e, "malformed record dropped");
            }
        }
    }

    fn flush(&mut self, events: &Sender<StreamEvent>) {
        let batch = self.accumulator.begin_flush();
        self.stats.record_batch();

        let prediction = self.classify(&batch);
        self.accumulator.finish_flush(Instant::now());

        info!(
            batch = batch.sequence,
            readings = batch.len(),
            prediction = %prediction,
            "batch flushed"
        );
        let _ = events.send(StreamEvent::Prediction(prediction));
    }

    fn classify(&self, batch: &StreamBatch) -> CurrentPrediction {
        let vectors = match self.pipeline.run(&batch.readings, &self.catalog, None) {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(batch = batch.sequence, error = %e, "batch could not be windowed");
                Vec::new()
            }
        };
        self.stats.record_vectors(vectors.len() as u64);

        let predictions: Vec<String> = vectors
            .iter()
            .filter_map(|v| match self.classifier.predict(&v.features) {
                Ok(label) => Some(label),
                Err(e) => {
                    warn!(start = %v.start, error = %e, "prediction failed");
                    None
                }
            })
            .collect();
        self.stats.record_predictions(predictions.len() as u64);

        CurrentPrediction::from_predictions(&predictions)
    }
}
