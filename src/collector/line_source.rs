//! Line-oriented transport reader.
//!
//! A background thread pulls newline-framed records out of any byte reader
//! (serial port, stdin, a replay file) and hands them to the consumer over a
//! bounded channel. The transport itself is opaque; failures are reported as
//! events, never retried here.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{BufRead, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, warn};

/// Default capacity of the inbound line channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Event produced by the transport reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// One record, without its line terminator
    Line(Vec<u8>),
    /// The source failed permanently
    Failed(String),
    /// The source reached its end cleanly
    Closed,
}

/// Configuration for the line collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub channel_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Errors that can occur when starting the collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Collector is already running")]
    AlreadyRunning,
    #[error("Failed to spawn reader thread: {0}")]
    Spawn(String),
}

/// Reads lines from a byte source on a background thread.
pub struct LineCollector {
    sender: Sender<SourceEvent>,
    receiver: Receiver<SourceEvent>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl LineCollector {
    /// Create a new collector; nothing is read until [`start`](Self::start).
    pub fn new(config: CollectorConfig) -> Self {
        // Bounded so a stalled consumer cannot grow memory without limit
        let (sender, receiver) = bounded(config.channel_capacity.max(1));

        Self {
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Start reading `reader` in a background thread.
    pub fn start<R>(&mut self, reader: R) -> Result<(), CollectorError>
    where
        R: BufRead + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }

        let sender = self.sender.clone();
        let running = self.running.clone();

        let handle = thread::Builder::new()
            .name("line-source".to_string())
            .spawn(move || {
                read_lines(reader, &sender, &running);
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CollectorError::Spawn(e.to_string())
            })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Ask the reader to stop.
    ///
    /// A reader blocked inside the transport only notices at its next line, so
    /// the thread is joined only if it already finished.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }

    /// Check if the reader thread is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the receiver for source events.
    pub fn receiver(&self) -> &Receiver<SourceEvent> {
        &self.receiver
    }
}

impl Drop for LineCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_lines<R: BufRead>(mut reader: R, sender: &Sender<SourceEvent>, running: &AtomicBool) {
    let mut buf = Vec::with_capacity(1024);

    while running.load(Ordering::SeqCst) {
        buf.clear();
        let event = match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                debug!("line source reached end of input");
                let _ = sender.send(SourceEvent::Closed);
                return;
            }
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                SourceEvent::Line(buf.clone())
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "line source failed");
                let _ = sender.send(SourceEvent::Failed(e.to_string()));
                return;
            }
        };

        if sender.send(event).is_err() {
            // Consumer hung up
            return;
        }
    }
}
