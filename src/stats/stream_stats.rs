//! Counters for what the stream has seen and done.
//!
//! Counts only; no reading content is kept. Cumulative totals can be persisted
//! as JSON so `status` reports across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Streaming statistics for the current session.
#[derive(Debug)]
pub struct StreamStats {
    /// Lines delivered by the source
    lines_received: AtomicU64,
    /// Lines dropped for field count or encoding
    malformed_dropped: AtomicU64,
    /// Lines parsed into readings
    readings_accepted: AtomicU64,
    batches_flushed: AtomicU64,
    vectors_produced: AtomicU64,
    predictions_made: AtomicU64,
    /// Readings buffered when the stream stopped
    discarded_at_stop: AtomicU64,
    session_id: Uuid,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self {
            lines_received: AtomicU64::new(0),
            malformed_dropped: AtomicU64::new(0),
            readings_accepted: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            vectors_produced: AtomicU64::new(0),
            predictions_made: AtomicU64::new(0),
            discarded_at_stop: AtomicU64::new(0),
            session_id: Uuid::new_v4(),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Stats that continue from, and save back to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            warn!(error = %e, "could not load previous stream statistics");
        }

        stats
    }

    /// Identifier of this session, fresh on every construction.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn record_line(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reading(&self) {
        self.readings_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vectors(&self, count: u64) {
        self.vectors_produced.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_predictions(&self, count: u64) {
        self.predictions_made.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: u64) {
        self.discarded_at_stop.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_received: self.lines_received.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            vectors_produced: self.vectors_produced.load(Ordering::Relaxed),
            predictions_made: self.predictions_made.load(Ordering::Relaxed),
            discarded_at_stop: self.discarded_at_stop.load(Ordering::Relaxed),
            session_id: self.session_id,
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Stream Statistics (session {}):\n\
             - Lines received: {}\n\
             - Malformed lines dropped: {}\n\
             - Readings accepted: {}\n\
             - Batches flushed: {}\n\
             - Feature vectors produced: {}\n\
             - Predictions made: {}\n\
             - Readings discarded at stop: {}\n\
             - Session duration: {} seconds",
            stats.session_id,
            stats.lines_received,
            stats.malformed_dropped,
            stats.readings_accepted,
            stats.batches_flushed,
            stats.vectors_produced,
            stats.predictions_made,
            stats.discarded_at_stop,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                lines_received: stats.lines_received,
                malformed_dropped: stats.malformed_dropped,
                readings_accepted: stats.readings_accepted,
                batches_flushed: stats.batches_flushed,
                vectors_produced: stats.vectors_produced,
                predictions_made: stats.predictions_made,
                discarded_at_stop: stats.discarded_at_stop,
                last_session: Some(stats.session_id),
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
            debug!(path = %path.display(), "stream statistics saved");
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.lines_received
                    .store(persisted.lines_received, Ordering::Relaxed);
                self.malformed_dropped
                    .store(persisted.malformed_dropped, Ordering::Relaxed);
                self.readings_accepted
                    .store(persisted.readings_accepted, Ordering::Relaxed);
                self.batches_flushed
                    .store(persisted.batches_flushed, Ordering::Relaxed);
                self.vectors_produced
                    .store(persisted.vectors_produced, Ordering::Relaxed);
                self.predictions_made
                    .store(persisted.predictions_made, Ordering::Relaxed);
                self.discarded_at_stop
                    .store(persisted.discarded_at_stop, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    pub fn reset(&self) {
        for counter in [
            &self.lines_received,
            &self.malformed_dropped,
            &self.readings_accepted,
            &self.batches_flushed,
            &self.vectors_produced,
            &self.predictions_made,
            &self.discarded_at_stop,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub lines_received: u64,
    pub malformed_dropped: u64,
    pub readings_accepted: u64,
    pub batches_flushed: u64,
    pub vectors_produced: u64,
    pub predictions_made: u64,
    pub discarded_at_stop: u64,
    pub session_id: Uuid,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    lines_received: u64,
    malformed_dropped: u64,
    readings_accepted: u64,
    batches_flushed: u64,
    vectors_produced: u64,
    predictions_made: u64,
    #[serde(default)]
    discarded_at_stop: u64,
    #[serde(default)]
    last_session: Option<Uuid>,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared statistics.
pub type SharedStreamStats = Arc<StreamStats>;
