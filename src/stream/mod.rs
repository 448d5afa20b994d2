//! Streaming classification.
//!
//! This module contains:
//! - The batch accumulator state machine
//! - Prediction aggregation
//! - The classifier seam and a reference model
//! - The background worker and its controller

pub mod accumulator;
pub mod aggregate;
pub mod classifier;
pub mod worker;

// Re-export commonly used types
pub use accumulator::{StreamAccumulator, StreamBatch, StreamState};
pub use aggregate::{CurrentPrediction, LabelShare, PredictionSummary};
pub use classifier::{CentroidClassifier, Classifier, ClassifierError};
pub use worker::{
    StopReason, StreamConfig, StreamController, StreamError, StreamEvent, StreamReport,
    DEFAULT_BATCH_LENGTH, DEFAULT_POLL_INTERVAL,
};
