//! Core functionality for the windowing pipeline.
//!
//! This module contains:
//! - Segmentation of reading sequences into gap-free blocks
//! - Sliding window generation and validity rules
//! - Feature computation from window readings
//! - The pipeline composing them

pub mod features;
pub mod pipeline;
pub mod segmentation;
pub mod windowing;

// Re-export commonly used types
pub use features::{FeatureEngine, FeatureError, FeatureSpec, Statistic};
pub use pipeline::{
    FeatureTable, FeatureVector, Features, PipelineConfig, PipelineError, WindowedPipeline,
};
pub use segmentation::{segment, Block};
pub use windowing::{
    Candidate, Rejection, ValidityPolicy, Window, WindowError, WindowGenerator, WindowParams,
};
