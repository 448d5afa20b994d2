//! BME Window Agent - windowed feature extraction for gas sensor arrays.
//!
//! This library turns timestamped multi-sensor readings from a BME688 board
//! into fixed-duration, labelled feature vectors, offline from a recording or
//! live from a line-oriented stream that is classified batch by batch.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         BME Window Agent                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐            │
//! │  │ Line source │──▶│ Accumulator │──▶│  Classifier │──▶ current │
//! │  │  (thread)   │   │  (batches)  │   │  (predict)  │ prediction │
//! │  └─────────────┘   └──────┬──────┘   └─────────────┘            │
//! │                           │ batch                ▲              │
//! │                           ▼                      │ vectors      │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐            │
//! │  │  Segmenter  │──▶│  Windowing  │──▶│  Features   │            │
//! │  │  (blocks)   │   │ (5s / 1s)   │   │  + Labels   │            │
//! │  └─────────────┘   └─────────────┘   └─────────────┘            │
//! │        ▲                                    │                   │
//! │   recording ─────── offline path ──────────▶ feature table      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use bme_window_agent::{collector, core, labels};
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! let schema = collector::ChannelSchema::default();
//! let file = BufReader::new(File::open("recording.csv").unwrap());
//! let readings = collector::read_readings(file, &schema).unwrap();
//!
//! let config = core::PipelineConfig::new(5.0, 1.0, chrono::Duration::seconds(10)).unwrap();
//! let pipeline = core::WindowedPipeline::new(config, core::FeatureEngine::default_for(8), schema);
//! let catalog = labels::LabelCatalog::in_memory();
//!
//! let table = pipeline.process_batch(&readings, &catalog).unwrap();
//! println!("{} feature vectors", table.len());
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod labels;
pub mod stats;
pub mod stream;

// Re-export key types at crate root for convenience
pub use collector::{ChannelSchema, RawLabel, Reading};
pub use config::{Config, ConfigError, GapThreshold};
pub use core::{
    FeatureEngine, FeatureTable, FeatureVector, Features, PipelineConfig, PipelineError,
    ValidityPolicy, WindowedPipeline,
};
pub use labels::{LabelCatalog, LabelResolver, LabelStore};
pub use stats::{SharedStreamStats, StreamStats};
pub use stream::{
    CentroidClassifier, Classifier, CurrentPrediction, StreamConfig, StreamController,
    StreamError, StreamEvent,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
