//! Session statistics for the streaming path.
//!
//! Tracks how many lines, readings, batches and predictions the stream has
//! handled so a user can see what the agent has been doing.

pub mod stream_stats;

// Re-export commonly used types
pub use stream_stats::{SharedStreamStats, StatsSnapshot, StreamStats};
