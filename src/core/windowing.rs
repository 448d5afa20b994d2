//! Sliding fixed-size windows over a block of readings.
//!
//! Windows are half-open intervals `[start, start + size)` advanced by a fixed
//! stride from the block's first timestamp. A candidate is emitted only if it
//! holds readings with a single label and passes the configured validity
//! policy; rejected candidates still advance the cursor by one stride.

use crate::collector::types::{RawLabel, Reading};
use crate::core::segmentation::Block;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Default fraction of the window a valid window must cover.
pub const DEFAULT_COVERAGE_FRACTION: f64 = 0.8;

/// Invalid window geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowError {
    #[error("window size must be positive (got {0}s)")]
    NonPositiveSize(f64),
    #[error("stride must be positive (got {0}s)")]
    NonPositiveStride(f64),
}

/// Window size and stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    size: Duration,
    stride: Duration,
}

impl WindowParams {
    /// Build from seconds, rejecting non-positive (or sub-millisecond) values.
    pub fn from_secs(size_secs: f64, stride_secs: f64) -> Result<Self, WindowError> {
        let size = secs_to_duration(size_secs).ok_or(WindowError::NonPositiveSize(size_secs))?;
        let stride =
            secs_to_duration(stride_secs).ok_or(WindowError::NonPositiveStride(stride_secs))?;
        Ok(Self { size, stride })
    }

    pub fn size(&self) -> Duration {
        self.size
    }

    pub fn stride(&self) -> Duration {
        self.stride
    }
}

pub(crate) fn secs_to_duration(secs: f64) -> Option<Duration> {
    if !secs.is_finite() {
        return None;
    }
    let millis = (secs * 1000.0).round();
    if millis < 1.0 || millis > i64::MAX as f64 {
        return None;
    }
    Some(Duration::milliseconds(millis as i64))
}

/// Rule deciding whether a single-label window carries enough data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "value", rename_all = "snake_case")]
pub enum ValidityPolicy {
    /// Last minus first reading time must reach this fraction of the window size
    MinCoverageFraction(f64),
    /// The window must hold at least this many readings
    MinRowCount(usize),
}

impl Default for ValidityPolicy {
    fn default() -> Self {
        ValidityPolicy::MinCoverageFraction(DEFAULT_COVERAGE_FRACTION)
    }
}

/// Why a candidate window was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    /// Either no labelled reading or more than one distinct label
    MixedLabels(usize),
    InsufficientCoverage { covered: Duration, required: Duration },
    TooFewRows { rows: usize, required: usize },
}

/// A valid window: its interval, readings, and single raw label.
#[derive(Debug, Clone)]
pub struct Window<'a> {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub readings: &'a [&'a Reading],
    pub label: RawLabel,
}

impl<'a> Window<'a> {
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Last minus first reading time.
    pub fn covered(&self) -> Duration {
        covered(self.readings)
    }
}

/// One candidate slice and the verdict on it.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub start: DateTime<Utc>,
    pub verdict: Result<Window<'a>, Rejection>,
}

/// Produces windows over blocks for fixed parameters and policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowGenerator {
    params: WindowParams,
    policy: ValidityPolicy,
}

impl WindowGenerator {
    pub fn new(params: WindowParams, policy: ValidityPolicy) -> Self {
        Self { params, policy }
    }

    pub fn params(&self) -> WindowParams {
        self.params
    }

    pub fn policy(&self) -> ValidityPolicy {
        self.policy
    }

    /// Every candidate position in the block, valid or not.
    pub fn candidates<'a>(&self, block: &'a Block<'a>) -> Candidates<'a> {
        Candidates {
            block,
            generator: *self,
            cursor: block.start(),
            lo: 0,
        }
    }

    /// Valid windows only. Calling again restarts from the block's beginning.
    pub fn generate<'a>(&self, block: &'a Block<'a>) -> impl Iterator<Item = Window<'a>> + 'a {
        self.candidates(block).filter_map(|c| c.verdict.ok())
    }

    /// Number of candidate positions, computed from the arithmetic alone.
    pub fn count_candidates(&self, block: &Block<'_>) -> usize {
        let span = block.duration();
        if span < self.params.size {
            return 0;
        }
        let slack = (span - self.params.size).num_milliseconds();
        (slack / self.params.stride.num_milliseconds()) as usize + 1
    }

    fn judge<'a>(&self, start: DateTime<Utc>, readings: &'a [&'a Reading]) -> Result<Window<'a>, Rejection> {
        if readings.is_empty() {
            return Err(Rejection::Empty);
        }

        let labels: BTreeSet<&RawLabel> = readings.iter().filter_map(|r| r.label.as_ref()).collect();
        if labels.len() != 1 {
            return Err(Rejection::MixedLabels(labels.len()));
        }

        match self.policy {
            ValidityPolicy::MinCoverageFraction(fraction) => {
                let covered = covered(readings);
                let required_ms = fraction * self.params.size.num_milliseconds() as f64;
                // Tolerate float error in the product
                if (covered.num_milliseconds() as f64) + 1e-6 < required_ms {
                    return Err(Rejection::InsufficientCoverage {
                        covered,
                        required: Duration::milliseconds(required_ms.ceil() as i64),
                    });
                }
            }
            ValidityPolicy::MinRowCount(required) => {
                if readings.len() < required {
                    return Err(Rejection::TooFewRows {
                        rows: readings.len(),
                        required,
                    });
                }
            }
        }

        let label = labels.into_iter().next().cloned().ok_or(Rejection::MixedLabels(0))?;
        Ok(Window {
            start,
            end: start + self.params.size,
            readings,
            label,
        })
    }
}

fn covered(readings: &[&Reading]) -> Duration {
    let first = readings.first().and_then(|r| r.timestamp);
    let last = readings.last().and_then(|r| r.timestamp);
    match (first, last) {
        (Some(first), Some(last)) => last - first,
        _ => Duration::zero(),
    }
}

/// Lazy, finite iterator over candidate windows of one block.
#[derive(Debug, Clone)]
pub struct Candidates<'a> {
    block: &'a Block<'a>,
    generator: WindowGenerator,
    cursor: DateTime<Utc>,
    lo: usize,
}

impl<'a> Iterator for Candidates<'a> {
    type Item = Candidate<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let params = self.generator.params;
        let block = self.block;
        if self.cursor + params.size > block.end() {
            return None;
        }

        let start = self.cursor;
        let end = start + params.size;
        let readings = block.readings();

        // Both bounds only move forward as the cursor advances
        while self.lo < readings.len() && block.time_at(self.lo) < start {
            self.lo += 1;
        }
        let mut hi = self.lo;
        while hi < readings.len() && block.time_at(hi) < end {
            hi += 1;
        }

        let verdict = self.generator.judge(start, &readings[self.lo..hi]);
        self.cursor = self.cursor + params.stride;

        Some(Candidate { start, verdict })
    }
}
