//! Splitting reading sequences into gap-free blocks.
//!
//! A gap between consecutive timestamps larger than the threshold ends one
//! block and starts the next. Blocks are rebuilt from scratch on every call.

use crate::collector::types::Reading;
use chrono::{DateTime, Duration, Utc};

/// A maximal run of readings with no gap above the threshold.
///
/// Readings are sorted by timestamp and all carry one.
#[derive(Debug, Clone)]
pub struct Block<'a> {
    readings: Vec<&'a Reading>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl<'a> Block<'a> {
    fn from_sorted(readings: Vec<&'a Reading>) -> Option<Self> {
        let start = readings.first()?.timestamp?;
        let end = readings.last()?.timestamp?;
        Some(Self {
            readings,
            start,
            end,
        })
    }

    /// Timestamp of the first reading.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Timestamp of the last reading.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn readings(&self) -> &[&'a Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Timestamp of the reading at `index`. Every reading in a block has one.
    pub(crate) fn time_at(&self, index: usize) -> DateTime<Utc> {
        self.readings[index].timestamp.unwrap_or(self.start)
    }
}

/// Stable sort of the timestamped readings; untimed readings are left out.
pub fn sort_by_time(readings: &[Reading]) -> Vec<&Reading> {
    let mut timed: Vec<&Reading> = readings.iter().filter(|r| r.timestamp.is_some()).collect();
    timed.sort_by_key(|r| r.timestamp);
    timed
}

/// Partition readings into chronologically ordered blocks.
///
/// Readings without a timestamp cannot be placed and are skipped. Ties keep
/// their input order. No block is ever empty.
pub fn segment(readings: &[Reading], gap_threshold: Duration) -> Vec<Block<'_>> {
    let sorted = sort_by_time(readings);

    let mut blocks = Vec::new();
    let mut current: Vec<&Reading> = Vec::new();
    let mut last_time: Option<DateTime<Utc>> = None;

    for reading in sorted {
        let Some(ts) = reading.timestamp else {
            continue;
        };
        if let Some(prev) = last_time {
            if ts - prev > gap_threshold && !current.is_empty() {
                blocks.extend(Block::from_sorted(std::mem::take(&mut current)));
            }
        }
        current.push(reading);
        last_time = Some(ts);
    }
    blocks.extend(Block::from_sorted(current));

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> Reading {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Reading::new(Some(base + Duration::seconds(secs)), None)
    }

    #[test]
    fn test_empty_input_has_no_blocks() {
        assert!(segment(&[], Duration::seconds(10)).is_empty());
    }

    #[test]
    fn test_gap_above_threshold_splits() {
        let readings: Vec<Reading> = [0, 1, 2, 10, 31, 32].into_iter().map(at).collect();
        let blocks = segment(&readings, Duration::seconds(10));

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].len(), 4);
        assert_eq!(blocks[1].len(), 2);
        assert_eq!(blocks[0].end() - blocks[0].start(), Duration::seconds(10));
    }

    #[test]
    fn test_gap_equal_to_threshold_does_not_split() {
        let readings: Vec<Reading> = [0, 10, 20].into_iter().map(at).collect();
        assert_eq!(segment(&readings, Duration::seconds(10)).len(), 1);
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let readings: Vec<Reading> = [5, 0, 3, 1].into_iter().map(at).collect();
        let blocks = segment(&readings, Duration::seconds(10));

        assert_eq!(blocks.len(), 1);
        let times: Vec<_> = blocks[0].readings().iter().map(|r| r.timestamp).collect();
        let mut expected = times.clone();
        expected.sort();
        assert_eq!(times, expected);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let mut first = at(1);
        first.profile_id = Some("first".into());
        let mut second = at(1);
        second.profile_id = Some("second".into());
        let readings = vec![at(2), first, second];

        let blocks = segment(&readings, Duration::seconds(10));
        let order: Vec<_> = blocks[0]
            .readings()
            .iter()
            .map(|r| r.profile_id.clone())
            .collect();
        assert_eq!(order, vec![Some("first".into()), Some("second".into()), None]);
    }

    #[test]
    fn test_untimed_readings_are_skipped() {
        let readings = vec![at(0), Reading::new(None, None), at(1)];
        let blocks = segment(&readings, Duration::seconds(10));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 2);
    }
}
