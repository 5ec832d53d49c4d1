//! Series records and the series index.
//!
//! The index maps each canonical [`SeriesKey`] to the [`Series`] that owns its
//! label set and retained samples. It has no locking of its own; the
//! [`Store`](crate::store::Store) wraps it in a reader/writer lock.
//!
//! # Overview
//!
//! - [`Sample`] - One `(timestamp, value)` observation
//! - [`Series`] - Immutable labels plus a chronologically ordered sample buffer
//! - [`SeriesIndex`] - Key → series map; owns every series for the process lifetime
//!
//! Samples live in a `VecDeque`, so trimming the oldest entries on every
//! ingest is O(trimmed) and never shifts the survivors.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::labels::{Labels, SeriesKey};

/// A single observation: milliseconds since the Unix epoch and a value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Observed value.
    pub value: f64,
}

impl Sample {
    /// Creates a sample.
    pub const fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// One named, labeled sequence of samples.
///
/// Samples are non-decreasing in timestamp: the pipeline only ever appends
/// the ingestion time of the current batch.
#[derive(Debug, Clone)]
pub struct Series {
    labels: Labels,
    samples: VecDeque<Sample>,
}

impl Series {
    /// Creates an empty series for `labels`.
    pub fn new(labels: Labels) -> Self {
        Self {
            labels,
            samples: VecDeque::new(),
        }
    }

    /// The series' label set.
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Appends a sample at the newest end.
    ///
    /// Returns `false` and leaves the series untouched if the sample is older
    /// than the newest one already retained.
    pub fn push(&mut self, sample: Sample) -> bool {
        if self
            .samples
            .back()
            .is_some_and(|last| last.timestamp > sample.timestamp)
        {
            return false;
        }
        self.samples.push_back(sample);
        true
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if no samples are retained.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The newest sample, if any.
    pub fn latest(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    /// Iterates over samples oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Copies the samples with `mint <= timestamp <= maxt`, oldest first.
    pub fn samples_between(&self, mint: i64, maxt: i64) -> Vec<Sample> {
        if mint > maxt {
            return Vec::new();
        }
        let start = self.samples.partition_point(|s| s.timestamp < mint);
        let end = self.samples.partition_point(|s| s.timestamp <= maxt);
        self.samples.range(start..end).copied().collect()
    }

    /// Drops up to `count` of the oldest samples and returns how many went.
    pub fn drop_oldest(&mut self, count: usize) -> usize {
        let count = count.min(self.samples.len());
        self.samples.drain(..count);
        count
    }
}

/// Map from canonical series key to series.
///
/// Series are created lazily on first sight of a label set and are never
/// removed; only their sample history is trimmed.
///
/// # Thread Safety
///
/// The index is not synchronized. The store takes its write lock around the
/// whole lookup-or-insert step so concurrent ingests cannot create duplicates.
#[derive(Debug, Default)]
pub struct SeriesIndex {
    series: HashMap<SeriesKey, Series>,
}

impl SeriesIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the series for `labels`, creating it if needed.
    ///
    /// The boolean is `true` when the series was created by this call.
    pub fn get_or_create(&mut self, labels: Labels) -> (&mut Series, bool) {
        match self.series.entry(labels.key()) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => (entry.insert(Series::new(labels)), true),
        }
    }

    /// Looks up a series by key.
    pub fn get(&self, key: &SeriesKey) -> Option<&Series> {
        self.series.get(key)
    }

    /// Looks up a series by its label set.
    pub fn get_by_labels(&self, labels: &Labels) -> Option<&Series> {
        self.series.get(&labels.key())
    }

    /// Number of series in the index.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Returns `true` if the index holds no series.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Total number of retained samples across all series.
    pub fn sample_count(&self) -> usize {
        self.series.values().map(Series::len).sum()
    }

    /// Iterates over all series in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Series> {
        self.series.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(job: &str) -> Labels {
        Labels::from_pairs([("__name__", "up"), ("job", job)])
    }

    fn series_with(timestamps: &[i64]) -> Series {
        let mut series = Series::new(labels("a"));
        for &ts in timestamps {
            #[allow(clippy::cast_precision_loss)]
            series.push(Sample::new(ts, ts as f64));
        }
        series
    }

    #[test]
    fn test_get_or_create_reuses_series() {
        let mut index = SeriesIndex::new();

        let (series, created) = index.get_or_create(labels("a"));
        series.push(Sample::new(1, 1.0));
        assert!(created);

        let (series, created) = index.get_or_create(labels("a"));
        series.push(Sample::new(2, 2.0));
        assert!(!created);

        assert_eq!(index.len(), 1);
        assert_eq!(index.sample_count(), 2);
    }

    #[test]
    fn test_distinct_labels_distinct_series() {
        let mut index = SeriesIndex::new();
        index.get_or_create(labels("a"));
        index.get_or_create(labels("b"));
        assert_eq!(index.len(), 2);
        assert!(index.get_by_labels(&labels("b")).is_some());
        assert!(index.get_by_labels(&labels("c")).is_none());
    }

    #[test]
    fn test_samples_between_is_inclusive() {
        let series = series_with(&[10, 20, 30]);

        let picked: Vec<_> = series.samples_between(15, 25).iter().map(|s| s.timestamp).collect();
        assert_eq!(picked, vec![20]);

        let picked: Vec<_> = series.samples_between(10, 30).iter().map(|s| s.timestamp).collect();
        assert_eq!(picked, vec![10, 20, 30]);

        assert!(series.samples_between(31, 40).is_empty());
        assert!(series.samples_between(30, 10).is_empty());
    }

    #[test]
    fn test_samples_between_with_equal_timestamps() {
        let series = series_with(&[10, 20, 20, 30]);
        assert_eq!(series.samples_between(20, 20).len(), 2);
    }

    #[test]
    fn test_push_rejects_out_of_order() {
        let mut series = series_with(&[10, 20]);
        assert!(!series.push(Sample::new(15, 1.0)));
        assert!(series.push(Sample::new(20, 2.0)));
        assert_eq!(series.len(), 3);
        assert_eq!(series.latest(), Some(Sample::new(20, 2.0)));
    }

    #[test]
    fn test_drop_oldest() {
        let mut series = series_with(&[1, 2, 3, 4]);
        assert_eq!(series.drop_oldest(2), 2);
        let left: Vec<_> = series.samples().map(|s| s.timestamp).collect();
        assert_eq!(left, vec![3, 4]);

        assert_eq!(series.drop_oldest(10), 2);
        assert!(series.is_empty());
        assert_eq!(series.latest(), None);
    }
}
