//! Read-side contract used by query evaluators.
//!
//! An evaluator asks a [`Queryable`] for a [`Querier`] bound to a time window
//! `[mint, maxt]`, then calls [`Querier::select`], [`Querier::label_values`]
//! and [`Querier::label_names`] as often as it needs. Every call takes the
//! store's read lock for its own duration only and hands back owned copies,
//! so a multi-step evaluation never holds the lock between calls and never
//! observes a series half-way through an ingest.
//!
//! # Example Usage
//!
//! ```rust
//! use promsnap::matcher::Matcher;
//! use promsnap::observation::{Metric, MetricFamily, MetricKind, MetricValue, ObservationBatch};
//! use promsnap::query::{Querier, QueryContext, Queryable};
//! use promsnap::store::Store;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::default();
//! let mut batch = ObservationBatch::new();
//! batch.insert(
//!     "up".to_string(),
//!     MetricFamily::new(MetricKind::Gauge)
//!         .with_metric(Metric::new(&[("job", "api")], MetricValue::Gauge(1.0))),
//! );
//! store.ingest_at(&batch, 1_000);
//!
//! let querier = store.querier(0, 2_000);
//! let ctx = QueryContext::new();
//! for series in querier.select(&ctx, true, &[Matcher::metric_name("up")])? {
//!     let mut it = series.iter();
//!     while it.advance() {
//!         if let Some((t, v)) = it.at() {
//!             println!("{} @ {t}: {v}", series.labels());
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::QueryError;
use crate::labels::Labels;
use crate::matcher::{Matcher, matches_all};
use crate::series::{Sample, Series, SeriesIndex};

/// How many series a full-index scan visits between cancellation checks.
const CANCELLATION_CHECK_INTERVAL: usize = 256;

/// Cancellation and deadline for one query.
///
/// Cloning shares the cancellation token, so cancelling any clone cancels
/// them all.
#[derive(Debug, Clone)]
pub struct QueryContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    started: Instant,
}

impl QueryContext {
    /// A context with a fresh token and no deadline.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// A context driven by an existing cancellation token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
            started: Instant::now(),
        }
    }

    /// Narrows the deadline to at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now().checked_add(timeout);
        match deadline {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Narrows the deadline to `deadline`; an earlier existing deadline wins.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// The effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The token that cancels this query.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels the query.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fails if the query was cancelled or its deadline has passed.
    ///
    /// # Errors
    ///
    /// - [`QueryError::Cancelled`] once the token is cancelled
    /// - [`QueryError::DeadlineExceeded`] once the deadline has passed
    pub fn check(&self) -> Result<(), QueryError> {
        if self.cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(QueryError::DeadlineExceeded {
                elapsed: self.started.elapsed(),
            });
        }
        Ok(())
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that can open a [`Querier`] over a time window.
pub trait Queryable: Send + Sync {
    /// Opens a querier restricted to samples with `mint <= t <= maxt`.
    fn querier(&self, mint: i64, maxt: i64) -> Box<dyn Querier + '_>;
}

/// Read operations over one time window.
pub trait Querier {
    /// Returns the series matching every matcher, each cut down to the
    /// samples inside the window. Series with no samples in the window are
    /// left out. With `sorted`, series come back in [`Labels`] order.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Cancelled`] or [`QueryError::DeadlineExceeded`]
    /// if the context fires during the scan.
    fn select(
        &self,
        ctx: &QueryContext,
        sorted: bool,
        matchers: &[Matcher],
    ) -> Result<SeriesSet, QueryError>;

    /// Sorted, deduplicated values of `name` across matching series.
    ///
    /// # Errors
    ///
    /// Returns a cancellation error if the context fires during the scan.
    fn label_values(
        &self,
        ctx: &QueryContext,
        name: &str,
        matchers: &[Matcher],
    ) -> Result<Vec<String>, QueryError>;

    /// Sorted, deduplicated label names across matching series.
    ///
    /// # Errors
    ///
    /// Returns a cancellation error if the context fires during the scan.
    fn label_names(
        &self,
        ctx: &QueryContext,
        matchers: &[Matcher],
    ) -> Result<Vec<String>, QueryError>;
}

/// [`Querier`] over a store's series index.
#[derive(Debug)]
pub struct StoreQuerier<'a> {
    index: &'a RwLock<SeriesIndex>,
    mint: i64,
    maxt: i64,
}

impl<'a> StoreQuerier<'a> {
    /// Creates a querier over `index` for the window `[mint, maxt]`.
    pub(crate) fn new(index: &'a RwLock<SeriesIndex>, mint: i64, maxt: i64) -> Self {
        Self { index, mint, maxt }
    }

    /// Start of the window (inclusive).
    pub fn mint(&self) -> i64 {
        self.mint
    }

    /// End of the window (inclusive).
    pub fn maxt(&self) -> i64 {
        self.maxt
    }

    /// Visits every series accepted by `matchers`, checking the context
    /// before the scan and periodically during it.
    fn scan<F>(&self, ctx: &QueryContext, matchers: &[Matcher], mut visit: F) -> Result<(), QueryError>
    where
        F: FnMut(&Series),
    {
        ctx.check()?;
        let index = self.index.read();
        for (visited, series) in index.iter().enumerate() {
            if visited > 0 && visited % CANCELLATION_CHECK_INTERVAL == 0 {
                ctx.check()?;
            }
            if matches_all(matchers, series.labels()) {
                visit(series);
            }
        }
        Ok(())
    }
}

impl Querier for StoreQuerier<'_> {
    fn select(
        &self,
        ctx: &QueryContext,
        sorted: bool,
        matchers: &[Matcher],
    ) -> Result<SeriesSet, QueryError> {
        let mut selected = Vec::new();
        self.scan(ctx, matchers, |series| {
            let samples = series.samples_between(self.mint, self.maxt);
            if !samples.is_empty() {
                selected.push(SelectedSeries::new(series.labels().clone(), samples));
            }
        })?;

        if sorted {
            selected.sort_by(|a, b| a.labels.cmp(&b.labels));
        }

        tracing::trace!(
            matchers = matchers.len(),
            series = selected.len(),
            mint = self.mint,
            maxt = self.maxt,
            "select"
        );
        Ok(SeriesSet::new(selected))
    }

    fn label_values(
        &self,
        ctx: &QueryContext,
        name: &str,
        matchers: &[Matcher],
    ) -> Result<Vec<String>, QueryError> {
        let mut values = BTreeSet::new();
        self.scan(ctx, matchers, |series| {
            if let Some(value) = series.labels().get(name)
                && !value.is_empty()
            {
                values.insert(value.to_string());
            }
        })?;
        Ok(values.into_iter().collect())
    }

    fn label_names(
        &self,
        ctx: &QueryContext,
        matchers: &[Matcher],
    ) -> Result<Vec<String>, QueryError> {
        let mut names = BTreeSet::new();
        self.scan(ctx, matchers, |series| {
            for name in series.labels().names() {
                if !names.contains(name) {
                    names.insert(name.to_string());
                }
            }
        })?;
        Ok(names.into_iter().collect())
    }
}

/// A series copied out of the index, restricted to a time window.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedSeries {
    labels: Labels,
    samples: Vec<Sample>,
}

impl SelectedSeries {
    /// Creates a selected series; `samples` must be in timestamp order.
    pub fn new(labels: Labels, samples: Vec<Sample>) -> Self {
        Self { labels, samples }
    }

    /// The series' labels.
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// The in-window samples, oldest first.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// A fresh iterator positioned before the first sample.
    pub fn iter(&self) -> SampleIterator<'_> {
        SampleIterator::new(&self.samples)
    }

    /// Splits into labels and samples.
    pub fn into_parts(self) -> (Labels, Vec<Sample>) {
        (self.labels, self.samples)
    }
}

/// Result of [`Querier::select`].
#[derive(Debug)]
pub struct SeriesSet {
    series: std::vec::IntoIter<SelectedSeries>,
}

impl SeriesSet {
    /// Wraps an already filtered list of series.
    pub fn new(series: Vec<SelectedSeries>) -> Self {
        Self {
            series: series.into_iter(),
        }
    }

    /// A set with no series.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for SeriesSet {
    type Item = SelectedSeries;

    fn next(&mut self) -> Option<Self::Item> {
        self.series.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.series.size_hint()
    }
}

impl ExactSizeIterator for SeriesSet {}

/// Forward-only cursor over a series' samples.
///
/// The cursor starts before the first sample; [`advance`](Self::advance) or
/// [`seek`](Self::seek) must be called before [`at`](Self::at) yields a value.
/// It also implements `Iterator<Item = Sample>`.
#[derive(Debug, Clone)]
pub struct SampleIterator<'a> {
    samples: &'a [Sample],
    /// `None` before the first call; `Some(len)` once exhausted.
    position: Option<usize>,
}

impl<'a> SampleIterator<'a> {
    /// Creates a cursor over samples sorted by timestamp.
    pub fn new(samples: &'a [Sample]) -> Self {
        Self {
            samples,
            position: None,
        }
    }

    /// Moves to the next sample; returns `false` once exhausted.
    pub fn advance(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1).min(self.samples.len());
        self.position = Some(next);
        next < self.samples.len()
    }

    /// Moves to the first sample with timestamp `>= t`; returns `false` if
    /// there is none.
    ///
    /// Never moves backwards: if the current sample already satisfies the
    /// bound, the cursor stays where it is.
    pub fn seek(&mut self, t: i64) -> bool {
        let start = self.position.unwrap_or(0).min(self.samples.len());
        let offset = self.samples[start..].partition_point(|s| s.timestamp < t);
        let target = start + offset;
        self.position = Some(target);
        target < self.samples.len()
    }

    /// The current `(timestamp, value)`, or `None` before the first
    /// advance and after exhaustion.
    pub fn at(&self) -> Option<(i64, f64)> {
        self.current().map(|s| (s.timestamp, s.value))
    }

    /// The current timestamp.
    pub fn at_t(&self) -> Option<i64> {
        self.current().map(|s| s.timestamp)
    }

    fn current(&self) -> Option<&'a Sample> {
        self.position.and_then(|p| self.samples.get(p))
    }
}

impl Iterator for SampleIterator<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.advance() {
            self.current().copied()
        } else {
            None
        }
    }
}
