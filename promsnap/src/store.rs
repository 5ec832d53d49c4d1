//! Store module: the in-memory series store.
//!
//! The [`Store`] owns the [`SeriesIndex`] behind a single reader/writer lock
//! and is the only writer to it. It is meant to be shared as `Arc<Store>`
//! between one ingest driver and any number of query evaluators.
//!
//! # Ingest
//!
//! [`Store::ingest`] turns one [`ObservationBatch`] into samples:
//!
//! 1. Every instance gets a canonical label set (metric name plus its labels,
//!    sorted by name) and a scalar value. This happens before the lock is
//!    taken. Instances with an invalid name or labels are dropped; instances
//!    whose value cannot be read are kept with value `0.0`.
//! 2. The write lock is taken once for the whole batch. One timestamp is
//!    chosen for the batch, each sample is appended to its series (created
//!    on first sight) and the series is trimmed to the retention cap.
//!
//! Readers therefore see either none or all of a batch.
//!
//! # Example Usage
//!
//! ```rust
//! use promsnap::engine::SelectorEngine;
//! use promsnap::materialize::Materializer;
//! use promsnap::observation::{Metric, MetricFamily, MetricKind, MetricValue, ObservationBatch};
//! use promsnap::query::QueryContext;
//! use promsnap::store::Store;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::default();
//!
//! let mut batch = ObservationBatch::new();
//! batch.insert(
//!     "kubelet_running_pods".to_string(),
//!     MetricFamily::new(MetricKind::Gauge)
//!         .with_metric(Metric::new(&[("node", "n1")], MetricValue::Gauge(12.0))),
//! );
//! let report = store.ingest_at(&batch, 1_700_000_000_000);
//! assert_eq!(report.accepted, 1);
//!
//! let rows = store.execute(
//!     &QueryContext::new(),
//!     "kubelet_running_pods",
//!     1_700_000_000_000,
//!     &SelectorEngine::default(),
//!     &Materializer::default(),
//! )?;
//! assert_eq!(rows[0].value, 12.0);
//! # Ok(())
//! # }
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::config::StoreConfig;
use crate::engine::{Evaluator, SelectorEngine, parse_query};
use crate::error::Result;
use crate::labels::Labels;
use crate::materialize::{Materializer, ResultRow};
use crate::observation::{ObservationBatch, extract_value};
use crate::query::{Querier, QueryContext, Queryable, StoreQuerier};
use crate::retention::RetentionPolicy;
use crate::series::{Sample, SeriesIndex};

/// Milliseconds since the Unix epoch according to the system clock.
///
/// A clock set before the epoch reads as `0`.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Outcome of one [`Store::ingest`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Timestamp assigned to every sample of the batch.
    pub timestamp: i64,
    /// Instances appended as samples.
    pub accepted: usize,
    /// Instances dropped for an invalid metric name or labels.
    pub dropped: usize,
    /// Accepted instances whose value could not be read and was stored as `0.0`.
    pub value_errors: usize,
    /// Series created by this batch.
    pub series_created: usize,
    /// Samples trimmed by the retention cap.
    pub samples_trimmed: usize,
    /// Samples rejected because their series already holds a newer sample.
    pub out_of_order: usize,
}

/// An instance reduced to what the locked section needs.
struct Prepared {
    labels: Labels,
    value: f64,
}

/// The in-memory series store.
///
/// # Thread Safety
///
/// All methods take `&self`. Ingest holds the write lock for the apply step
/// of one batch; queries take the read lock once per [`Querier`] call.
#[derive(Debug, Default)]
pub struct Store {
    index: RwLock<SeriesIndex>,
    retention: RetentionPolicy,
}

impl Store {
    /// Creates an empty store.
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` does not validate.
    pub fn new(config: StoreConfig) -> Result<Self> {
        Ok(Self::with_retention(config.retention_policy()?))
    }

    /// Creates an empty store with an explicit retention policy.
    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            index: RwLock::new(SeriesIndex::new()),
            retention,
        }
    }

    /// The retention policy applied after every append.
    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Ingests a batch stamped with the current wall-clock time.
    ///
    /// The timestamp is read after the write lock is acquired, so batches
    /// applied later never carry an earlier timestamp unless the system
    /// clock steps backwards.
    pub fn ingest(&self, batch: &ObservationBatch) -> IngestReport {
        let (prepared, report) = prepare(batch);
        let mut index = self.index.write();
        let timestamp = now_millis();
        self.apply(&mut index, prepared, timestamp, report)
    }

    /// Ingests a batch with every sample stamped `timestamp` (milliseconds).
    pub fn ingest_at(&self, batch: &ObservationBatch, timestamp: i64) -> IngestReport {
        let (prepared, report) = prepare(batch);
        let mut index = self.index.write();
        self.apply(&mut index, prepared, timestamp, report)
    }

    fn apply(
        &self,
        index: &mut SeriesIndex,
        prepared: Vec<Prepared>,
        timestamp: i64,
        mut report: IngestReport,
    ) -> IngestReport {
        report.timestamp = timestamp;
        for Prepared { labels, value } in prepared {
            let (series, created) = index.get_or_create(labels);
            if created {
                report.series_created += 1;
            }
            if series.push(Sample::new(timestamp, value)) {
                report.accepted += 1;
                report.samples_trimmed += self.retention.apply(series);
            } else {
                report.out_of_order += 1;
            }
        }

        if report.out_of_order > 0 {
            tracing::warn!(
                timestamp,
                rejected = report.out_of_order,
                "samples older than their series' newest sample were rejected"
            );
        }
        tracing::debug!(
            timestamp,
            accepted = report.accepted,
            dropped = report.dropped,
            value_errors = report.value_errors,
            series_created = report.series_created,
            samples_trimmed = report.samples_trimmed,
            series_total = index.len(),
            "ingested batch"
        );
        report
    }

    /// Number of distinct series.
    pub fn series_count(&self) -> usize {
        self.index.read().len()
    }

    /// Total number of retained samples.
    pub fn sample_count(&self) -> usize {
        self.index.read().sample_count()
    }

    /// Copies the retained samples of the series with exactly `labels`.
    pub fn series_samples(&self, labels: &Labels) -> Option<Vec<Sample>> {
        self.index
            .read()
            .get_by_labels(labels)
            .map(|series| series.samples().copied().collect())
    }

    /// Parses `query`, evaluates it at `time` (milliseconds) against this
    /// store and materializes the result into rows.
    ///
    /// # Errors
    ///
    /// - A parse error (`invalid PromQL query: ...`) if `query` is not valid PromQL
    /// - Any execution error reported by `evaluator`
    /// - An unsupported-result-type error from `materializer`
    pub fn execute(
        &self,
        ctx: &QueryContext,
        query: &str,
        time: i64,
        evaluator: &dyn Evaluator,
        materializer: &Materializer,
    ) -> Result<Vec<ResultRow>> {
        let expr = parse_query(query)?;
        let value = evaluator.evaluate(ctx, self, &expr, time)?;
        Ok(materializer.materialize(&value)?)
    }

    /// Evaluates `query` at the current time with the default engine and
    /// materializer.
    ///
    /// # Errors
    ///
    /// See [`Store::execute`].
    pub fn instant_query(&self, query: &str) -> Result<Vec<ResultRow>> {
        self.execute(
            &QueryContext::new(),
            query,
            now_millis(),
            &SelectorEngine::default(),
            &Materializer::default(),
        )
    }
}

impl Queryable for Store {
    fn querier(&self, mint: i64, maxt: i64) -> Box<dyn Querier + '_> {
        Box::new(StoreQuerier::new(&self.index, mint, maxt))
    }
}

/// Builds label sets and values for a batch without touching the index.
fn prepare(batch: &ObservationBatch) -> (Vec<Prepared>, IngestReport) {
    let mut report = IngestReport::default();
    let mut prepared = Vec::with_capacity(batch.values().map(|f| f.metrics.len()).sum());

    for (name, family) in batch {
        for metric in &family.metrics {
            let labels = match Labels::for_metric(name, &metric.labels) {
                Ok(labels) => labels,
                Err(e) => {
                    tracing::warn!(metric = %name, error = %e, "dropping malformed observation");
                    report.dropped += 1;
                    continue;
                }
            };
            let value = match extract_value(name, family.kind, metric.value.as_ref()) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(metric = %name, error = %e, "storing 0 for unreadable value");
                    report.value_errors += 1;
                    0.0
                }
            };
            prepared.push(Prepared { labels, value });
        }
    }

    (prepared, report)
}
