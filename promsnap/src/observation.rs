//! Decoded metric observations handed over by the acquisition side.
//!
//! A collection round produces an [`ObservationBatch`]: metric families keyed
//! by metric name, each holding any number of labeled instances. The store
//! reduces every instance to one scalar at ingest time; histogram buckets and
//! summary quantiles are carried here for completeness but not stored.
//!
//! The types are `serde`-friendly so snapshots can be loaded from JSON:
//!
//! ```json
//! {
//!   "apiserver_request_total": {
//!     "type": "counter",
//!     "metrics": [
//!       { "labels": [["method", "GET"]], "value": { "counter": 5 } }
//!     ]
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// One collection round, keyed by metric name.
pub type ObservationBatch = HashMap<String, MetricFamily>;

/// Declared type of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Monotonic counter.
    Counter,
    /// Point-in-time gauge.
    Gauge,
    /// Bucketed histogram.
    Histogram,
    /// Quantile summary.
    Summary,
    /// No type information.
    #[default]
    Untyped,
}

impl MetricKind {
    /// Lower-case name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
            Self::Untyped => "untyped",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All instances of one metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricFamily {
    /// Declared type; decides how each instance is reduced to a scalar.
    #[serde(rename = "type", default)]
    pub kind: MetricKind,
    /// Help text from the exposition, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help: String,
    /// The individual instances.
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    /// Creates a family of the given kind with no instances.
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            help: String::new(),
            metrics: Vec::new(),
        }
    }

    /// Adds an instance (builder style).
    #[must_use]
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }
}

/// One labeled instance of a metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Instance labels, excluding the metric name.
    #[serde(default)]
    pub labels: Vec<(String, String)>,
    /// The observed value. `None` when the source omitted it.
    #[serde(default)]
    pub value: Option<MetricValue>,
}

impl Metric {
    /// Creates an instance from label pairs and a value.
    pub fn new<K, V>(labels: &[(K, V)], value: MetricValue) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self {
            labels: labels
                .iter()
                .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
                .collect(),
            value: Some(value),
        }
    }
}

/// Typed value of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    /// Counter value.
    Counter(f64),
    /// Gauge value.
    Gauge(f64),
    /// Untyped value.
    Untyped(f64),
    /// Histogram observation.
    Histogram(HistogramValue),
    /// Summary observation.
    Summary(SummaryValue),
}

impl MetricValue {
    /// The kind this value belongs to.
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Untyped(_) => MetricKind::Untyped,
            Self::Histogram(_) => MetricKind::Histogram,
            Self::Summary(_) => MetricKind::Summary,
        }
    }
}

/// Histogram payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramValue {
    /// Total number of observations.
    pub sample_count: u64,
    /// Sum of all observations.
    #[serde(default)]
    pub sample_sum: f64,
    /// Cumulative buckets as `(upper_bound, cumulative_count)`.
    #[serde(default)]
    pub buckets: Vec<(f64, u64)>,
}

/// Summary payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryValue {
    /// Total number of observations.
    pub sample_count: u64,
    /// Sum of all observations.
    #[serde(default)]
    pub sample_sum: f64,
    /// Quantiles as `(quantile, value)`.
    #[serde(default)]
    pub quantiles: Vec<(f64, f64)>,
}

/// Reduces an instance to the scalar the store keeps.
///
/// Counters, gauges and untyped metrics keep their value; histograms and
/// summaries keep their observation count.
///
/// # Errors
///
/// - [`IngestError::MissingValue`] if the instance has no value
/// - [`IngestError::ValueKindMismatch`] if the value disagrees with `kind`
#[allow(clippy::cast_precision_loss)] // counts above 2^53 lose precision, as in the exposition format
pub fn extract_value(
    metric_name: &str,
    kind: MetricKind,
    value: Option<&MetricValue>,
) -> Result<f64, IngestError> {
    let Some(value) = value else {
        return Err(IngestError::MissingValue {
            metric: metric_name.to_string(),
        });
    };

    match (kind, value) {
        (MetricKind::Counter, MetricValue::Counter(v))
        | (MetricKind::Gauge, MetricValue::Gauge(v))
        | (MetricKind::Untyped, MetricValue::Untyped(v)) => Ok(*v),
        (MetricKind::Histogram, MetricValue::Histogram(h)) => Ok(h.sample_count as f64),
        (MetricKind::Summary, MetricValue::Summary(s)) => Ok(s.sample_count as f64),
        (declared, found) => Err(IngestError::ValueKindMismatch {
            metric: metric_name.to_string(),
            declared: declared.as_str(),
            found: found.kind().as_str(),
        }),
    }
}
