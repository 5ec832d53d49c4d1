//! Flattening query results into rows.
//!
//! A [`ResultRow`] is one `(metric, labels, value, timestamp)` tuple, the
//! shape callers print, serialize or compare. The metric name is pulled out
//! of the label set; the remaining labels are kept in name order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::QueryValue;
use crate::error::QueryError;
use crate::labels::Labels;

/// Metric name given to rows produced from a scalar result.
pub const SCALAR_METRIC_NAME: &str = "scalar";

/// One flattened result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Value of `__name__`, or empty if the series has none.
    pub metric_name: String,
    /// All other labels.
    pub labels: BTreeMap<String, String>,
    /// Sample value.
    pub value: f64,
    /// Sample timestamp in milliseconds since the epoch.
    pub timestamp: i64,
}

impl ResultRow {
    fn from_labels(labels: &Labels, value: f64, timestamp: i64) -> Self {
        Self {
            metric_name: labels.metric_name().unwrap_or_default().to_string(),
            labels: labels.to_map_without_name(),
            value,
            timestamp,
        }
    }
}

/// How a range (matrix) result is flattened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeMode {
    /// One row per series holding its newest sample.
    #[default]
    Latest,
    /// One row per sample.
    AllPoints,
}

/// Turns a [`QueryValue`] into rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct Materializer {
    range_mode: RangeMode,
}

impl Materializer {
    /// Creates a materializer with the given range handling.
    pub fn new(range_mode: RangeMode) -> Self {
        Self { range_mode }
    }

    /// The configured range handling.
    pub fn range_mode(&self) -> RangeMode {
        self.range_mode
    }

    /// Flattens `value`.
    ///
    /// - Vector: one row per sample
    /// - Scalar: one row named [`SCALAR_METRIC_NAME`] with no labels
    /// - Matrix: per [`RangeMode`]; series without samples yield nothing
    ///
    /// Does not modify `value`, so calling it twice gives equal rows.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnsupportedResultType`] for string results.
    pub fn materialize(&self, value: &QueryValue) -> Result<Vec<ResultRow>, QueryError> {
        let rows = match value {
            QueryValue::Vector(samples) => samples
                .iter()
                .map(|s| ResultRow::from_labels(&s.labels, s.value, s.timestamp))
                .collect(),
            QueryValue::Scalar(scalar) => vec![ResultRow {
                metric_name: SCALAR_METRIC_NAME.to_string(),
                labels: BTreeMap::new(),
                value: scalar.value,
                timestamp: scalar.timestamp,
            }],
            QueryValue::Matrix(series) => match self.range_mode {
                RangeMode::Latest => series
                    .iter()
                    .filter_map(|s| {
                        s.samples
                            .last()
                            .map(|p| ResultRow::from_labels(&s.labels, p.value, p.timestamp))
                    })
                    .collect(),
                RangeMode::AllPoints => series
                    .iter()
                    .flat_map(|s| {
                        s.samples
                            .iter()
                            .map(|p| ResultRow::from_labels(&s.labels, p.value, p.timestamp))
                    })
                    .collect(),
            },
            QueryValue::String(_) => {
                return Err(QueryError::UnsupportedResultType {
                    kind: value.kind(),
                });
            }
        };
        Ok(rows)
    }
}

/// Sorts rows by metric name, then labels, then timestamp.
pub fn sort_rows(rows: &mut [ResultRow]) {
    rows.sort_by(|a, b| {
        a.metric_name
            .cmp(&b.metric_name)
            .then_with(|| a.labels.cmp(&b.labels))
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{InstantSample, RangeSeries, ScalarValue, StringValue};
    use crate::series::Sample;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        Labels::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_vector_rows() {
        let value = QueryValue::Vector(vec![
            InstantSample {
                labels: labels(&[("__name__", "kubelet_running_pods"), ("node", "n1")]),
                timestamp: 1_000,
                value: 12.0,
            },
            InstantSample {
                labels: labels(&[("node", "n2")]),
                timestamp: 1_000,
                value: 3.0,
            },
        ]);

        let rows = Materializer::default().materialize(&value).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].metric_name, "kubelet_running_pods");
        assert_eq!(rows[0].labels.get("node").map(String::as_str), Some("n1"));
        assert!(!rows[0].labels.contains_key("__name__"));
        assert_eq!(rows[1].metric_name, "");
    }

    #[test]
    fn test_scalar_row() {
        let value = QueryValue::Scalar(ScalarValue {
            timestamp: 5,
            value: 1.5,
        });
        let rows = Materializer::default().materialize(&value).unwrap();
        assert_eq!(
            rows,
            vec![ResultRow {
                metric_name: "scalar".to_string(),
                labels: BTreeMap::new(),
                value: 1.5,
                timestamp: 5,
            }]
        );
    }

    #[test]
    fn test_matrix_modes() {
        let value = QueryValue::Matrix(vec![
            RangeSeries {
                labels: labels(&[("__name__", "m"), ("k", "a")]),
                samples: vec![Sample::new(1, 1.0), Sample::new(2, 2.0)],
            },
            RangeSeries {
                labels: labels(&[("__name__", "m"), ("k", "b")]),
                samples: Vec::new(),
            },
        ]);

        let latest = Materializer::new(RangeMode::Latest).materialize(&value).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].timestamp, 2);
        assert_eq!(latest[0].value, 2.0);

        let all = Materializer::new(RangeMode::AllPoints).materialize(&value).unwrap();
        let timestamps: Vec<_> = all.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![1, 2]);
    }

    #[test]
    fn test_string_rejected() {
        let value = QueryValue::String(StringValue {
            timestamp: 0,
            value: "x".to_string(),
        });
        let err = Materializer::default().materialize(&value).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedResultType { kind: "string" }));
        assert_eq!(err.to_string(), "unsupported result type: string");
    }

    #[test]
    fn test_materialize_is_repeatable() {
        let value = QueryValue::Vector(vec![InstantSample {
            labels: labels(&[("__name__", "m")]),
            timestamp: 1,
            value: 1.0,
        }]);
        let materializer = Materializer::default();
        assert_eq!(
            materializer.materialize(&value).unwrap(),
            materializer.materialize(&value).unwrap()
        );
    }

    #[test]
    fn test_sort_rows() {
        let row = |name: &str, k: &str, ts: i64| ResultRow {
            metric_name: name.to_string(),
            labels: BTreeMap::from([("k".to_string(), k.to_string())]),
            value: 0.0,
            timestamp: ts,
        };
        let mut rows = vec![row("b", "x", 1), row("a", "y", 1), row("a", "x", 2), row("a", "x", 1)];
        sort_rows(&mut rows);
        let order: Vec<_> = rows
            .iter()
            .map(|r| (r.metric_name.as_str(), r.labels["k"].as_str(), r.timestamp))
            .collect();
        assert_eq!(order, vec![("a", "x", 1), ("a", "x", 2), ("a", "y", 1), ("b", "x", 1)]);
    }
}
