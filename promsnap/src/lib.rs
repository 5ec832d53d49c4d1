//! # promsnap
//!
//! In-memory point-in-time metrics store with a PromQL-facing query adapter.
//!
//! promsnap keeps a short, capped history of the metrics scraped from a
//! cluster's components and answers PromQL queries over it. It is meant to
//! live inside a diagnostic tool: one ingest driver feeds it decoded
//! observation batches, and any number of callers query it concurrently.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Canonical series identity: metric name plus sorted labels, so label
//!   order in the source never splits a series
//! - Batch-atomic ingest: one timestamp and one write lock per batch
//! - Bounded memory: each series keeps its newest N samples (1000 by default)
//! - Pluggable evaluation behind the [`Evaluator`] trait; a selector-only
//!   engine is built in
//!
//! ## Quick Start
//!
//! ```rust
//! use promsnap::{Metric, MetricFamily, MetricKind, MetricValue, ObservationBatch, Store};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::default();
//!
//! let mut batch = ObservationBatch::new();
//! batch.insert(
//!     "apiserver_request_total".to_string(),
//!     MetricFamily::new(MetricKind::Counter)
//!         .with_metric(Metric::new(&[("method", "GET")], MetricValue::Counter(5.0)))
//!         .with_metric(Metric::new(&[("method", "POST")], MetricValue::Counter(3.0))),
//! );
//! store.ingest(&batch);
//!
//! let rows = store.instant_query(r#"apiserver_request_total{method="GET"}"#)?;
//! assert_eq!(rows.len(), 1);
//! assert_eq!(rows[0].value, 5.0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`] - Owns the series index; ingest and query entry points
//! - [`Querier`] - Window-bounded read contract used by evaluators
//! - [`Evaluator`] / [`SelectorEngine`] - Turns a parsed expression into a [`QueryValue`]
//! - [`Materializer`] - Flattens a [`QueryValue`] into [`ResultRow`]s
//!
//! ## Modules
//!
//! - [`store`] - Ingest pipeline and query entry points
//! - [`observation`] - Decoded metric families handed to ingest
//! - [`labels`] - Canonical label sets and series keys
//! - [`series`] - Per-series sample buffers and the series index
//! - [`retention`] - Per-series sample cap
//! - [`matcher`] - Label matchers
//! - [`query`] - Querier contract, series sets and sample cursors
//! - [`engine`] - PromQL parsing and the built-in evaluator
//! - [`materialize`] - Result rows
//! - [`config`] - Store and engine settings
//! - [`error`] - Error types

pub mod config;
pub mod engine;
pub mod error;
pub mod labels;
pub mod materialize;
pub mod matcher;
pub mod observation;
pub mod query;
pub mod retention;
pub mod series;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use config::{Config, EngineConfig, StoreConfig};
pub use engine::{Evaluator, QueryValue, SelectorEngine, parse_query, parse_selector};
pub use error::{ConfigError, IngestError, PromsnapError, QueryError, Result};
pub use labels::Labels;
pub use materialize::{Materializer, RangeMode, ResultRow};
pub use matcher::{MatchOp, Matcher};
pub use observation::{Metric, MetricFamily, MetricKind, MetricValue, ObservationBatch};
pub use query::{Querier, QueryContext, Queryable};
pub use store::{IngestReport, Store};
