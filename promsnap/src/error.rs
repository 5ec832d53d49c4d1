//! Error types for the promsnap snapshot store.

use std::time::Duration;

use thiserror::Error;

/// The main error type for all promsnap operations.
///
/// Ingestion problems are normally swallowed per instance by the pipeline and
/// only counted; they surface through this type when a caller builds label
/// sets or extracts values directly.
#[derive(Error, Debug)]
pub enum PromsnapError {
    /// A metric instance could not be turned into a series observation.
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Error while parsing, evaluating or flattening a query.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Invalid store or engine configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors for a single malformed metric instance.
///
/// Every variant describes a `MalformedObservation`: the instance is dropped
/// (or its value defaulted) and the rest of the batch proceeds.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    /// The metric name is empty or contains characters outside
    /// `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    #[error("invalid metric name '{name}'")]
    InvalidMetricName {
        /// The rejected metric name.
        name: String,
    },

    /// A label name or value is unacceptable.
    #[error("invalid label {key}={value:?} on '{metric}': {reason}")]
    InvalidLabel {
        /// The metric the label belongs to.
        metric: String,
        /// The label name.
        key: String,
        /// The label value.
        value: String,
        /// Why the label is invalid.
        reason: String,
    },

    /// The same label name appears twice on one instance.
    #[error("duplicate label '{key}' on '{metric}'")]
    DuplicateLabel {
        /// The metric the label belongs to.
        metric: String,
        /// The repeated label name.
        key: String,
    },

    /// The instance carries no value at all.
    #[error("metric '{metric}' has no value")]
    MissingValue {
        /// The metric name.
        metric: String,
    },

    /// The instance value does not agree with the family's declared type.
    #[error("metric '{metric}' declared as {declared} but carries a {found} value")]
    ValueKindMismatch {
        /// The metric name.
        metric: String,
        /// The family's declared type.
        declared: &'static str,
        /// The type of the value actually present.
        found: &'static str,
    },
}

/// Errors raised on the read path.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The query string is not valid PromQL. Raised before any execution.
    #[error("invalid PromQL query: {0}")]
    Parse(String),

    /// The evaluator failed while executing an otherwise valid query.
    #[error("query execution failed: {0}")]
    Execution(String),

    /// The evaluator does not support this kind of expression.
    #[error("unsupported expression: {expr}")]
    UnsupportedExpression {
        /// The offending expression, rendered back to PromQL.
        expr: String,
    },

    /// A regex matcher could not be compiled.
    #[error("invalid matcher {name}=~{pattern:?}: {source}")]
    InvalidMatcher {
        /// The label name the matcher applies to.
        name: String,
        /// The pattern that failed to compile.
        pattern: String,
        /// The underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// The query touched more samples than the engine allows.
    #[error("query processing would load too many samples into memory (limit {limit})")]
    TooManySamples {
        /// The configured ceiling.
        limit: usize,
    },

    /// The caller cancelled the query.
    #[error("query cancelled")]
    Cancelled,

    /// The query deadline passed before evaluation finished.
    #[error("query timed out after {elapsed:?}")]
    DeadlineExceeded {
        /// Time spent since the context was created.
        elapsed: Duration,
    },

    /// The evaluator returned a result shape that cannot be flattened into rows.
    #[error("unsupported result type: {kind}")]
    UnsupportedResultType {
        /// Name of the result shape.
        kind: &'static str,
    },
}

impl QueryError {
    /// Returns `true` for failures reported by the evaluator during execution,
    /// as opposed to parse, cancellation or materialization failures.
    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            Self::Execution(_) | Self::UnsupportedExpression { .. } | Self::TooManySamples { .. }
        )
    }
}

/// Errors that can occur while validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The per-series retention cap must keep at least one sample.
    #[error("invalid retention cap: {cap} (must be > 0)")]
    InvalidRetentionCap {
        /// The rejected cap.
        cap: usize,
    },

    /// An engine option is out of range.
    #[error("invalid engine option: {reason}")]
    InvalidEngineOption {
        /// Description of what is wrong.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`crate::config::Config`].
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Type alias for `Result<T, PromsnapError>`.
pub type Result<T> = std::result::Result<T, PromsnapError>;
