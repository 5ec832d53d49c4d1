//! PromQL parsing and the built-in selector evaluator.
//!
//! Parsing is delegated to `promql-parser`; evaluation goes through the
//! [`Evaluator`] trait so any engine that can read a [`Queryable`] can be
//! plugged into [`Store::execute`](crate::store::Store::execute).
//!
//! [`SelectorEngine`] is the evaluator shipped with the crate. It covers the
//! expressions a point-in-time view needs:
//!
//! - number and string literals
//! - parentheses and unary minus
//! - instant vector selectors, with `offset`
//! - range vector selectors, with `offset`
//!
//! Anything else (functions, aggregations, binary operators, subqueries,
//! `@` modifiers) fails with [`QueryError::UnsupportedExpression`].

use std::time::Duration;

use promql_parser::label::{MatchOp as ParsedMatchOp, Matcher as ParsedMatcher};
use promql_parser::parser::{self, Expr, MatrixSelector, Offset, VectorSelector};

use crate::config::EngineConfig;
use crate::error::QueryError;
use crate::labels::Labels;
use crate::matcher::{MatchOp, Matcher};
use crate::query::{QueryContext, Queryable};
use crate::series::Sample;

/// One sample of an instant vector.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantSample {
    /// Series labels.
    pub labels: Labels,
    /// Timestamp of the selected sample (milliseconds).
    pub timestamp: i64,
    /// Sample value.
    pub value: f64,
}

/// A scalar result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarValue {
    /// Evaluation time (milliseconds).
    pub timestamp: i64,
    /// The value.
    pub value: f64,
}

/// A string result.
#[derive(Debug, Clone, PartialEq)]
pub struct StringValue {
    /// Evaluation time (milliseconds).
    pub timestamp: i64,
    /// The value.
    pub value: String,
}

/// One series of a range vector.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSeries {
    /// Series labels.
    pub labels: Labels,
    /// Samples inside the range, oldest first.
    pub samples: Vec<Sample>,
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    /// Instant vector: at most one sample per series.
    Vector(Vec<InstantSample>),
    /// A single number.
    Scalar(ScalarValue),
    /// Range vector: a window of samples per series.
    Matrix(Vec<RangeSeries>),
    /// A string literal.
    String(StringValue),
}

impl QueryValue {
    /// PromQL name of the value type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Vector(_) => "vector",
            Self::Scalar(_) => "scalar",
            Self::Matrix(_) => "matrix",
            Self::String(_) => "string",
        }
    }
}

/// Evaluates a parsed expression against storage.
pub trait Evaluator: Send + Sync {
    /// Evaluates `expr` at `time` (milliseconds since the epoch).
    ///
    /// # Errors
    ///
    /// Returns an execution error ([`QueryError::is_execution_error`]) on
    /// failure.
    fn evaluate(
        &self,
        ctx: &QueryContext,
        storage: &dyn Queryable,
        expr: &Expr,
        time: i64,
    ) -> Result<QueryValue, QueryError>;
}

/// Parses a PromQL expression.
///
/// # Errors
///
/// Returns [`QueryError::Parse`] with the parser's message.
pub fn parse_query(query: &str) -> Result<Expr, QueryError> {
    parser::parse(query).map_err(QueryError::Parse)
}

/// Parses a series selector such as `up{job=~"api|web"}` into matchers.
///
/// # Errors
///
/// Returns [`QueryError::Parse`] if `selector` is not a plain vector
/// selector, or a matcher error for an invalid regex.
pub fn parse_selector(selector: &str) -> Result<Vec<Matcher>, QueryError> {
    match parse_query(selector)? {
        Expr::VectorSelector(vs) => selector_matchers(&vs),
        _ => Err(QueryError::Parse(format!(
            "expected a vector selector, got {selector:?}"
        ))),
    }
}

fn selector_matchers(vs: &VectorSelector) -> Result<Vec<Matcher>, QueryError> {
    if !vs.matchers.or_matchers.is_empty() {
        return Err(QueryError::UnsupportedExpression {
            expr: "selector with 'or' matchers".to_string(),
        });
    }

    let mut matchers = Vec::with_capacity(vs.matchers.matchers.len() + 1);
    if let Some(name) = &vs.name {
        matchers.push(Matcher::metric_name(name.clone()));
    }
    for m in &vs.matchers.matchers {
        matchers.push(convert_matcher(m)?);
    }
    Ok(matchers)
}

fn convert_matcher(m: &ParsedMatcher) -> Result<Matcher, QueryError> {
    let op = match &m.op {
        ParsedMatchOp::Equal => MatchOp::Equal,
        ParsedMatchOp::NotEqual => MatchOp::NotEqual,
        ParsedMatchOp::Re(_) => MatchOp::Regex,
        ParsedMatchOp::NotRe(_) => MatchOp::NotRegex,
    };
    Matcher::new(op, m.name.clone(), m.value.clone())
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn offset_millis(offset: Option<&Offset>) -> i64 {
    match offset {
        Some(Offset::Pos(d)) => duration_millis(*d),
        Some(Offset::Neg(d)) => duration_millis(*d).saturating_neg(),
        None => 0,
    }
}

/// Selector-only PromQL evaluator.
///
/// Instant selectors return, per matching series, the newest sample in
/// `(t - lookback_delta, t]`, keeping that sample's own timestamp. Range
/// selectors return every sample in `(t - range, t]`.
#[derive(Debug, Clone, Default)]
pub struct SelectorEngine {
    config: EngineConfig,
}

impl SelectorEngine {
    /// Creates an engine with the given limits.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// The engine's limits.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Evaluator for SelectorEngine {
    fn evaluate(
        &self,
        ctx: &QueryContext,
        storage: &dyn Queryable,
        expr: &Expr,
        time: i64,
    ) -> Result<QueryValue, QueryError> {
        let ctx = ctx.clone().with_timeout(self.config.timeout);
        let mut evaluation = Evaluation {
            config: &self.config,
            ctx: &ctx,
            storage,
            loaded: 0,
        };
        let value = evaluation.eval(expr, time)?;
        tracing::debug!(
            kind = value.kind(),
            samples = evaluation.loaded,
            time,
            "evaluated query"
        );
        Ok(value)
    }
}

/// State of one evaluation.
struct Evaluation<'a> {
    config: &'a EngineConfig,
    ctx: &'a QueryContext,
    storage: &'a dyn Queryable,
    loaded: usize,
}

impl Evaluation<'_> {
    fn eval(&mut self, expr: &Expr, time: i64) -> Result<QueryValue, QueryError> {
        self.ctx.check()?;
        match expr {
            Expr::NumberLiteral(lit) => Ok(QueryValue::Scalar(ScalarValue {
                timestamp: time,
                value: lit.val,
            })),
            Expr::StringLiteral(lit) => Ok(QueryValue::String(StringValue {
                timestamp: time,
                value: lit.val.clone(),
            })),
            Expr::Paren(paren) => self.eval(&paren.expr, time),
            Expr::Unary(unary) => negate(self.eval(&unary.expr, time)?),
            Expr::VectorSelector(vs) => self.instant_vector(vs, time).map(QueryValue::Vector),
            Expr::MatrixSelector(ms) => self.range_vector(ms, time).map(QueryValue::Matrix),
            other => Err(QueryError::UnsupportedExpression {
                expr: other.to_string(),
            }),
        }
    }

    /// Counts samples against the per-query limit.
    fn charge(&mut self, samples: usize) -> Result<(), QueryError> {
        self.loaded = self.loaded.saturating_add(samples);
        if self.loaded > self.config.max_samples {
            return Err(QueryError::TooManySamples {
                limit: self.config.max_samples,
            });
        }
        Ok(())
    }

    fn instant_vector(
        &mut self,
        vs: &VectorSelector,
        time: i64,
    ) -> Result<Vec<InstantSample>, QueryError> {
        if vs.at.is_some() {
            return Err(QueryError::UnsupportedExpression {
                expr: "@ modifier".to_string(),
            });
        }
        let matchers = selector_matchers(vs)?;
        let t = time.saturating_sub(offset_millis(vs.offset.as_ref()));
        let mint = t
            .saturating_sub(duration_millis(self.config.lookback_delta))
            .saturating_add(1);

        let querier = self.storage.querier(mint, t);
        let mut out = Vec::new();
        for series in querier.select(self.ctx, true, &matchers)? {
            let Some(latest) = series.samples().last().copied() else {
                continue;
            };
            self.charge(1)?;
            out.push(InstantSample {
                labels: series.labels().clone(),
                timestamp: latest.timestamp,
                value: latest.value,
            });
        }
        Ok(out)
    }

    fn range_vector(
        &mut self,
        ms: &MatrixSelector,
        time: i64,
    ) -> Result<Vec<RangeSeries>, QueryError> {
        let vs = &ms.vs;
        if vs.at.is_some() {
            return Err(QueryError::UnsupportedExpression {
                expr: "@ modifier".to_string(),
            });
        }
        let matchers = selector_matchers(vs)?;
        let t = time.saturating_sub(offset_millis(vs.offset.as_ref()));
        let mint = t
            .saturating_sub(duration_millis(ms.range))
            .saturating_add(1);

        let querier = self.storage.querier(mint, t);
        let mut out = Vec::new();
        for series in querier.select(self.ctx, true, &matchers)? {
            let (labels, samples) = series.into_parts();
            self.charge(samples.len())?;
            out.push(RangeSeries { labels, samples });
        }
        Ok(out)
    }
}

/// Unary minus. Vector samples lose their metric name.
fn negate(value: QueryValue) -> Result<QueryValue, QueryError> {
    match value {
        QueryValue::Scalar(s) => Ok(QueryValue::Scalar(ScalarValue {
            value: -s.value,
            ..s
        })),
        QueryValue::Vector(samples) => Ok(QueryValue::Vector(
            samples
                .into_iter()
                .map(|s| InstantSample {
                    labels: s.labels.without_metric_name(),
                    timestamp: s.timestamp,
                    value: -s.value,
                })
                .collect(),
        )),
        other => Err(QueryError::Execution(format!(
            "unary minus is not defined on a {} value",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Metric, MetricFamily, MetricKind, MetricValue, ObservationBatch};
    use crate::store::Store;

    const MINUTE: i64 = 60_000;

    fn store_with_requests(timestamps: &[i64]) -> Store {
        let store = Store::default();
        let mut batch = ObservationBatch::new();
        batch.insert(
            "http_requests_total".to_string(),
            MetricFamily::new(MetricKind::Counter)
                .with_metric(Metric::new(&[("method", "GET")], MetricValue::Counter(5.0)))
                .with_metric(Metric::new(&[("method", "POST")], MetricValue::Counter(3.0))),
        );
        for &ts in timestamps {
            store.ingest_at(&batch, ts);
        }
        store
    }

    fn eval(store: &Store, query: &str, time: i64) -> Result<QueryValue, QueryError> {
        let expr = parse_query(query)?;
        SelectorEngine::default().evaluate(&QueryContext::new(), store, &expr, time)
    }

    #[test]
    fn test_parse_error_message() {
        let err = parse_query("rate(").unwrap_err();
        assert!(matches!(err, QueryError::Parse(_)));
        assert!(err.to_string().starts_with("invalid PromQL query: "));
    }

    #[test]
    fn test_parse_selector() {
        let matchers = parse_selector(r#"up{job=~"api|web", env!="dev"}"#).unwrap();
        assert_eq!(matchers.len(), 3);
        assert_eq!(matchers[0], Matcher::metric_name("up"));
        assert!(matchers.iter().any(|m| m.op() == MatchOp::Regex && m.name() == "job"));
        assert!(matchers.iter().any(|m| m.op() == MatchOp::NotEqual && m.value() == "dev"));

        assert!(parse_selector("sum(up)").is_err());
    }

    #[test]
    fn test_instant_selector_returns_latest_sample() {
        let store = store_with_requests(&[MINUTE, 2 * MINUTE]);
        let QueryValue::Vector(samples) =
            eval(&store, r#"http_requests_total{method="GET"}"#, 3 * MINUTE).unwrap()
        else {
            panic!("expected a vector");
        };
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp, 2 * MINUTE);
        assert_eq!(samples[0].value, 5.0);
        assert_eq!(samples[0].labels.get("method"), Some("GET"));
    }

    #[test]
    fn test_instant_selector_respects_lookback() {
        let store = store_with_requests(&[MINUTE]);
        let value = eval(&store, "http_requests_total", MINUTE + 6 * MINUTE).unwrap();
        assert_eq!(value, QueryValue::Vector(Vec::new()));

        // Sample exactly at the evaluation time is included.
        let QueryValue::Vector(samples) = eval(&store, "http_requests_total", MINUTE).unwrap()
        else {
            panic!("expected a vector");
        };
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn test_offset_shifts_window() {
        let store = store_with_requests(&[MINUTE, 10 * MINUTE]);
        let QueryValue::Vector(samples) =
            eval(&store, "http_requests_total offset 8m", 10 * MINUTE).unwrap()
        else {
            panic!("expected a vector");
        };
        assert!(samples.iter().all(|s| s.timestamp == MINUTE));
    }

    #[test]
    fn test_range_selector() {
        let store = store_with_requests(&[MINUTE, 2 * MINUTE, 3 * MINUTE]);
        let QueryValue::Matrix(series) =
            eval(&store, r#"http_requests_total{method="POST"}[2m]"#, 3 * MINUTE).unwrap()
        else {
            panic!("expected a matrix");
        };
        assert_eq!(series.len(), 1);
        let timestamps: Vec<_> = series[0].samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![2 * MINUTE, 3 * MINUTE]);
    }

    #[test]
    fn test_literals_and_unary_minus() {
        let store = Store::default();
        assert_eq!(
            eval(&store, "-(2.5)", 42).unwrap(),
            QueryValue::Scalar(ScalarValue {
                timestamp: 42,
                value: -2.5
            })
        );
        assert_eq!(eval(&store, r#""hello""#, 42).unwrap().kind(), "string");

        let store = store_with_requests(&[MINUTE]);
        let QueryValue::Vector(samples) = eval(&store, "-http_requests_total", MINUTE).unwrap()
        else {
            panic!("expected a vector");
        };
        assert!(samples.iter().all(|s| s.value < 0.0));
        assert!(samples.iter().all(|s| s.labels.metric_name().is_none()));
    }

    #[test]
    fn test_unsupported_expressions() {
        let store = store_with_requests(&[MINUTE]);
        for query in ["sum(http_requests_total)", "http_requests_total + 1", "rate(http_requests_total[5m])"] {
            let err = eval(&store, query, MINUTE).unwrap_err();
            assert!(
                matches!(err, QueryError::UnsupportedExpression { .. }),
                "{query}: {err}"
            );
            assert!(err.is_execution_error());
        }
    }

    #[test]
    fn test_sample_limit() {
        let store = store_with_requests(&[MINUTE, 2 * MINUTE]);
        let engine = SelectorEngine::new(EngineConfig {
            max_samples: 3,
            ..EngineConfig::default()
        });
        let expr = parse_query("http_requests_total[5m]").unwrap();
        let err = engine
            .evaluate(&QueryContext::new(), &store, &expr, 2 * MINUTE)
            .unwrap_err();
        assert!(matches!(err, QueryError::TooManySamples { limit: 3 }));
    }

    #[test]
    fn test_cancelled_context() {
        let store = store_with_requests(&[MINUTE]);
        let ctx = QueryContext::new();
        ctx.cancel();
        let expr = parse_query("http_requests_total").unwrap();
        let err = SelectorEngine::default()
            .evaluate(&ctx, &store, &expr, MINUTE)
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
    }
}
