//! Query Evaluator
//!
//! Evaluates parsed expressions against the Store:
//! 1. Static type check (functions, operators, argument types)
//! 2. One fetch per distinct selector over the widest window needed
//! 3. Per-timestamp evaluation of the tree
//! 4. Result shaping into vectors or matrices
//!
//! # Execution Pipeline
//!
//! ```text
//! Query → Parse → Check → Fetch → Evaluate (per step) → Result
//! ```

use crate::query::ast::{BinaryOp, Expr, ValueType, VectorSelector};
use crate::query::error::{QueryError, QueryResult};
use crate::query::functions::{self, VectorSample, VectorSide};
use crate::query::parser::parse_query;
use crate::storage::{Labels, Matcher, Point, Series, StorageError, Store, TimeRange};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for the query evaluator
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How far back a vector selector looks for the latest point (default: 5m)
    pub lookback: Duration,
    /// Maximum samples fetched or points produced per query (default: 50M)
    pub max_samples: usize,
    /// Per-query deadline (default: 10s)
    pub timeout: Duration,
    /// Step used by `range_query_window` (default: 15s)
    pub default_step: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(5 * 60),
            max_samples: 50_000_000,
            timeout: Duration::from_secs(10),
            default_step: Duration::from_secs(15),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_default_step(mut self, step: Duration) -> Self {
        self.default_step = step;
        self
    }
}

/// One value per series at a single timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstantVector {
    pub timestamp: i64,
    pub samples: Vec<VectorSample>,
}

/// Time-ordered points per series
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RangeMatrix {
    pub series: Vec<Series>,
}

impl RangeMatrix {
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Result of an instant query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryValue {
    Vector(InstantVector),
    Matrix(RangeMatrix),
}

impl QueryValue {
    pub fn as_vector(&self) -> Option<&InstantVector> {
        match self {
            QueryValue::Vector(v) => Some(v),
            QueryValue::Matrix(_) => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&RangeMatrix> {
        match self {
            QueryValue::Matrix(m) => Some(m),
            QueryValue::Vector(_) => None,
        }
    }

    /// Number of series in the result
    pub fn len(&self) -> usize {
        match self {
            QueryValue::Vector(v) => v.samples.len(),
            QueryValue::Matrix(m) => m.series.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Intermediate value during evaluation
enum Value {
    Scalar(f64),
    Vector(Vec<VectorSample>),
    Matrix(Vec<Series>),
}

/// Query evaluator
pub struct Evaluator {
    /// Reference to the store
    store: Arc<Store>,
    config: EngineConfig,
}

impl Evaluator {
    /// Create a new evaluator
    pub fn new(store: Arc<Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate `query` at one timestamp (ms)
    ///
    /// A scalar result is returned as a one-element vector with no labels.
    pub async fn instant_query(&self, query: &str, at: i64) -> QueryResult<QueryValue> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;

        let expr = parse_query(query)?;
        check_types(&expr)?;

        let fetched = self.fetch(&expr, at, at, deadline).await?;
        check_deadline(deadline)?;

        let ctx = EvalContext {
            fetched: &fetched,
            lookback_ms: self.config.lookback.as_millis() as i64,
        };

        let result = match ctx.eval(&expr, at)? {
            Value::Scalar(value) => QueryValue::Vector(InstantVector {
                timestamp: at,
                samples: vec![VectorSample {
                    labels: Labels::new(),
                    value,
                }],
            }),
            Value::Vector(mut samples) => {
                sort_unique(&mut samples)?;
                QueryValue::Vector(InstantVector {
                    timestamp: at,
                    samples,
                })
            }
            Value::Matrix(mut series) => {
                series.sort_by(|a, b| a.labels.cmp(&b.labels));
                QueryValue::Matrix(RangeMatrix { series })
            }
        };

        tracing::debug!(
            query,
            at,
            series = result.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Instant query evaluated"
        );
        Ok(result)
    }

    /// Evaluate `query` at `start, start + step, ...` up to and including `end`
    pub async fn range_query(
        &self,
        query: &str,
        start: i64,
        end: i64,
        step: Duration,
    ) -> QueryResult<RangeMatrix> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;

        let step_ms = step.as_millis() as i64;
        if step_ms <= 0 {
            return Err(QueryError::evaluation(
                "zero or negative query resolution step widths are not accepted",
            ));
        }
        if end < start {
            return Err(QueryError::evaluation(
                "end timestamp must not be before start time",
            ));
        }

        let expr = parse_query(query)?;
        let value_type = check_types(&expr)?;
        if value_type == ValueType::Matrix {
            return Err(QueryError::evaluation(format!(
                "invalid expression type \"{}\" for range query, must be scalar or instant vector",
                value_type
            )));
        }

        let fetched = self.fetch(&expr, start, end, deadline).await?;
        let ctx = EvalContext {
            fetched: &fetched,
            lookback_ms: self.config.lookback.as_millis() as i64,
        };

        let mut series: BTreeMap<Labels, Vec<Point>> = BTreeMap::new();
        let mut produced = 0usize;
        let mut t = start;

        while t <= end {
            check_deadline(deadline)?;

            match ctx.eval(&expr, t)? {
                Value::Scalar(value) => {
                    series.entry(Labels::new()).or_default().push(Point::new(t, value));
                    produced += 1;
                }
                Value::Vector(mut samples) => {
                    sort_unique(&mut samples)?;
                    produced += samples.len();
                    for sample in samples {
                        series
                            .entry(sample.labels)
                            .or_default()
                            .push(Point::new(t, sample.value));
                    }
                }
                Value::Matrix(_) => {
                    return Err(QueryError::evaluation(
                        "range vector cannot be evaluated at each step",
                    ));
                }
            }

            if produced > self.config.max_samples {
                return Err(QueryError::ResourceExceeded {
                    limit: self.config.max_samples,
                });
            }
            t += step_ms;
        }

        tracing::debug!(
            query,
            start,
            end,
            step_ms,
            series = series.len(),
            points = produced,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Range query evaluated"
        );

        Ok(RangeMatrix {
            series: series
                .into_iter()
                .map(|(labels, points)| Series { labels, points })
                .collect(),
        })
    }

    /// Instant query at the current wall-clock time
    pub async fn instant_query_now(&self, query: &str) -> QueryResult<QueryValue> {
        self.instant_query(query, Utc::now().timestamp_millis()).await
    }

    /// Range query over the trailing `window`, using the default step
    pub async fn range_query_window(
        &self,
        query: &str,
        window: Duration,
    ) -> QueryResult<RangeMatrix> {
        let end = Utc::now().timestamp_millis();
        let start = end - window.as_millis() as i64;
        self.range_query(query, start, end, self.config.default_step)
            .await
    }

    /// Fetch every distinct selector once over the widest window it needs
    async fn fetch(
        &self,
        expr: &Expr,
        start: i64,
        end: i64,
        deadline: Instant,
    ) -> QueryResult<HashMap<String, Vec<Series>>> {
        let lookback_ms = self.config.lookback.as_millis() as i64;

        let mut wanted: HashMap<String, (Vec<Matcher>, i64)> = HashMap::new();
        expr.for_each_selector(&mut |selector, window| {
            let window = window.unwrap_or(lookback_ms);
            let entry = wanted
                .entry(selector.to_string())
                .or_insert_with(|| (selector.matchers.clone(), window));
            entry.1 = entry.1.max(window);
        });

        let mut fetched = HashMap::with_capacity(wanted.len());
        let mut total = 0usize;

        for (key, (matchers, window)) in wanted {
            let range = TimeRange::try_new(start - window + 1, end + 1)
                .ok_or(StorageError::InvalidTimeRange)?;

            let series = tokio::time::timeout_at(deadline, self.store.query(&matchers, range))
                .await
                .map_err(|_| QueryError::Timeout)??;

            total += series.iter().map(|s| s.points.len()).sum::<usize>();
            if total > self.config.max_samples {
                tracing::warn!(
                    selector = %key,
                    samples = total,
                    limit = self.config.max_samples,
                    "Query sample budget exceeded"
                );
                return Err(QueryError::ResourceExceeded {
                    limit: self.config.max_samples,
                });
            }

            fetched.insert(key, series);
        }

        Ok(fetched)
    }
}

/// Sort a result vector by labels, rejecting two samples with the same label set
fn sort_unique(samples: &mut [VectorSample]) -> QueryResult<()> {
    samples.sort_by(|a, b| a.labels.cmp(&b.labels));
    if samples.windows(2).any(|pair| pair[0].labels == pair[1].labels) {
        return Err(QueryError::evaluation(
            "vector cannot contain metrics with the same labelset",
        ));
    }
    Ok(())
}

fn check_deadline(deadline: Instant) -> QueryResult<()> {
    if Instant::now() >= deadline {
        return Err(QueryError::Timeout);
    }
    Ok(())
}

fn is_supported_operator(op: BinaryOp) -> bool {
    !matches!(
        op,
        BinaryOp::Pow | BinaryOp::And | BinaryOp::Or | BinaryOp::Unless
    )
}

/// Validate functions, operators and argument types before any fetch
fn check_types(expr: &Expr) -> QueryResult<ValueType> {
    match expr {
        Expr::Number(_) => Ok(ValueType::Scalar),
        Expr::Selector(_) => Ok(ValueType::Vector),
        Expr::Matrix(_) => Ok(ValueType::Matrix),
        Expr::Call { func, args } => match func.as_str() {
            "rate" => {
                if args.len() != 1 {
                    return Err(QueryError::evaluation(format!(
                        "expected 1 argument in call to \"rate\", got {}",
                        args.len()
                    )));
                }
                let arg_type = check_types(&args[0])?;
                if arg_type != ValueType::Matrix {
                    return Err(QueryError::evaluation(format!(
                        "expected type range vector in call to function \"rate\", got {}",
                        arg_type
                    )));
                }
                Ok(ValueType::Vector)
            }
            other => Err(QueryError::evaluation(format!(
                "unsupported function: {}",
                other
            ))),
        },
        Expr::Aggregate { op, expr, .. } => {
            let inner = check_types(expr)?;
            if inner != ValueType::Vector {
                return Err(QueryError::evaluation(format!(
                    "expected type instant vector in {} aggregation, got {}",
                    op, inner
                )));
            }
            Ok(ValueType::Vector)
        }
        Expr::Binary {
            op,
            lhs,
            rhs,
            return_bool,
        } => {
            if !is_supported_operator(*op) {
                return Err(QueryError::evaluation(format!(
                    "unsupported operator: {}",
                    op
                )));
            }

            let lhs = check_types(lhs)?;
            let rhs = check_types(rhs)?;
            if lhs == ValueType::Matrix || rhs == ValueType::Matrix {
                return Err(QueryError::evaluation(
                    "binary expression must contain only scalar and instant vector types",
                ));
            }

            if lhs == ValueType::Scalar && rhs == ValueType::Scalar {
                if op.is_comparison() && !return_bool {
                    return Err(QueryError::evaluation(
                        "comparisons between scalars must use the bool modifier",
                    ));
                }
                Ok(ValueType::Scalar)
            } else {
                Ok(ValueType::Vector)
            }
        }
    }
}

/// Fetched data plus per-query settings
struct EvalContext<'a> {
    fetched: &'a HashMap<String, Vec<Series>>,
    lookback_ms: i64,
}

impl EvalContext<'_> {
    fn series(&self, selector: &VectorSelector) -> &[Series] {
        self.fetched
            .get(&selector.to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn eval(&self, expr: &Expr, t: i64) -> QueryResult<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Scalar(*n)),
            Expr::Selector(selector) => Ok(Value::Vector(functions::instant_vector(
                self.series(selector),
                t,
                self.lookback_ms,
            ))),
            Expr::Matrix(ms) => Ok(Value::Matrix(functions::range_vector(
                self.series(&ms.selector),
                t,
                ms.range_ms,
            ))),
            Expr::Call { func, args } => match (func.as_str(), args.as_slice()) {
                ("rate", [arg]) => match self.eval(arg, t)? {
                    Value::Matrix(matrix) => Ok(Value::Vector(functions::rate(&matrix))),
                    _ => Err(QueryError::evaluation("rate expects a range vector")),
                },
                (other, _) => Err(QueryError::evaluation(format!(
                    "unsupported function: {}",
                    other
                ))),
            },
            Expr::Aggregate { op, grouping, expr } => match self.eval(expr, t)? {
                Value::Vector(samples) => Ok(Value::Vector(functions::aggregate(
                    *op,
                    grouping.as_ref(),
                    samples,
                ))),
                _ => Err(QueryError::evaluation(
                    "aggregation expects an instant vector",
                )),
            },
            Expr::Binary {
                op,
                lhs,
                rhs,
                return_bool,
            } => self.eval_binary(*op, *return_bool, lhs, rhs, t),
        }
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        return_bool: bool,
        lhs: &Expr,
        rhs: &Expr,
        t: i64,
    ) -> QueryResult<Value> {
        if !is_supported_operator(op) {
            return Err(QueryError::evaluation(format!(
                "unsupported operator: {}",
                op
            )));
        }

        match (self.eval(lhs, t)?, self.eval(rhs, t)?) {
            (Value::Scalar(a), Value::Scalar(b)) => {
                if op.is_comparison() {
                    if !return_bool {
                        return Err(QueryError::evaluation(
                            "comparisons between scalars must use the bool modifier",
                        ));
                    }
                    return Ok(Value::Scalar(if op.compare(a, b) { 1.0 } else { 0.0 }));
                }
                op.arithmetic(a, b)
                    .map(Value::Scalar)
                    .ok_or_else(|| QueryError::evaluation(format!("unsupported operator: {}", op)))
            }
            (Value::Vector(samples), Value::Scalar(b)) => Ok(Value::Vector(
                functions::vector_scalar(op, return_bool, samples, b, VectorSide::Left),
            )),
            (Value::Scalar(a), Value::Vector(samples)) => Ok(Value::Vector(
                functions::vector_scalar(op, return_bool, samples, a, VectorSide::Right),
            )),
            (Value::Vector(l), Value::Vector(r)) => Ok(Value::Vector(functions::vector_vector(
                op,
                return_bool,
                l,
                r,
            )?)),
            _ => Err(QueryError::evaluation(
                "binary expression must contain only scalar and instant vector types",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposition;
    use crate::storage::{StoreConfig, METRIC_NAME};

    const T0: i64 = 1_700_000_000_000;

    async fn create_test_evaluator(samples: &[(Labels, i64, f64)]) -> (Evaluator, Arc<Store>) {
        create_evaluator_with(samples, EngineConfig::default()).await
    }

    async fn create_evaluator_with(
        samples: &[(Labels, i64, f64)],
        config: EngineConfig,
    ) -> (Evaluator, Arc<Store>) {
        let store = Arc::new(Store::new(
            StoreConfig::new().with_writer_wait(Duration::from_millis(20)),
        ));

        let mut app = store.begin_append().await.unwrap();
        for (labels, ts, value) in samples {
            app.add(labels.clone(), *ts, *value).unwrap();
        }
        app.commit().unwrap();

        (Evaluator::new(Arc::clone(&store), config), store)
    }

    fn counter(vhost: &str) -> Labels {
        Labels::new()
            .with(METRIC_NAME, "requests_total")
            .with("vhost", vhost)
    }

    fn vector(value: QueryValue) -> Vec<(Labels, f64)> {
        let QueryValue::Vector(v) = value else {
            panic!("expected vector result");
        };
        v.samples.into_iter().map(|s| (s.labels, s.value)).collect()
    }

    #[tokio::test]
    async fn test_end_to_end_sum_by() {
        let store = Arc::new(Store::new(StoreConfig::default()));
        let payload = b"requests_total{vhost=\"a\"} 5\nrequests_total{vhost=\"b\"} 7\n";
        let scrape = exposition::parse(payload, "text/plain", T0).unwrap();

        let mut app = store.begin_append().await.unwrap();
        for sample in scrape.samples {
            app.add(sample.labels, sample.timestamp, sample.value).unwrap();
        }
        app.commit().unwrap();

        let evaluator = Evaluator::new(Arc::clone(&store), EngineConfig::default());
        let result = evaluator
            .instant_query("sum(requests_total) by (vhost)", T0)
            .await
            .unwrap();

        assert_eq!(
            vector(result),
            vec![
                (Labels::new().with("vhost", "a"), 5.0),
                (Labels::new().with("vhost", "b"), 7.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_rate_of_monotonic_counter() {
        let (evaluator, _store) = create_test_evaluator(&[
            (counter("a"), T0, 10.0),
            (counter("a"), T0 + 15_000, 25.0),
            (counter("a"), T0 + 30_000, 40.0),
        ])
        .await;

        let result = evaluator
            .instant_query("rate(requests_total[1m])", T0 + 30_000)
            .await
            .unwrap();
        let samples = vector(result);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].0, Labels::new().with("vhost", "a"));
        assert_eq!(samples[0].1, 30.0 / 30.0);
    }

    #[tokio::test]
    async fn test_rate_with_counter_reset() {
        let (evaluator, _store) = create_test_evaluator(&[
            (counter("a"), T0, 10.0),
            (counter("a"), T0 + 10_000, 3.0),
        ])
        .await;

        let samples = vector(
            evaluator
                .instant_query("rate(requests_total[1m])", T0 + 10_000)
                .await
                .unwrap(),
        );
        assert!(samples[0].1 >= 0.0);
        assert_eq!(samples[0].1, 0.3);
    }

    #[tokio::test]
    async fn test_vector_selector_lookback() {
        let (evaluator, _store) = create_test_evaluator(&[
            (counter("a"), T0, 1.0),
            (counter("b"), T0 + 280_000, 2.0),
        ])
        .await;

        let samples = vector(
            evaluator
                .instant_query("requests_total", T0 + 300_000)
                .await
                .unwrap(),
        );
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].0.get("vhost"), Some("b"));
        assert_eq!(samples[0].0.metric_name(), Some("requests_total"));
    }

    #[tokio::test]
    async fn test_scalar_result_is_single_element_vector() {
        let (evaluator, _store) = create_test_evaluator(&[]).await;

        let samples = vector(evaluator.instant_query("1 + 2 * 3", T0).await.unwrap());
        assert_eq!(samples, vec![(Labels::new(), 7.0)]);
    }

    #[tokio::test]
    async fn test_top_level_matrix() {
        let (evaluator, _store) = create_test_evaluator(&[
            (counter("a"), T0, 1.0),
            (counter("a"), T0 + 10_000, 2.0),
        ])
        .await;

        let result = evaluator
            .instant_query("requests_total[1m]", T0 + 10_000)
            .await
            .unwrap();
        let matrix = result.as_matrix().unwrap();
        assert_eq!(matrix.series.len(), 1);
        assert_eq!(matrix.series[0].points.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_usage_ratio() {
        let used = |area: &str| {
            Labels::new()
                .with(METRIC_NAME, "jvm_memory_bytes_used")
                .with("area", area)
        };
        let max = |area: &str| {
            Labels::new()
                .with(METRIC_NAME, "jvm_memory_bytes_max")
                .with("area", area)
        };
        let (evaluator, _store) = create_test_evaluator(&[
            (used("heap"), T0, 50.0),
            (max("heap"), T0, 200.0),
            (used("nonheap"), T0, 10.0),
            (max("nonheap"), T0, -1.0),
        ])
        .await;

        let samples = vector(
            evaluator
                .instant_query(
                    "jvm_memory_bytes_used / jvm_memory_bytes_max >= 0",
                    T0,
                )
                .await
                .unwrap(),
        );
        assert_eq!(samples, vec![(Labels::new().with("area", "heap"), 0.25)]);
    }

    #[tokio::test]
    async fn test_range_query_constant_value() {
        let mut samples = Vec::new();
        for tick in 0..3 {
            samples.push((counter("a"), T0 + tick * 10_000, 4.0));
            samples.push((counter("b"), T0 + tick * 10_000, 4.0));
        }
        let (evaluator, _store) = create_test_evaluator(&samples).await;

        let matrix = evaluator
            .range_query(
                "requests_total",
                T0,
                T0 + 20_000,
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert_eq!(matrix.series.len(), 2);
        for series in &matrix.series {
            assert_eq!(series.points.len(), 3);
            assert!(series.points.iter().all(|p| p.value == 4.0));
            assert_eq!(series.points[0].timestamp, T0);
            assert_eq!(series.points[2].timestamp, T0 + 20_000);
        }
    }

    #[tokio::test]
    async fn test_evaluation_errors() {
        let (evaluator, _store) = create_test_evaluator(&[(counter("a"), T0, 1.0)]).await;

        for query in [
            "irate(requests_total[1m])",
            "rate(requests_total)",
            "requests_total ^ 2",
            "requests_total and requests_total",
            "1 > 2",
            "sum(requests_total[1m])",
            "requests_total[1m] + 1",
        ] {
            let err = evaluator.instant_query(query, T0).await.unwrap_err();
            assert!(matches!(err, QueryError::Evaluation(_)), "{}: {:?}", query, err);
        }

        let err = evaluator
            .range_query("requests_total[1m]", T0, T0 + 1000, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Evaluation(_)));

        let err = evaluator.instant_query("sum(", T0).await.unwrap_err();
        assert!(matches!(err, QueryError::Parse(_)));

        let ok = evaluator.instant_query("1 > bool 2", T0).await.unwrap();
        assert_eq!(vector(ok), vec![(Labels::new(), 0.0)]);
    }

    #[tokio::test]
    async fn test_duplicate_labelsets_rejected() {
        let a = Labels::new().with(METRIC_NAME, "a_total").with("vhost", "x");
        let b = Labels::new().with(METRIC_NAME, "b_total").with("vhost", "x");
        let mut samples = Vec::new();
        for i in 0..3 {
            samples.push((a.clone(), T0 + i * 10_000, i as f64));
            samples.push((b.clone(), T0 + i * 10_000, i as f64 * 10.0));
        }
        let (evaluator, _store) = create_test_evaluator(&samples).await;

        // name dropped by arithmetic leaves two {vhost="x"} samples
        let query = r#"{__name__=~"a_total|b_total"} * 1"#;
        let err = evaluator
            .range_query(query, T0, T0 + 20_000, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Evaluation(_)), "{:?}", err);

        let err = evaluator.instant_query(query, T0).await.unwrap_err();
        assert!(matches!(err, QueryError::Evaluation(_)), "{:?}", err);

        // distinct names keep the selector itself valid
        let selector = r#"{__name__=~"a_total|b_total"}"#;
        let ok = evaluator
            .range_query(selector, T0, T0 + 20_000, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(ok.series.len(), 2);
        assert!(ok.series.iter().all(|s| s.points.len() == 3));
    }

    #[tokio::test]
    async fn test_resource_exceeded() {
        let (evaluator, _store) = create_evaluator_with(
            &[
                (counter("a"), T0, 1.0),
                (counter("b"), T0, 1.0),
            ],
            EngineConfig::new().with_max_samples(1),
        )
        .await;

        let err = evaluator
            .instant_query("requests_total", T0)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::ResourceExceeded { limit: 1 }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let (evaluator, _store) = create_evaluator_with(
            &[(counter("a"), T0, 1.0)],
            EngineConfig::new().with_timeout(Duration::ZERO),
        )
        .await;

        let err = evaluator
            .instant_query("requests_total", T0)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout));
    }

    #[tokio::test]
    async fn test_writer_busy_surfaces_as_storage_error() {
        let (evaluator, store) = create_test_evaluator(&[(counter("a"), T0, 1.0)]).await;

        let _appender = store.begin_append().await.unwrap();
        let err = evaluator
            .instant_query("requests_total", T0)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Storage(StorageError::WriterBusy)));
    }

    #[tokio::test]
    async fn test_query_value_serializes_tagged() {
        let (evaluator, _store) = create_test_evaluator(&[(counter("a"), T0, 1.0)]).await;
        let result = evaluator.instant_query("requests_total", T0).await.unwrap();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["resultType"], "vector");
        assert_eq!(json["result"]["samples"][0]["labels"]["vhost"], "a");
    }
}
