//! Evaluation kernels: selector windows, `rate`, aggregation and binary matching
//!
//! These operate on already fetched series and carry no store access.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::query::ast::{AggregateOp, BinaryOp, Grouping};
use crate::query::error::{QueryError, QueryResult};
use crate::storage::{Labels, Point, Series};

/// Bit pattern Prometheus uses to mark a series as stale
pub const STALE_NAN_BITS: u64 = 0x7ff0_0000_0000_0002;

pub fn is_stale_marker(value: f64) -> bool {
    value.to_bits() == STALE_NAN_BITS
}

/// One element of an instant vector
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct VectorSample {
    pub labels: Labels,
    pub value: f64,
}

/// Points with `t - window < ts <= t`
pub fn window(points: &[Point], t: i64, window_ms: i64) -> &[Point] {
    let lo = points.partition_point(|p| p.timestamp <= t - window_ms);
    let hi = points.partition_point(|p| p.timestamp <= t);
    &points[lo..hi]
}

/// Latest point per series inside the lookback window
///
/// A series whose latest point is a stale marker is absent.
pub fn instant_vector(series: &[Series], t: i64, lookback_ms: i64) -> Vec<VectorSample> {
    series
        .iter()
        .filter_map(|s| {
            let last = window(&s.points, t, lookback_ms).last()?;
            if is_stale_marker(last.value) {
                return None;
            }
            Some(VectorSample {
                labels: s.labels.clone(),
                value: last.value,
            })
        })
        .collect()
}

/// Points per series inside the range window, stale markers removed
pub fn range_vector(series: &[Series], t: i64, range_ms: i64) -> Vec<Series> {
    series
        .iter()
        .filter_map(|s| {
            let points: Vec<Point> = window(&s.points, t, range_ms)
                .iter()
                .filter(|p| !is_stale_marker(p.value))
                .copied()
                .collect();
            if points.is_empty() {
                return None;
            }
            Some(Series {
                labels: s.labels.clone(),
                points,
            })
        })
        .collect()
}

/// Per-second increase over the points, compensating counter resets
///
/// Needs at least two points. No extrapolation to the window edges.
pub fn counter_rate(points: &[Point]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let first = points.first()?;
    let last = points.last()?;

    let mut increase = last.value - first.value;
    for pair in points.windows(2) {
        if pair[1].value < pair[0].value {
            increase += pair[0].value;
        }
    }

    let seconds = (last.timestamp - first.timestamp) as f64 / 1000.0;
    if seconds <= 0.0 {
        return None;
    }
    Some(increase / seconds)
}

/// `rate(m)` over already windowed series; drops the metric name
pub fn rate(matrix: &[Series]) -> Vec<VectorSample> {
    matrix
        .iter()
        .filter_map(|s| {
            counter_rate(&s.points).map(|value| VectorSample {
                labels: s.labels.without_metric_name(),
                value,
            })
        })
        .collect()
}

/// Group samples by label and reduce each group
pub fn aggregate(
    op: AggregateOp,
    grouping: Option<&Grouping>,
    samples: Vec<VectorSample>,
) -> Vec<VectorSample> {
    let mut groups: BTreeMap<Labels, Vec<f64>> = BTreeMap::new();

    for sample in samples {
        let key = match grouping {
            None => Labels::new(),
            Some(Grouping::By(names)) => sample.labels.keep_only(names),
            Some(Grouping::Without(names)) => sample.labels.drop_names(names),
        };
        groups.entry(key).or_default().push(sample.value);
    }

    groups
        .into_iter()
        .filter_map(|(labels, values)| {
            op.apply(&values).map(|value| VectorSample { labels, value })
        })
        .collect()
}

/// Which side of a vector/scalar operation the vector is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorSide {
    Left,
    Right,
}

/// Apply `op` between every sample and a scalar
pub fn vector_scalar(
    op: BinaryOp,
    return_bool: bool,
    samples: Vec<VectorSample>,
    scalar: f64,
    side: VectorSide,
) -> Vec<VectorSample> {
    samples
        .into_iter()
        .filter_map(|sample| {
            let (lhs, rhs) = match side {
                VectorSide::Left => (sample.value, scalar),
                VectorSide::Right => (scalar, sample.value),
            };
            combine(op, return_bool, lhs, rhs, sample.value, sample.labels)
        })
        .collect()
}

/// One-to-one matching on labels without the metric name
pub fn vector_vector(
    op: BinaryOp,
    return_bool: bool,
    lhs: Vec<VectorSample>,
    rhs: Vec<VectorSample>,
) -> QueryResult<Vec<VectorSample>> {
    let mut right: HashMap<Labels, f64> = HashMap::with_capacity(rhs.len());
    for sample in rhs {
        let signature = sample.labels.without_metric_name();
        if right.insert(signature.clone(), sample.value).is_some() {
            return Err(QueryError::evaluation(format!(
                "found duplicate series for the match group {} \
                 on the right hand-side of the operation",
                signature
            )));
        }
    }

    let mut matched: HashSet<Labels> = HashSet::new();
    let mut out = Vec::new();
    for sample in lhs {
        let signature = sample.labels.without_metric_name();
        let Some(&rhs_value) = right.get(&signature) else {
            continue;
        };
        if !matched.insert(signature.clone()) {
            return Err(QueryError::evaluation(format!(
                "found duplicate series for the match group {} \
                 on the left hand-side of the operation",
                signature
            )));
        }

        let combined = combine(
            op,
            return_bool,
            sample.value,
            rhs_value,
            sample.value,
            sample.labels,
        );
        if let Some(result) = combined {
            out.push(result);
        }
    }

    Ok(out)
}

/// Combine two operands; comparisons keep `kept` (the vector-side value)
fn combine(
    op: BinaryOp,
    return_bool: bool,
    lhs: f64,
    rhs: f64,
    kept: f64,
    labels: Labels,
) -> Option<VectorSample> {
    if op.is_comparison() {
        let passed = op.compare(lhs, rhs);
        if return_bool {
            return Some(VectorSample {
                labels: labels.without_metric_name(),
                value: if passed { 1.0 } else { 0.0 },
            });
        }
        return passed.then_some(VectorSample { labels, value: kept });
    }

    op.arithmetic(lhs, rhs).map(|value| VectorSample {
        labels: labels.without_metric_name(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::METRIC_NAME;

    fn points(values: &[(i64, f64)]) -> Vec<Point> {
        values.iter().map(|&(ts, v)| Point::new(ts, v)).collect()
    }

    fn sample(name: &str, vhost: &str, value: f64) -> VectorSample {
        VectorSample {
            labels: Labels::new().with(METRIC_NAME, name).with("vhost", vhost),
            value,
        }
    }

    #[test]
    fn test_rate_of_monotonic_counter() {
        let pts = points(&[(0, 10.0), (15_000, 25.0), (30_000, 40.0)]);
        assert_eq!(counter_rate(&pts), Some(30.0 / 30.0));
    }

    #[test]
    fn test_rate_compensates_counter_reset() {
        let pts = points(&[(0, 10.0), (10_000, 3.0)]);
        let rate = counter_rate(&pts).unwrap();
        assert!(rate >= 0.0);
        assert_eq!(rate, 3.0 / 10.0);
    }

    #[test]
    fn test_rate_needs_two_points() {
        assert_eq!(counter_rate(&points(&[(0, 1.0)])), None);
        assert_eq!(counter_rate(&[]), None);
    }

    #[test]
    fn test_window_is_left_open() {
        let pts = points(&[(1000, 1.0), (2000, 2.0), (3000, 3.0)]);
        let w = window(&pts, 3000, 2000);
        assert_eq!(w, &pts[1..]);
    }

    #[test]
    fn test_stale_latest_point_drops_series() {
        let series = vec![Series {
            labels: Labels::new().with(METRIC_NAME, "x"),
            points: points(&[(1000, 1.0), (2000, f64::from_bits(STALE_NAN_BITS))]),
        }];
        assert!(instant_vector(&series, 2000, 300_000).is_empty());
        assert_eq!(instant_vector(&series, 1500, 300_000).len(), 1);
    }

    #[test]
    fn test_sum_by_label() {
        let samples = vec![
            sample("r", "x", 1.0),
            sample("r", "x", 2.0),
            sample("r", "y", 5.0),
        ];
        let grouping = Grouping::By(vec!["vhost".to_string()]);
        let result = aggregate(AggregateOp::Sum, Some(&grouping), samples);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].labels, Labels::new().with("vhost", "x"));
        assert_eq!(result[0].value, 3.0);
        assert_eq!(result[1].labels, Labels::new().with("vhost", "y"));
        assert_eq!(result[1].value, 5.0);
    }

    #[test]
    fn test_aggregate_without_labels() {
        let samples = vec![sample("r", "x", 1.0), sample("r", "y", 2.0)];
        let grouping = Grouping::Without(vec!["vhost".to_string()]);
        let result = aggregate(AggregateOp::Count, Some(&grouping), samples);

        assert_eq!(result.len(), 1);
        assert!(result[0].labels.is_empty());
        assert_eq!(result[0].value, 2.0);
    }

    #[test]
    fn test_comparison_filters() {
        let samples = vec![sample("r", "x", 1.0), sample("r", "y", 5.0)];
        let result = vector_scalar(BinaryOp::Gt, false, samples, 2.0, VectorSide::Left);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].labels.metric_name(), Some("r"));
        assert_eq!(result[0].value, 5.0);
    }

    #[test]
    fn test_arithmetic_drops_name() {
        let samples = vec![sample("r", "x", 4.0)];
        let result = vector_scalar(BinaryOp::Div, false, samples, 2.0, VectorSide::Right);
        assert_eq!(result[0].value, 0.5);
        assert!(result[0].labels.metric_name().is_none());
    }

    #[test]
    fn test_match_vectors_one_to_one() {
        let lhs = vec![sample("used", "x", 50.0), sample("used", "y", 10.0)];
        let rhs = vec![sample("max", "x", 100.0), sample("max", "z", 100.0)];
        let result = vector_vector(BinaryOp::Div, false, lhs, rhs).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].labels, Labels::new().with("vhost", "x"));
        assert_eq!(result[0].value, 0.5);
    }

    #[test]
    fn test_duplicate_match_groups_rejected() {
        let lhs = vec![sample("used", "x", 1.0)];
        let rhs = vec![sample("a", "x", 1.0), sample("b", "x", 2.0)];
        assert!(matches!(
            vector_vector(BinaryOp::Add, false, lhs, rhs),
            Err(QueryError::Evaluation(_))
        ));

        let lhs = vec![sample("a", "x", 1.0), sample("b", "x", 2.0)];
        let rhs = vec![sample("used", "x", 1.0)];
        assert!(matches!(
            vector_vector(BinaryOp::Add, false, lhs, rhs),
            Err(QueryError::Evaluation(_))
        ));
    }
}
