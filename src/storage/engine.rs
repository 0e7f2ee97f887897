//! In-memory time-series store
//!
//! - Write path: Appender (holds the write lock) → staged samples → commit
//! - Read path: Query → name posting index → matchers → range slice
//!
//! Thread-safe via Tokio's async RwLock. There is exactly one writer at a time
//! and every lock wait is bounded by `StoreConfig::writer_wait`.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Labels, MatchOp, Matcher, Point, Series, TimeRange, METRIC_NAME};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};

/// Configuration for the store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long writers and readers wait for the lock before `WriterBusy`
    pub writer_wait: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            writer_wait: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_writer_wait(mut self, wait: Duration) -> Self {
        self.writer_wait = wait;
        self
    }
}

/// Stable handle of a series inside one store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesRef(pub u64);

/// Internal state guarded by the store lock
#[derive(Default)]
struct StoreState {
    series: HashMap<SeriesRef, Series>,
    /// Label set to series handle
    index: HashMap<Labels, SeriesRef>,
    /// Metric name posting lists
    by_name: HashMap<String, BTreeSet<SeriesRef>>,
    next_ref: u64,
    sample_count: u64,
    closed: bool,
}

/// The in-memory time-series store
pub struct Store {
    config: StoreConfig,
    state: Arc<RwLock<StoreState>>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(StoreState::default())),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open the single write transaction
    ///
    /// Fails with `WriterBusy` when another appender (or a long read) holds the
    /// lock for longer than `writer_wait`.
    pub async fn begin_append(&self) -> StorageResult<Appender> {
        let guard = tokio::time::timeout(
            self.config.writer_wait,
            Arc::clone(&self.state).write_owned(),
        )
        .await
        .map_err(|_| StorageError::WriterBusy)?;

        if guard.closed {
            return Err(StorageError::Closed);
        }

        Ok(Appender::new(guard))
    }

    async fn read(&self) -> StorageResult<RwLockReadGuard<'_, StoreState>> {
        let guard = tokio::time::timeout(self.config.writer_wait, self.state.read())
            .await
            .map_err(|_| StorageError::WriterBusy)?;

        if guard.closed {
            return Err(StorageError::Closed);
        }
        Ok(guard)
    }

    /// Select series matching every matcher, restricted to `range`
    ///
    /// Series without points in range are omitted. Results are ordered by
    /// label set.
    pub async fn query(
        &self,
        matchers: &[Matcher],
        range: TimeRange,
    ) -> StorageResult<Vec<Series>> {
        let state = self.read().await?;

        let name = matchers
            .iter()
            .find(|m| m.name == METRIC_NAME && m.op == MatchOp::Equal)
            .map(|m| m.value.as_str());

        let candidates: Vec<SeriesRef> = match name {
            Some(name) => state
                .by_name
                .get(name)
                .map(|refs| refs.iter().copied().collect())
                .unwrap_or_default(),
            None => state.series.keys().copied().collect(),
        };

        let mut results = Vec::new();
        for series_ref in candidates {
            let Some(series) = state.series.get(&series_ref) else {
                continue;
            };
            if !matchers.iter().all(|m| m.matches(&series.labels)) {
                continue;
            }

            let points = series.slice(&range);
            if points.is_empty() {
                continue;
            }

            results.push(Series {
                labels: series.labels.clone(),
                points: points.to_vec(),
            });
        }

        results.sort_by(|a, b| a.labels.cmp(&b.labels));

        tracing::trace!(
            matchers = matchers.len(),
            series = results.len(),
            "Store query"
        );
        Ok(results)
    }

    /// Get store statistics
    pub async fn stats(&self) -> StorageResult<StoreStats> {
        let state = self.read().await?;

        let mut min_timestamp: Option<i64> = None;
        let mut max_timestamp: Option<i64> = None;
        for series in state.series.values() {
            if let (Some(first), Some(last)) = (series.points.first(), series.points.last()) {
                min_timestamp =
                    Some(min_timestamp.map_or(first.timestamp, |m| m.min(first.timestamp)));
                max_timestamp =
                    Some(max_timestamp.map_or(last.timestamp, |m| m.max(last.timestamp)));
            }
        }

        Ok(StoreStats {
            series_count: state.series.len(),
            sample_count: state.sample_count,
            min_timestamp,
            max_timestamp,
        })
    }

    /// Drop all data. Later operations fail with `Closed`.
    pub async fn close(&self) -> StorageResult<()> {
        let mut state = tokio::time::timeout(self.config.writer_wait, self.state.write())
            .await
            .map_err(|_| StorageError::WriterBusy)?;

        let series = state.series.len();
        *state = StoreState {
            closed: true,
            ..Default::default()
        };

        tracing::info!(series, "Store closed");
        Ok(())
    }
}

/// Write transaction over the store
///
/// Holds the store's write lock until committed, rolled back or dropped.
/// Dropping without `commit` discards everything staged.
pub struct Appender {
    state: OwnedRwLockWriteGuard<StoreState>,
    staged: Vec<(SeriesRef, Point)>,
    /// Series first seen in this transaction
    pending: HashMap<Labels, SeriesRef>,
    last_staged: HashMap<SeriesRef, Point>,
    first_error: Option<StorageError>,
}

impl Appender {
    fn new(state: OwnedRwLockWriteGuard<StoreState>) -> Self {
        Self {
            state,
            staged: Vec::new(),
            pending: HashMap::new(),
            last_staged: HashMap::new(),
            first_error: None,
        }
    }

    /// Stage one sample
    ///
    /// A sample identical to a point the series already holds (same timestamp,
    /// bit-identical value) is accepted as a no-op.
    pub fn add(&mut self, labels: Labels, timestamp: i64, value: f64) -> StorageResult<SeriesRef> {
        let result = self.stage(labels, timestamp, value);
        if let Err(ref err) = result {
            if self.first_error.is_none() {
                self.first_error = Some(err.clone());
            }
        }
        result
    }

    fn stage(&mut self, labels: Labels, timestamp: i64, value: f64) -> StorageResult<SeriesRef> {
        if labels.metric_name().is_none() {
            return Err(StorageError::MissingNameLabel);
        }

        let existing = self
            .state
            .index
            .get(&labels)
            .or_else(|| self.pending.get(&labels))
            .copied();

        let series_ref = match existing {
            Some(series_ref) => series_ref,
            None => {
                let series_ref = SeriesRef(self.state.next_ref + self.pending.len() as u64);
                self.pending.insert(labels.clone(), series_ref);
                self.push(series_ref, timestamp, value);
                return Ok(series_ref);
            }
        };

        // an exact timestamp match anywhere in the series is a duplicate, not out of order
        if let Some(existing) = self.value_at(series_ref, timestamp) {
            if same_value(existing, value) {
                return Ok(series_ref);
            }
            return Err(StorageError::Conflict {
                series: labels.to_string(),
                timestamp,
            });
        }

        let last = self.last_staged.get(&series_ref).copied().or_else(|| {
            self.state
                .series
                .get(&series_ref)
                .and_then(|s| s.last().copied())
        });

        if let Some(last) = last {
            if timestamp < last.timestamp {
                return Err(StorageError::OutOfOrder {
                    series: labels.to_string(),
                    timestamp,
                });
            }
            if timestamp == last.timestamp {
                if same_value(last.value, value) {
                    return Ok(series_ref);
                }
                return Err(StorageError::Conflict {
                    series: labels.to_string(),
                    timestamp,
                });
            }
        }

        self.push(series_ref, timestamp, value);
        Ok(series_ref)
    }

    /// Value already held for `series_ref` at exactly `timestamp`, committed or staged
    fn value_at(&self, series_ref: SeriesRef, timestamp: i64) -> Option<f64> {
        if let Some(series) = self.state.series.get(&series_ref) {
            let points = &series.points;
            let idx = points.partition_point(|p| p.timestamp < timestamp);
            if let Some(point) = points.get(idx).filter(|p| p.timestamp == timestamp) {
                return Some(point.value);
            }
        }

        self.staged
            .iter()
            .find(|(r, p)| *r == series_ref && p.timestamp == timestamp)
            .map(|(_, p)| p.value)
    }

    fn push(&mut self, series_ref: SeriesRef, timestamp: i64, value: f64) {
        let point = Point::new(timestamp, value);
        self.staged.push((series_ref, point));
        self.last_staged.insert(series_ref, point);
    }

    /// Number of samples staged so far
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Make every staged sample visible at once
    ///
    /// If any `add` failed, nothing is applied and the first error is returned.
    pub fn commit(self) -> StorageResult<CommitStats> {
        let Appender {
            mut state,
            staged,
            pending,
            first_error,
            ..
        } = self;

        if let Some(err) = first_error {
            tracing::debug!(staged = staged.len(), error = %err, "Commit refused");
            return Err(err);
        }

        let new_series = pending.len();
        for (labels, series_ref) in pending {
            if let Some(name) = labels.metric_name() {
                state
                    .by_name
                    .entry(name.to_string())
                    .or_default()
                    .insert(series_ref);
            }
            state.index.insert(labels.clone(), series_ref);
            state.series.insert(series_ref, Series::new(labels));
        }
        state.next_ref += new_series as u64;

        let samples = staged.len();
        for (series_ref, point) in staged {
            if let Some(series) = state.series.get_mut(&series_ref) {
                series.points.push(point);
            }
        }
        state.sample_count += samples as u64;

        tracing::debug!(samples, new_series, "Committed appender");
        Ok(CommitStats {
            samples,
            new_series,
        })
    }

    /// Discard all staged samples
    pub fn rollback(self) {
        tracing::debug!(staged = self.staged.len(), "Rolled back appender");
    }
}

fn same_value(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
}

/// Outcome of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitStats {
    pub samples: usize,
    pub new_series: usize,
}

/// Store statistics
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub series_count: usize,
    pub sample_count: u64,
    pub min_timestamp: Option<i64>,
    pub max_timestamp: Option<i64>,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Series: {}, Samples: {}", self.series_count, self.sample_count)?;
        if let (Some(min), Some(max)) = (self.min_timestamp, self.max_timestamp) {
            write!(f, ", Range: {}..={}", min, max)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(name: &str, vhost: &str) -> Labels {
        Labels::new().with(METRIC_NAME, name).with("vhost", vhost)
    }

    fn create_test_store() -> Store {
        Store::new(StoreConfig::new().with_writer_wait(Duration::from_millis(50)))
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let store = create_test_store();

        let mut app = store.begin_append().await.unwrap();
        app.add(labels("requests_total", "b"), 1000, 7.0).unwrap();
        app.add(labels("requests_total", "a"), 1000, 5.0).unwrap();
        app.add(labels("requests_total", "a"), 2000, 6.0).unwrap();
        app.add(labels("open_fds", "a"), 1000, 40.0).unwrap();
        let stats = app.commit().unwrap();
        assert_eq!(stats.samples, 4);
        assert_eq!(stats.new_series, 3);

        let series = store
            .query(&[Matcher::metric_name("requests_total")], TimeRange::new(0, 10_000))
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].labels.get("vhost"), Some("a"));
        assert_eq!(series[0].points.len(), 2);
        assert_eq!(series[1].labels.get("vhost"), Some("b"));

        // Half-open range excludes the end
        let series = store
            .query(&[Matcher::equal("vhost", "a")], TimeRange::new(1000, 2000))
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
        assert!(series.iter().all(|s| s.points.len() == 1));
    }

    #[tokio::test]
    async fn test_missing_name_label() {
        let store = create_test_store();

        let mut app = store.begin_append().await.unwrap();
        let err = app
            .add(Labels::new().with("vhost", "a"), 1000, 1.0)
            .unwrap_err();
        assert_eq!(err, StorageError::MissingNameLabel);
        assert_eq!(app.commit().unwrap_err(), StorageError::MissingNameLabel);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.series_count, 0);
        assert_eq!(stats.sample_count, 0);
    }

    #[tokio::test]
    async fn test_commit_is_atomic() {
        let store = create_test_store();

        let mut app = store.begin_append().await.unwrap();
        app.add(labels("x", "a"), 1000, 1.0).unwrap();
        app.commit().unwrap();

        let mut app = store.begin_append().await.unwrap();
        app.add(labels("y", "a"), 2000, 1.0).unwrap();
        let err = app.add(labels("x", "a"), 1000, 2.0).unwrap_err();
        assert!(matches!(err, StorageError::Conflict { timestamp: 1000, .. }));
        assert!(matches!(app.commit(), Err(StorageError::Conflict { .. })));

        let all = store
            .query(&[Matcher::equal("vhost", "a")], TimeRange::new(0, 10_000))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].labels.metric_name(), Some("x"));
        assert_eq!(all[0].points, vec![Point::new(1000, 1.0)]);
    }

    #[tokio::test]
    async fn test_duplicate_sample_is_noop() {
        let store = create_test_store();

        let mut app = store.begin_append().await.unwrap();
        app.add(labels("x", "a"), 1000, 1.0).unwrap();
        app.add(labels("x", "a"), 1000, 1.0).unwrap();
        app.add(labels("x", "a"), 2000, f64::NAN).unwrap();
        app.add(labels("x", "a"), 2000, f64::NAN).unwrap();
        assert_eq!(app.staged(), 2);
        app.commit().unwrap();

        let mut app = store.begin_append().await.unwrap();
        app.add(labels("x", "a"), 2000, f64::NAN).unwrap();
        assert_eq!(app.commit().unwrap().samples, 0);

        assert_eq!(store.stats().await.unwrap().sample_count, 2);
    }

    #[tokio::test]
    async fn test_out_of_order_rejected() {
        let store = create_test_store();

        let mut app = store.begin_append().await.unwrap();
        app.add(labels("x", "a"), 2000, 1.0).unwrap();
        let err = app.add(labels("x", "a"), 1000, 1.0).unwrap_err();
        assert!(matches!(err, StorageError::OutOfOrder { timestamp: 1000, .. }));
    }

    #[tokio::test]
    async fn test_conflict_with_older_point() {
        let store = create_test_store();

        let mut app = store.begin_append().await.unwrap();
        app.add(labels("x", "a"), 1000, 1.0).unwrap();
        app.add(labels("x", "a"), 2000, 2.0).unwrap();
        app.commit().unwrap();

        let mut app = store.begin_append().await.unwrap();
        let err = app.add(labels("x", "a"), 1000, 5.0).unwrap_err();
        assert!(matches!(err, StorageError::Conflict { timestamp: 1000, .. }));
        app.rollback();

        // same value at an older timestamp is still a no-op
        let mut app = store.begin_append().await.unwrap();
        app.add(labels("x", "a"), 1000, 1.0).unwrap();
        assert_eq!(app.staged(), 0);
        assert_eq!(app.commit().unwrap().samples, 0);

        // also within one batch
        let mut app = store.begin_append().await.unwrap();
        app.add(labels("x", "b"), 1000, 1.0).unwrap();
        app.add(labels("x", "b"), 2000, 2.0).unwrap();
        let err = app.add(labels("x", "b"), 1000, 3.0).unwrap_err();
        assert!(matches!(err, StorageError::Conflict { timestamp: 1000, .. }));
        app.rollback();

        assert_eq!(store.stats().await.unwrap().sample_count, 2);
    }

    #[tokio::test]
    async fn test_rollback_and_drop_discard() {
        let store = create_test_store();

        let mut app = store.begin_append().await.unwrap();
        app.add(labels("x", "a"), 1000, 1.0).unwrap();
        app.rollback();

        {
            let mut app = store.begin_append().await.unwrap();
            app.add(labels("x", "b"), 1000, 1.0).unwrap();
        }

        assert_eq!(store.stats().await.unwrap().series_count, 0);

        // Refs are reused once the pending series were discarded
        let mut app = store.begin_append().await.unwrap();
        let series_ref = app.add(labels("x", "c"), 1000, 1.0).unwrap();
        assert_eq!(series_ref, SeriesRef(0));
        app.commit().unwrap();
    }

    #[tokio::test]
    async fn test_writer_busy() {
        let store = create_test_store();

        let app = store.begin_append().await.unwrap();
        assert!(matches!(
            store.begin_append().await,
            Err(StorageError::WriterBusy)
        ));
        assert!(matches!(
            store.query(&[], TimeRange::new(0, 1)).await,
            Err(StorageError::WriterBusy)
        ));

        drop(app);
        assert!(store.begin_append().await.is_ok());
    }

    #[tokio::test]
    async fn test_regex_query_without_name_index() {
        let store = create_test_store();

        let mut app = store.begin_append().await.unwrap();
        app.add(labels("jvm_memory_bytes_used", "a").with("area", "heap"), 1000, 1.0)
            .unwrap();
        app.add(labels("jvm_memory_bytes_max", "a").with("area", "heap"), 1000, 2.0)
            .unwrap();
        app.add(labels("open_fds", "a"), 1000, 3.0).unwrap();
        app.commit().unwrap();

        let matcher = Matcher::new(MatchOp::Regex, METRIC_NAME, "jvm_.*").unwrap();
        let series = store
            .query(&[matcher], TimeRange::new(0, 10_000))
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].labels.metric_name(), Some("jvm_memory_bytes_max"));
    }

    #[tokio::test]
    async fn test_stats_and_close() {
        let store = create_test_store();

        let mut app = store.begin_append().await.unwrap();
        app.add(labels("x", "a"), 1000, 1.0).unwrap();
        app.add(labels("x", "b"), 3000, 1.0).unwrap();
        app.commit().unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.series_count, 2);
        assert_eq!(stats.min_timestamp, Some(1000));
        assert_eq!(stats.max_timestamp, Some(3000));
        assert_eq!(stats.to_string(), "Series: 2, Samples: 2, Range: 1000..=3000");

        store.close().await.unwrap();
        assert!(matches!(store.stats().await, Err(StorageError::Closed)));
        assert!(matches!(store.begin_append().await, Err(StorageError::Closed)));
    }
}
