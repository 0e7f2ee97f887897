//! Scrape Scheduler
//!
//! Drives periodic scrape, ingest and query cycles against one target.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::exposition;
use crate::query::{Evaluator, QueryValue};
use crate::scrape::error::{FetchError, SchedulerError, SchedulerResult};
use crate::scrape::fetcher::Fetcher;
use crate::storage::{Sample, Store};

/// Configuration for the scrape loop
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Upper bound on a single fetch
    pub fetch_timeout: Duration,
    /// Instant query evaluated after every ingest
    pub query: Option<String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(5),
            query: None,
        }
    }
}

impl ScrapeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Where the scheduler is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Scraping,
    Ingesting,
    Querying,
    Stopped,
}

/// Outcome of one successful tick
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    /// Ingestion time assigned to samples without their own timestamp
    pub timestamp: i64,
    /// Samples newly committed (identical duplicates excluded)
    pub samples_ingested: usize,
    /// Result of the configured query, if any
    pub result: Option<QueryValue>,
}

/// Periodically scrapes a target into the store and evaluates a query
pub struct ScrapeScheduler {
    config: ScrapeConfig,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<Store>,
    evaluator: Arc<Evaluator>,
    state: Arc<RwLock<SchedulerState>>,
    stop_tx: watch::Sender<bool>,
    reports: Option<mpsc::UnboundedSender<TickReport>>,
}

impl ScrapeScheduler {
    /// Create a new scheduler
    pub fn new(
        config: ScrapeConfig,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<Store>,
        evaluator: Arc<Evaluator>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            fetcher,
            store,
            evaluator,
            state: Arc::new(RwLock::new(SchedulerState::Idle)),
            stop_tx,
            reports: None,
        }
    }

    /// Send every tick report to `tx`
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<TickReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Current state
    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: SchedulerState) {
        *self.state.write().await = state;
    }

    /// Run one cycle stamped with the current wall-clock time
    pub async fn tick(&self) -> SchedulerResult<TickReport> {
        self.tick_at(Utc::now().timestamp_millis()).await
    }

    /// Run one cycle: fetch, parse, ingest, then evaluate the query at `timestamp`
    ///
    /// Any failure leaves the scheduler stopped.
    pub async fn tick_at(&self, timestamp: i64) -> SchedulerResult<TickReport> {
        if self.state().await == SchedulerState::Stopped {
            return Err(SchedulerError::Stopped);
        }

        match self.run_cycle(timestamp).await {
            Ok(report) => {
                self.set_state(SchedulerState::Idle).await;
                if let Some(tx) = &self.reports {
                    if tx.send(report.clone()).is_err() {
                        tracing::debug!("Tick report receiver dropped");
                    }
                }
                Ok(report)
            }
            Err(e) => {
                tracing::error!(
                    endpoint = %self.fetcher.target(),
                    error = %e,
                    "Scrape cycle failed"
                );
                self.set_state(SchedulerState::Stopped).await;
                Err(e)
            }
        }
    }

    async fn run_cycle(&self, timestamp: i64) -> SchedulerResult<TickReport> {
        self.set_state(SchedulerState::Scraping).await;
        let payload = tokio::time::timeout(self.config.fetch_timeout, self.fetcher.fetch())
            .await
            .map_err(|_| FetchError::Timeout(self.config.fetch_timeout))??;

        self.set_state(SchedulerState::Ingesting).await;
        let scrape = exposition::parse(&payload.body, &payload.content_type, timestamp)?;
        let samples_ingested = self.ingest(scrape.samples).await?;

        tracing::info!(
            endpoint = %self.fetcher.target(),
            timestamp,
            samples = samples_ingested,
            "Scrape ingested"
        );

        let result = match &self.config.query {
            Some(query) => {
                self.set_state(SchedulerState::Querying).await;
                let value = self.evaluator.instant_query(query, timestamp).await?;
                log_result(query, &value);
                Some(value)
            }
            None => None,
        };

        Ok(TickReport {
            timestamp,
            samples_ingested,
            result,
        })
    }

    /// Append one scrape as a single batch
    async fn ingest(&self, samples: Vec<Sample>) -> SchedulerResult<usize> {
        let mut appender = self.store.begin_append().await?;
        for sample in samples {
            if let Err(e) = appender.add(sample.labels, sample.timestamp, sample.value) {
                appender.rollback();
                return Err(e.into());
            }
        }
        let stats = appender.commit()?;
        Ok(stats.samples)
    }

    /// Start the scrape loop
    ///
    /// The first tick runs immediately. The task ends with `Ok` after
    /// [`stop`](Self::stop) and with the error of the first failed tick otherwise.
    pub fn start(self: Arc<Self>) -> JoinHandle<SchedulerResult<()>> {
        let scheduler = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                endpoint = %scheduler.fetcher.target(),
                interval_ms = scheduler.config.interval.as_millis() as u64,
                "Scrape scheduler started"
            );

            loop {
                if *stop_rx.borrow() {
                    break;
                }

                tokio::select! {
                    _ = interval.tick() => {
                        scheduler.tick().await?;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            scheduler.set_state(SchedulerState::Stopped).await;
            tracing::info!("Scrape scheduler stopped");
            Ok(())
        })
    }

    /// Ask the loop to stop; an in-flight tick completes first
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

fn log_result(query: &str, value: &QueryValue) {
    match value {
        QueryValue::Vector(vector) => {
            if vector.samples.is_empty() {
                tracing::info!(query, "Query returned no series");
            }
            for sample in &vector.samples {
                tracing::info!(
                    query,
                    labels = %sample.labels,
                    value = sample.value,
                    "Query result"
                );
            }
        }
        QueryValue::Matrix(matrix) => {
            for series in &matrix.series {
                tracing::info!(
                    query,
                    labels = %series.labels,
                    points = series.points.len(),
                    "Query result"
                );
            }
        }
    }
}
