//! Fire-and-forget request workers

use futures_util::future::join_all;
use rand::seq::SliceRandom;
use reqwest::header::HOST;
use reqwest::{Client, Url};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::loadgen::error::{LoadError, LoadResult};

/// Host header of the liveness probe
pub const PING_HOST: &str = "__ping__";
/// Host header of the info probe
pub const INFO_HOST: &str = "__info__";

/// Load shape
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Target URL
    pub endpoint: String,
    /// Number of virtual hosts to spread requests over
    pub vhosts: usize,
    /// Virtual hosts are named `{prefix}-{i}`
    pub vhost_prefix: String,
    /// Concurrent request workers
    pub parallel: usize,
    /// Delay between two requests of one worker
    pub request_interval: Duration,
    /// Delay between two probe requests
    pub probe_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            vhosts: 5,
            vhost_prefix: "galeb-test".to_string(),
            parallel: 5,
            request_interval: Duration::from_secs(1),
            probe_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl LoadConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_vhosts(mut self, vhosts: usize) -> Self {
        self.vhosts = vhosts;
        self
    }

    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// `{prefix}-0 .. {prefix}-{n-1}`
pub fn virtual_hosts(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{}-{}", prefix, i)).collect()
}

#[derive(Debug, Default)]
struct LoadCounters {
    sent: AtomicU64,
    succeeded: AtomicU64,
    error_status: AtomicU64,
    failed: AtomicU64,
}

impl LoadCounters {
    fn summary(&self) -> LoadSummary {
        LoadSummary {
            sent: self.sent.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            error_status: self.error_status.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Request counters at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub sent: u64,
    /// 2xx/3xx responses
    pub succeeded: u64,
    /// 4xx/5xx responses
    pub error_status: u64,
    /// Transport failures and timeouts
    pub failed: u64,
}

impl std::fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sent: {}, OK: {}, Error status: {}, Failed: {}",
            self.sent, self.succeeded, self.error_status, self.failed
        )
    }
}

/// Which Host header a worker sends
#[derive(Debug, Clone)]
enum HostChoice {
    Random(Arc<Vec<String>>),
    Fixed(&'static str),
}

impl HostChoice {
    fn pick(&self) -> Option<String> {
        match self {
            HostChoice::Random(hosts) => hosts.choose(&mut rand::thread_rng()).cloned(),
            HostChoice::Fixed(host) => Some(host.to_string()),
        }
    }
}

/// Drives traffic at the target endpoint
pub struct LoadGenerator {
    config: LoadConfig,
    client: Client,
    hosts: Arc<Vec<String>>,
}

impl LoadGenerator {
    pub fn new(config: LoadConfig, client: Client) -> LoadResult<Self> {
        Url::parse(&config.endpoint)
            .map_err(|e| {
                LoadError::InvalidConfig(format!("endpoint {:?}: {}", config.endpoint, e))
            })?;
        if config.vhosts == 0 {
            return Err(LoadError::InvalidConfig("vhosts must be at least 1".to_string()));
        }
        if config.request_interval.is_zero() || config.probe_interval.is_zero() {
            return Err(LoadError::InvalidConfig("intervals must be positive".to_string()));
        }

        let hosts = Arc::new(virtual_hosts(&config.vhost_prefix, config.vhosts));
        Ok(Self {
            config,
            client,
            hosts,
        })
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Spawn the request workers and the two probes
    pub fn start(&self) -> RunningLoad {
        let (stop_tx, _) = watch::channel(false);
        let counters = Arc::new(LoadCounters::default());
        let mut workers = Vec::with_capacity(self.config.parallel + 2);

        for id in 0..self.config.parallel {
            workers.push(self.spawn_worker(
                format!("worker-{}", id),
                HostChoice::Random(Arc::clone(&self.hosts)),
                self.config.request_interval,
                stop_tx.subscribe(),
                Arc::clone(&counters),
            ));
        }
        for probe in [PING_HOST, INFO_HOST] {
            workers.push(self.spawn_worker(
                probe.to_string(),
                HostChoice::Fixed(probe),
                self.config.probe_interval,
                stop_tx.subscribe(),
                Arc::clone(&counters),
            ));
        }

        tracing::info!(
            endpoint = %self.config.endpoint,
            parallel = self.config.parallel,
            vhosts = self.hosts.len(),
            "Load generator started"
        );

        RunningLoad {
            stop_tx,
            workers,
            counters,
        }
    }

    fn spawn_worker(
        &self,
        name: String,
        hosts: HostChoice,
        period: Duration,
        mut stop: watch::Receiver<bool>,
        counters: Arc<LoadCounters>,
    ) -> JoinHandle<()> {
        let client = self.client.clone();
        let endpoint = self.config.endpoint.clone();
        let timeout = self.config.request_timeout;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        if let Some(host) = hosts.pick() {
                            tracing::trace!(worker = %name, host = %host, "Picked virtual host");
                            fire(&client, &endpoint, host, timeout, &counters);
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(worker = %name, "Load worker stopped");
        })
    }
}

/// Send one request in the background, draining and dropping the response
fn fire(
    client: &Client,
    endpoint: &str,
    host: String,
    timeout: Duration,
    counters: &Arc<LoadCounters>,
) {
    let request = client.get(endpoint).header(HOST, host.as_str()).timeout(timeout);
    let counters = Arc::clone(counters);
    counters.sent.fetch_add(1, Ordering::Relaxed);

    tokio::spawn(async move {
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                // read the body so the connection goes back to the pool
                let _ = response.bytes().await;
                if status.is_client_error() || status.is_server_error() {
                    counters.error_status.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        host = %host,
                        status = status.as_u16(),
                        "Request returned error status"
                    );
                } else {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(host = %host, error = %e, "Request failed");
            }
        }
    });
}

/// Handle to a started load run
pub struct RunningLoad {
    stop_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<LoadCounters>,
}

impl RunningLoad {
    /// Counters so far
    pub fn summary(&self) -> LoadSummary {
        self.counters.summary()
    }

    /// Signal every worker and wait for them to exit
    ///
    /// Requests already in flight are not awaited.
    pub async fn stop(self) -> LoadSummary {
        self.stop_tx.send_replace(true);

        for result in join_all(self.workers).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Load worker panicked");
            }
        }

        let summary = self.counters.summary();
        tracing::info!(%summary, "Load generator stopped");
        summary
    }
}
