//! # perftest
//!
//! Load-test harness with an embedded metrics engine: it drives HTTP traffic
//! at a target, scrapes the target's Prometheus/OpenMetrics endpoint into a
//! short-lived in-memory time-series store, and charts the result.
//!
//! ## Modules
//!
//! - [`exposition`]: Prometheus text / OpenMetrics payload parser
//! - [`storage`]: In-memory series store with transactional appends
//! - [`query`]: Query language parser and instant/range evaluator
//! - [`scrape`]: Fetcher seam and the periodic scrape loop
//! - [`loadgen`]: Fire-and-forget load workers over a DNS-cached client
//! - [`report`]: Chart data files produced from range queries
//! - [`config`]: TOML file and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use perftest::exposition;
//! use perftest::query::{EngineConfig, Evaluator};
//! use perftest::storage::{Store, StoreConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(Store::new(StoreConfig::default()));
//!
//!     let payload = b"requests_total{vhost=\"a\"} 5\nrequests_total{vhost=\"b\"} 7\n";
//!     let scrape = exposition::parse(payload, "text/plain; version=0.0.4", 1_000)?;
//!
//!     let mut appender = store.begin_append().await?;
//!     for sample in scrape.samples {
//!         appender.add(sample.labels, sample.timestamp, sample.value)?;
//!     }
//!     appender.commit()?;
//!
//!     let evaluator = Evaluator::new(Arc::clone(&store), EngineConfig::default());
//!     let result = evaluator.instant_query("sum(requests_total) by (vhost)", 1_000).await?;
//!     println!("{}", serde_json::to_string(&result)?);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod exposition;
pub mod loadgen;
pub mod query;
pub mod report;
pub mod scrape;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Appender, Labels, Matcher, Sample, Series, Store, StoreConfig, StorageError, StorageResult,
    TimeRange,
};

pub use exposition::{ContentType, ParseError, ParsedScrape};

pub use query::{EngineConfig, Evaluator, QueryError, QueryResult, QueryValue};

pub use scrape::{Fetcher, HttpFetcher, ScrapeConfig, ScrapeScheduler, SchedulerError};

pub use loadgen::{DnsCache, LoadConfig, LoadGenerator};

pub use report::{ReportConfig, ReportError, ReportGenerator};

pub use config::{Config, ConfigError, LoggingConfig};
