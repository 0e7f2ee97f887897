//! Load Generator
//!
//! Independent timers firing HTTP GETs at the target endpoint:
//!
//! - `parallel` workers, one request per `request_interval` each, with a
//!   `Host` header picked at random from `{prefix}-0 .. {prefix}-{n-1}`
//! - two probes sending `__ping__` and `__info__` every `probe_interval`
//!
//! Requests are fire-and-forget. Responses are drained so connections return
//! to the shared pool, whose DNS lookups go through a [`DnsCache`].
//!
//! # Example
//!
//! ```rust,ignore
//! use perftest::loadgen::{build_client, DnsCache, LoadConfig, LoadGenerator};
//!
//! let dns = Arc::new(DnsCache::new());
//! let client = build_client(Arc::clone(&dns), Duration::from_secs(10))?;
//! let generator = LoadGenerator::new(LoadConfig::new("http://target:8080/"), client)?;
//!
//! let running = generator.start();
//! tokio::time::sleep(Duration::from_secs(300)).await;
//! let summary = running.stop().await;
//! ```

mod client;
mod error;
mod generator;

pub use client::{build_client, DnsCache, DNS_REFRESH_INTERVAL};
pub use error::{LoadError, LoadResult};
pub use generator::{
    virtual_hosts, LoadConfig, LoadGenerator, LoadSummary, RunningLoad, INFO_HOST, PING_HOST,
};
