//! Pooled HTTP transport with an in-process DNS cache

use hyper::client::connect::dns::Name;
use reqwest::dns::{Addrs, Resolve, Resolving};
use reqwest::Client;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::loadgen::error::{LoadError, LoadResult};

/// Default period between cache refreshes
pub const DNS_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

const POOL_MAX_IDLE_PER_HOST: usize = 100;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct CacheEntry {
    addrs: Vec<SocketAddr>,
    /// Looked up since the last refresh
    used: bool,
}

/// Host name cache shared by every connection of the load client
///
/// A refresh drops hosts nobody asked for since the previous refresh and
/// re-resolves the rest.
#[derive(Debug, Clone, Default)]
pub struct DnsCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `host`, answering from the cache when possible
    pub async fn lookup(&self, host: &str) -> io::Result<Vec<SocketAddr>> {
        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(host) {
                entry.used = true;
                return Ok(entry.addrs.clone());
            }
        }

        let addrs = resolve_host(host).await?;
        self.entries.write().await.insert(
            host.to_string(),
            CacheEntry {
                addrs: addrs.clone(),
                used: true,
            },
        );
        tracing::debug!(host, addrs = addrs.len(), "DNS cache miss");
        Ok(addrs)
    }

    /// Drop unused entries and re-resolve the others
    pub async fn refresh(&self) {
        let hosts: Vec<String> = {
            let mut entries = self.entries.write().await;
            entries.retain(|_, entry| entry.used);
            entries.keys().cloned().collect()
        };

        for host in hosts {
            match resolve_host(&host).await {
                Ok(addrs) => {
                    if let Some(entry) = self.entries.write().await.get_mut(&host) {
                        entry.addrs = addrs;
                        entry.used = false;
                    }
                }
                Err(e) => {
                    // keep serving the stale addresses
                    tracing::warn!(host = %host, error = %e, "DNS refresh failed");
                    if let Some(entry) = self.entries.write().await.get_mut(&host) {
                        entry.used = false;
                    }
                }
            }
        }

        let hosts = self.len().await;
        tracing::debug!(hosts, "DNS cache refreshed");
    }

    /// Refresh every `period` until `stop` flips to true
    pub fn start_refresh(
        &self,
        period: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => cache.refresh().await,
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Number of cached hosts
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

async fn resolve_host(host: &str) -> io::Result<Vec<SocketAddr>> {
    // the connector replaces port 0 with the URL's port
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0)).await?.collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {}", host),
        ));
    }
    Ok(addrs)
}

impl Resolve for DnsCache {
    fn resolve(&self, name: Name) -> Resolving {
        let cache = self.clone();
        Box::pin(async move {
            let addrs = cache.lookup(name.as_str()).await?;
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

/// Build the shared load client: wide idle pool, short idle timeout, cached DNS
///
/// Environment proxies are ignored so the target sees the traffic directly.
pub fn build_client(dns: Arc<DnsCache>, timeout: Duration) -> LoadResult<Client> {
    Client::builder()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .timeout(timeout)
        .dns_resolver(dns)
        .no_proxy()
        .build()
        .map_err(|e| LoadError::Client(e.to_string()))
}
