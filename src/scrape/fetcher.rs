//! Scrape payload sources

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;

use crate::scrape::error::FetchError;

/// Media types we can decode, preferred first
const ACCEPT_HEADER: &str = concat!(
    "application/openmetrics-text;version=1.0.0,",
    "application/openmetrics-text;version=0.0.1;q=0.75,",
    "text/plain;version=0.0.4;q=0.5,",
    "*/*;q=0.1"
);

/// Raw scrape response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub body: Vec<u8>,
    /// Value of the `Content-Type` header, empty when absent
    pub content_type: String,
}

impl Payload {
    pub fn new(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
        }
    }
}

/// Source of scrape payloads
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch one payload
    async fn fetch(&self) -> Result<Payload, FetchError>;

    /// Human-readable target used in logs
    fn target(&self) -> &str;
}

/// Fetches a metrics endpoint over HTTP(S)
pub struct HttpFetcher {
    url: String,
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher with its own client
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self::with_client(url, client, timeout))
    }

    /// Create a fetcher reusing an existing client
    pub fn with_client(url: impl Into<String>, client: Client, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            client,
            timeout,
        }
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self) -> Result<Payload, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, ACCEPT_HEADER)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                url = %self.url,
                status = status.as_u16(),
                "Scrape target returned error status"
            );
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        tracing::debug!(
            url = %self.url,
            bytes = body.len(),
            content_type = %content_type,
            "Fetched scrape payload"
        );
        Ok(Payload {
            body: body.to_vec(),
            content_type,
        })
    }

    fn target(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response, returning the URL
    async fn serve_once(
        status_line: &'static str,
        content_type: &'static str,
        body: &'static str,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\
                 Connection: close\r\n\r\n{}",
                status_line,
                content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        format!("http://{}/metrics", addr)
    }

    fn test_client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let url = serve_once("200 OK", "text/plain; version=0.0.4", "up 1\n").await;
        let fetcher = HttpFetcher::with_client(url, test_client(), Duration::from_secs(5));

        let payload = fetcher.fetch().await.unwrap();
        assert_eq!(payload.body, b"up 1\n");
        assert_eq!(payload.content_type, "text/plain; version=0.0.4");
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let url = serve_once("503 Service Unavailable", "text/plain", "down").await;
        let fetcher = HttpFetcher::with_client(url, test_client(), Duration::from_secs(5));

        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let fetcher = HttpFetcher::with_client(
            format!("http://{}/metrics", addr),
            test_client(),
            Duration::from_millis(100),
        );
        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = HttpFetcher::with_client(
            format!("http://{}/metrics", addr),
            test_client(),
            Duration::from_secs(1),
        );
        assert!(matches!(fetcher.fetch().await, Err(FetchError::Request(_))));
    }
}
