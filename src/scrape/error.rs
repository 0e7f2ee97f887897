//! Scrape error types

use std::time::Duration;
use thiserror::Error;

use crate::exposition::ParseError;
use crate::query::QueryError;
use crate::storage::StorageError;

/// Errors that can occur while fetching a scrape payload
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure (connect, TLS, body read)
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// Target answered with a non-2xx status
    #[error("scrape target returned status {status}")]
    Status { status: u16 },

    /// Fetch deadline elapsed
    #[error("scrape timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Errors that stop the scrape scheduler
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// A previous tick failed or `stop` was called
    #[error("scheduler is stopped")]
    Stopped,
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
