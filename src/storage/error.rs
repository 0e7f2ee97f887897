//! Storage error types
//!
//! Defines all errors that can occur in the time-series store.

use thiserror::Error;

/// Errors that can occur in the time-series store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Sample label set has no `__name__` label
    #[error("missing metric name (__name__ label)")]
    MissingNameLabel,

    /// A different value already exists for this series at this timestamp
    #[error("conflicting sample for series {series} at timestamp {timestamp}")]
    Conflict { series: String, timestamp: i64 },

    /// Sample is older than the newest point of its series
    #[error("out of order sample for series {series} at timestamp {timestamp}")]
    OutOfOrder { series: String, timestamp: i64 },

    /// The write lock could not be acquired in time
    #[error("store is busy with an open appender")]
    WriterBusy,

    /// Invalid time range (start >= end)
    #[error("Invalid time range: start must be less than end")]
    InvalidTimeRange,

    /// The store has been closed
    #[error("store is closed")]
    Closed,
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
