//! Query error types
//!
//! Defines all error conditions that can occur during query parsing and evaluation.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Query parsing failed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unsupported function or operator, wrong argument types, matching errors
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Samples fetched or points produced exceed the configured budget
    #[error("Query exceeded the sample limit of {limit}")]
    ResourceExceeded { limit: usize },

    /// Query ran past its deadline
    #[error("Query timed out")]
    Timeout,

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

impl QueryError {
    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
