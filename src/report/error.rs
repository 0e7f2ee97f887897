//! Report error types

use thiserror::Error;

use crate::query::QueryError;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("chart {chart}: {source}")]
    Query {
        chart: String,
        #[source]
        source: QueryError,
    },
}

pub type ReportResult<T> = Result<T, ReportError>;
