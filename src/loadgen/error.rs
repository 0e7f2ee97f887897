//! Load generator error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("invalid load configuration: {0}")]
    InvalidConfig(String),
}

pub type LoadResult<T> = Result<T, LoadError>;
