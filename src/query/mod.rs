//! Perftest Query Engine
//!
//! A constrained query language over the in-memory store:
//!
//! - **AST**: Expression tree types
//! - **Parser**: Parse query strings into the AST
//! - **Functions**: Selector windows, `rate`, aggregation and vector matching
//! - **Executor**: Instant and range evaluation against the store
//!
//! # Query Language
//!
//! ```text
//! metric{label="value", other=~"re.*"}[5m]
//! rate(range_vector)
//! sum|count|avg|min|max [by|without (labels)] (expr)
//! expr (+ - * / % == != > < >= <=) expr
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use perftest::query::{EngineConfig, Evaluator};
//!
//! let evaluator = Evaluator::new(store, EngineConfig::default());
//!
//! let now = evaluator
//!     .instant_query_now("sum(rate(galeb_http_requests_total[1m])) by (virtualhost)")
//!     .await?;
//!
//! let last_hour = evaluator
//!     .range_query_window("process_open_fds", Duration::from_secs(3600))
//!     .await?;
//! ```

mod ast;
mod error;
mod executor;
mod functions;
mod parser;

pub use ast::{
    format_duration, AggregateOp, BinaryOp, Expr, Grouping, MatrixSelector, ValueType,
    VectorSelector,
};
pub use error::{QueryError, QueryResult};
pub use executor::{EngineConfig, Evaluator, InstantVector, QueryValue, RangeMatrix};
pub use functions::{is_stale_marker, VectorSample, STALE_NAN_BITS};
pub use parser::parse_query;
