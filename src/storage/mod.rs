//! Perftest Storage Engine
//!
//! Short-lived in-memory time-series storage for scraped samples:
//!
//! - **types**: Core data structures (Labels, Sample, Series, TimeRange, Matcher)
//! - **engine**: The store, its appender transaction and statistics
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Sample → Appender (write lock) → staged → commit (all or nothing)
//!
//! Read Path:
//!   Matchers → Name index → Filter → Range slice → Results
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use perftest::storage::{Labels, Matcher, Store, StoreConfig, TimeRange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::new(StoreConfig::default());
//!
//!     let mut appender = store.begin_append().await?;
//!     appender.add(Labels::new().with("__name__", "up"), 1_000, 1.0)?;
//!     appender.commit()?;
//!
//!     let series = store
//!         .query(&[Matcher::metric_name("up")], TimeRange::new(0, 2_000))
//!         .await?;
//!     println!("{} series", series.len());
//!
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use engine::{Appender, CommitStats, SeriesRef, Store, StoreConfig, StoreStats};
pub use error::{StorageError, StorageResult};
pub use types::{Label, Labels, MatchOp, Matcher, Point, Sample, Series, TimeRange, METRIC_NAME};
