//! Exposition format decoding
//!
//! Turns one scrape payload (Prometheus text or OpenMetrics) into normalized
//! samples plus the `TYPE`/`HELP`/`UNIT` metadata seen along the way.
//!
//! ```rust,ignore
//! use perftest::exposition::parse;
//!
//! let scrape = parse(body, "text/plain; version=0.0.4", now_ms)?;
//! for sample in &scrape.samples {
//!     println!("{} {}", sample.labels, sample.value);
//! }
//! ```

mod error;
mod parser;
mod types;

pub use error::{ParseError, ParseResult};
pub use parser::{parse, parse_with};
pub use types::{ContentType, MetricMetadata, ParsedScrape};
