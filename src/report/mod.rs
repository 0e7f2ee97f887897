//! Report Generator
//!
//! Runs range queries over the trailing window and writes one chart data file
//! per chart into `report_YYYY_MM_DDTHH_MM_SS/`:
//!
//! ```text
//! report_2024_05_01T10_00_00/
//! ├── index.json              charts, series, peaks
//! ├── requests.csv            sum(rate(galeb_http_requests_total[1m])) by (virtualhost)
//! ├── requests_errors.csv     sum(rate(galeb_errors_total[1m])) by (virtualhost, error)
//! ├── open_fds.csv            process_open_fds
//! ├── memory_area_<area>.csv  used, max, used / max
//! └── memory_pool_<pool>.csv  used, max, committed
//! ```
//!
//! Every CSV has the columns `series,timestamp,value` with RFC 3339 timestamps.

mod charts;
mod error;
mod generator;

pub use charts::{format_bytes_si, ChartSpec, Legend, SeriesSpec, Unit};
pub use error::{ReportError, ReportResult};
pub use generator::{
    ChartSummary, Report, ReportConfig, ReportGenerator, SeriesSummary, INDEX_FILE,
};
