//! Scrape Loop
//!
//! Pulls a metrics endpoint on a fixed interval and feeds the store:
//!
//! ```text
//! ┌─────────────┐  payload  ┌────────────┐  samples  ┌─────────┐
//! │   Fetcher   │ ────────► │ exposition │ ────────► │  Store  │
//! │ (HTTP/test) │           │   parser   │  (batch)  │         │
//! └─────────────┘           └────────────┘           └────┬────┘
//!                                                         │
//!                                  optional instant query ▼
//!                                                   ┌───────────┐
//!                                                   │ Evaluator │
//!                                                   └───────────┘
//! ```
//!
//! Every stage failure is fatal: the scheduler moves to
//! [`SchedulerState::Stopped`] and its task ends with the error.

mod error;
mod fetcher;
mod scheduler;

pub use error::{FetchError, SchedulerError, SchedulerResult};
pub use fetcher::{Fetcher, HttpFetcher, Payload};
pub use scheduler::{ScrapeConfig, ScrapeScheduler, SchedulerState, TickReport};
