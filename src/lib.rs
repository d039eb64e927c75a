//! sweep-forge: experiment sweep composition, scheduling and scraping.
//!
//! This library composes parameterized experiments from reusable fragments,
//! runs them as a dependency graph of batch jobs with retries, and scrapes
//! their logs into structured, tabular records.

pub mod cli;
pub mod error;
pub mod experiment;
pub mod export;
pub mod params;
pub mod pipeline;
pub mod scheduler;
pub mod scrape;
pub mod sweep;

// Re-export commonly used error types
pub use error::{
    ConfigurationError, GraphError, ParseError, ScrapeError, SinkError, StageFailure,
    SubmissionError, SweepError,
};
