//! Error types for sweep-forge operations.
//!
//! Defines the error taxonomy shared by the subsystems:
//! - Rendering an experiment into a launchable script (configuration)
//! - Handing jobs to an execution substrate (submission)
//! - Building the stage graph (cycles, duplicate identifiers)
//! - Scraping program output into records (parse and consistency errors)
//! - Writing records to result files
//! - Loading sweep definitions

use std::path::PathBuf;

use thiserror::Error;

/// Missing or contradictory parameters detected while rendering an experiment.
///
/// Fatal for the affected stage only: the stage is never submitted.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Missing required parameter '{field}' for {context}")]
    MissingField { field: String, context: String },

    #[error("Parameter '{field}' has invalid value '{value}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Contradictory parameters: {0}")]
    Contradiction(String),

    #[error("Script template error: {0}")]
    Template(#[from] tera::Error),
}

/// The execution substrate refused or could not accept a job.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Substrate rejected job for stage '{stage}': {reason}")]
    Rejected { stage: String, reason: String },

    #[error("Unknown job handle: {0}")]
    UnknownHandle(String),

    #[error("Failed to spawn job for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a single attempt of a stage did not succeed.
///
/// Configuration and parse failures are not retried; submission and
/// execution failures consume the retry budget.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Job exited with code {exit_code:?}: {diagnostic}")]
    Execution {
        exit_code: Option<i32>,
        diagnostic: String,
    },

    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("Result sink error: {0}")]
    Sink(#[from] SinkError),
}

impl StageFailure {
    /// Returns whether another attempt may fix this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StageFailure::Submission(_) | StageFailure::Execution { .. }
        )
    }
}

/// Errors detected while constructing the stage graph.
///
/// These are programming errors in the sweep and abort the whole run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Cycle detected among stages: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Duplicate stage identifier '{0}'")]
    DuplicateIdentifier(String),

    #[error("Unknown stage id {0}")]
    UnknownStage(u64),

    #[error("Stage '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("Edge '{before}' -> '{after}' is recorded on only one stage")]
    AsymmetricEdge { before: String, after: String },
}

/// A line of program output violated the declared extraction schema.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Line {line}: missing timestamp in '{text}'")]
    MissingTime { line: usize, text: String },

    #[error("Line {line}: expected field '{field}' at position {position}, found none in '{text}'")]
    MissingField {
        line: usize,
        field: String,
        position: usize,
        text: String,
    },

    #[error("Line {line}: cannot convert '{raw}' to {kind} for field '{field}'")]
    Conversion {
        line: usize,
        field: String,
        raw: String,
        kind: String,
    },
}

/// Errors raised while scraping a stage's output.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Correlated sequences '{left}' and '{right}' have different lengths ({left_count} vs {right_count})")]
    CountMismatch {
        left: String,
        right: String,
        left_count: usize,
        right_count: usize,
    },

    #[error("Correlated entry {index}: timestamps {left_ms} and {right_ms} differ by {delta_ms} ms (tolerance {tolerance_ms} ms)")]
    TimestampSkew {
        index: usize,
        left_ms: i64,
        right_ms: i64,
        delta_ms: i64,
        tolerance_ms: i64,
    },

    #[error("Stage directory '{0}' has no recorded parameters")]
    MissingParams(PathBuf),

    #[error("Unknown scrape family '{0}'")]
    UnknownFamily(String),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("IO error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while writing result files.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("No records to write")]
    NoRecords,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

/// Errors that can occur while loading or expanding a sweep definition.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Failed to read sweep file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse sweep file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Sweep '{0}' has an empty axis")]
    EmptyAxis(String),

    #[error("Invalid parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),
}
