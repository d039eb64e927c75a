//! Command-line interface for sweep-forge.
//!
//! Provides commands to run a sweep, list its experiments, and scrape
//! finished stage output.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
