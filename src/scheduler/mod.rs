//! Execution substrates: where stage scripts actually run.
//!
//! The runner only talks to the [`ExecutionSubstrate`] trait: it submits a
//! rendered script with its resource request, polls the returned handle, and
//! asks for the working directory the job wrote its output into.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────┐  submit(script, resources)  ┌────────────────────┐
//!   │  Runner  │ ──────────────────────────► │ ExecutionSubstrate │
//!   │          │ ◄────────────────────────── │  LocalSubstrate    │
//!   └──────────┘   poll(handle) / cwd_of     │  DryRunSubstrate   │
//!                                            └─────────┬──────────┘
//!                                                      │
//!                                      <run_dir>/<stage>/script.sh
//!                                                       params.json
//!                                                       stdout, stderr
//!                                                       DONE
//! ```

pub mod dry_run;
pub mod local;
pub mod substrate;

pub use dry_run::DryRunSubstrate;
pub use local::{LocalSubstrate, DONE_FILE, PARAMS_FILE, SCRIPT_FILE, STDERR_FILE, STDOUT_FILE};
pub use substrate::{ExecutionSubstrate, JobHandle, JobStatus, JobSubmission};
