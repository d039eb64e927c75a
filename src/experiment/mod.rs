//! Launchable experiments.
//!
//! An [`ExperimentInstance`] is a [`ParamSet`](crate::params::ParamSet)
//! bound to a [`ProgramKind`]. The kind selects the rendering strategy for
//! the command line and the memory split of the resource request:
//!
//! | Kind | Command | Memory |
//! |------|---------|--------|
//! | `DependencyParser` | `java … DepParserRunner <args> --ilpWorkMemMegs N` | runtime / solver / model generator |
//! | `CkyParser` | `java … RunCkyParser <args>` | runtime only |
//! | `Profiled` | dependency parser plus a profiler agent | as dependency parser |
//! | `Command` | `<program> <args>` | runtime only |
//!
//! Rendering fails with a [`ConfigurationError`](crate::error::ConfigurationError)
//! when a parameter needed to pick the execution path is missing or
//! contradictory, so the stage is never submitted.

pub mod instance;
pub mod resources;
pub mod script;

pub use instance::{argument_tokens, shell_quote, ExperimentInstance, ProfileMode, ProgramKind};
pub use resources::{MemorySplit, ResourceRequest};
pub use script::{ScriptRenderer, DEFAULT_SCRIPT_TEMPLATE};
