//! Dependency-driven execution of stages.
//!
//! This module sequences job submission over a DAG of [`Stage`]s, waits on
//! completion, and triggers downstream aggregation once prerequisites have
//! finished, tolerating partial failure and re-submission.
//!
//! # Architecture
//!
//! The pipeline consists of several components:
//!
//! - **RunContext**: run identity, root paths and the stage-id source
//! - **PipelineGraph**: the stages and their prerequisite/dependent edges
//! - **Runner**: the control loop that submits, polls, retries and aborts
//! - **Config**: poll interval, global timeout and retry budget
//!
//! # Stage lifecycle
//!
//! 1. **Pending**: waiting for its prerequisites
//! 2. **Ready**: every prerequisite succeeded
//! 3. **Running**: submitted to the substrate (in-process for roots and scrapes)
//! 4. **Succeeded** / **Failed**: per the job's exit status
//! 5. Failed stages go back to ready while their retry budget lasts; once it
//!    is exhausted every transitive dependent becomes **Aborted**
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sweep_forge::pipeline::{PipelineGraph, RunContext, Runner, RunnerConfig, StageWork};
//! use sweep_forge::scheduler::LocalSubstrate;
//!
//! let ctx = Arc::new(RunContext::new("/scratch/sweeps", "bnb"));
//! let mut graph = PipelineGraph::new();
//! let root = graph.add(&ctx, StageWork::Root { name: "root".into() });
//! let exp = graph.add(&ctx, StageWork::Experiment(experiment));
//! graph.add_dependent(root, exp)?;
//!
//! let substrate = Arc::new(LocalSubstrate::new(ctx.run_dir()));
//! let mut runner = Runner::new(graph, ctx, substrate, RunnerConfig::from_env()?)?;
//! let summary = runner.run().await?;
//! println!("{}", summary);
//! ```

pub mod config;
pub mod context;
pub mod graph;
pub mod runner;
pub mod stage;

pub use config::{ConfigError, RunnerConfig, DEFAULT_MAX_RETRIES};
pub use context::RunContext;
pub use graph::PipelineGraph;
pub use runner::{RunError, RunSummary, Runner, StageReport};
pub use stage::{Stage, StageId, StageState, StageWork, Submission};
