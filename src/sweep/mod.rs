//! Declarative sweeps.
//!
//! A sweep file names a program, a base fragment and a list of axes. Each
//! axis lists alternative fragments; the experiments are the cross product,
//! composed with right-biased merges. [`build_graph`] then wires
//! `root → experiments → scrapes` into a [`PipelineGraph`](crate::pipeline::PipelineGraph).

pub mod definition;
pub mod plan;

pub use definition::{FamilyRef, Fragment, FragmentEntry, ScrapeSpec, SweepDefinition};
pub use plan::{build_graph, expand, subset, ROOT_STAGE};
