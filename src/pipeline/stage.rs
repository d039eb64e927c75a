//! Schedulable stages and their lifecycle.
//!
//! A stage wraps one unit of work (an experiment, a scrape/aggregation
//! pass, an arbitrary script, or a no-op root) together with its place in
//! the dependency graph and its retry bookkeeping.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::experiment::{ExperimentInstance, ResourceRequest};
use crate::scheduler::JobHandle;
use crate::scrape::ScrapeJob;

/// Identifier of a stage, unique within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(u64);

impl StageId {
    /// Wraps a raw identifier.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a stage.
///
/// ```text
/// PENDING → READY → RUNNING → SUCCEEDED
///                           ↘ FAILED → READY (while retries remain)
/// PENDING/FAILED → ABORTED (a prerequisite failed for good)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageState::Pending => write!(f, "pending"),
            StageState::Ready => write!(f, "ready"),
            StageState::Running => write!(f, "running"),
            StageState::Succeeded => write!(f, "succeeded"),
            StageState::Failed => write!(f, "failed"),
            StageState::Aborted => write!(f, "aborted"),
        }
    }
}

/// The work a stage performs.
#[derive(Debug, Clone)]
pub enum StageWork {
    /// No-op anchor for a sweep; succeeds as soon as it is dispatched.
    Root { name: String },
    /// An external program run on the execution substrate.
    Experiment(ExperimentInstance),
    /// In-process scrape of the outputs of finished stages.
    Scrape(ScrapeJob),
    /// An arbitrary shell body run on the execution substrate.
    Script {
        name: String,
        body: String,
        resources: ResourceRequest,
    },
}

impl StageWork {
    /// Stage name derived from the work; also its directory name.
    pub fn name(&self) -> String {
        match self {
            StageWork::Root { name } => name.clone(),
            StageWork::Experiment(exp) => exp.render_name(),
            StageWork::Scrape(job) => job.name().to_string(),
            StageWork::Script { name, .. } => name.clone(),
        }
    }

    /// Whether the work runs on the external substrate.
    pub fn is_external(&self) -> bool {
        matches!(self, StageWork::Experiment(_) | StageWork::Script { .. })
    }
}

/// What was handed to the substrate for the current attempt.
#[derive(Debug, Clone)]
pub struct Submission {
    pub handle: JobHandle,
    /// Parameters frozen at submission time.
    pub snapshot: Option<ExperimentInstance>,
    pub resources: ResourceRequest,
}

/// A schedulable unit of work with prerequisites and dependents.
#[derive(Debug, Clone)]
pub struct Stage {
    id: StageId,
    name: String,
    work: StageWork,
    pub(crate) state: StageState,
    pub(crate) prerequisites: BTreeSet<StageId>,
    pub(crate) dependents: BTreeSet<StageId>,
    pub(crate) attempts: u32,
    max_retries: Option<u32>,
    always_relaunch: bool,
    pub(crate) permanent_failure: bool,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) submission: Option<Submission>,
    pub(crate) last_failure: Option<String>,
}

impl Stage {
    /// Creates a detached stage in the `Pending` state.
    pub fn new(id: StageId, work: StageWork) -> Self {
        Self {
            id,
            name: work.name(),
            work,
            state: StageState::Pending,
            prerequisites: BTreeSet::new(),
            dependents: BTreeSet::new(),
            attempts: 0,
            max_retries: None,
            always_relaunch: false,
            permanent_failure: false,
            cwd: None,
            submission: None,
            last_failure: None,
        }
    }

    /// Forces re-submission even when prior output exists, and lifts the
    /// retry budget.
    pub fn with_always_relaunch(mut self) -> Self {
        self.always_relaunch = true;
        self
    }

    /// Sets a stage-specific retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn work(&self) -> &StageWork {
        &self.work
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn prerequisites(&self) -> &BTreeSet<StageId> {
        &self.prerequisites
    }

    pub fn dependents(&self) -> &BTreeSet<StageId> {
        &self.dependents
    }

    /// Number of submissions so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn always_relaunch(&self) -> bool {
        self.always_relaunch
    }

    pub(crate) fn set_always_relaunch(&mut self, value: bool) {
        self.always_relaunch = value;
    }

    /// Working directory, assigned at submission.
    pub fn cwd(&self) -> Option<&PathBuf> {
        self.cwd.as_ref()
    }

    /// The current or most recent submission.
    pub fn submission(&self) -> Option<&Submission> {
        self.submission.as_ref()
    }

    /// Diagnostic text of the most recent failure.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Returns whether another attempt is allowed after a failure.
    pub fn can_retry(&self, default_max_retries: u32) -> bool {
        if self.permanent_failure {
            return false;
        }
        if self.always_relaunch {
            return true;
        }
        let retries = self.max_retries.unwrap_or(default_max_retries);
        self.attempts <= retries
    }

    /// Returns the number of remaining retry attempts, `None` if unbounded.
    pub fn remaining_retries(&self, default_max_retries: u32) -> Option<u32> {
        if self.always_relaunch && !self.permanent_failure {
            return None;
        }
        if self.permanent_failure {
            return Some(0);
        }
        let retries = self.max_retries.unwrap_or(default_max_retries);
        Some((retries + 1).saturating_sub(self.attempts))
    }

    /// Whether the stage has reached a final state for this run.
    pub fn is_terminal(&self, default_max_retries: u32) -> bool {
        match self.state {
            StageState::Succeeded | StageState::Aborted => true,
            StageState::Failed => !self.can_retry(default_max_retries),
            _ => false,
        }
    }

    /// Whether the stage failed and will not be retried.
    pub fn is_exhausted(&self, default_max_retries: u32) -> bool {
        self.state == StageState::Failed && !self.can_retry(default_max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(id: u64) -> Stage {
        Stage::new(
            StageId::new(id),
            StageWork::Root {
                name: "root".to_string(),
            },
        )
    }

    #[test]
    fn test_new_stage_is_pending_and_detached() {
        let stage = root(1);
        assert_eq!(stage.state(), StageState::Pending);
        assert!(stage.prerequisites().is_empty());
        assert!(stage.dependents().is_empty());
        assert!(stage.cwd().is_none());
        assert_eq!(stage.name(), "root");
    }

    #[test]
    fn test_retry_budget() {
        let mut stage = root(1).with_max_retries(1);
        stage.state = StageState::Failed;

        stage.attempts = 1;
        assert!(stage.can_retry(5));
        assert_eq!(stage.remaining_retries(5), Some(1));
        assert!(!stage.is_terminal(5));

        stage.attempts = 2;
        assert!(!stage.can_retry(5));
        assert_eq!(stage.remaining_retries(5), Some(0));
        assert!(stage.is_terminal(5));
        assert!(stage.is_exhausted(5));
    }

    #[test]
    fn test_always_relaunch_is_unbounded_unless_permanent() {
        let mut stage = root(1).with_always_relaunch();
        stage.state = StageState::Failed;
        stage.attempts = 100;
        assert!(stage.can_retry(0));
        assert_eq!(stage.remaining_retries(0), None);

        stage.permanent_failure = true;
        assert!(!stage.can_retry(0));
        assert!(stage.is_terminal(0));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(StageState::Succeeded.to_string(), "succeeded");
        assert_eq!(StageState::Aborted.to_string(), "aborted");
        assert_eq!(StageId::new(4).to_string(), "#4");
    }
}
