//! The contract between the runner and whatever actually executes jobs.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SubmissionError;
use crate::experiment::ResourceRequest;
use crate::params::ParamSet;

/// Opaque reference to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    id: Uuid,
    stage: String,
}

impl JobHandle {
    /// Creates a fresh handle for a job of `stage`.
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: stage.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the stage the job belongs to.
    pub fn stage(&self) -> &str {
        &self.stage
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.stage, self.id)
    }
}

/// Externally observed status of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        diagnostic: String,
    },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed { exit_code, .. } => match exit_code {
                Some(code) => write!(f, "failed (exit {})", code),
                None => write!(f, "failed"),
            },
        }
    }
}

/// Everything the substrate needs to run one attempt of a stage.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    /// Stage name; also the name of the job's working directory.
    pub stage: String,
    /// Self-contained shell script.
    pub script: String,
    pub resources: ResourceRequest,
    /// Parameters frozen at submission, persisted for re-association by
    /// the scraper.
    pub params: Option<ParamSet>,
}

/// Runs rendered scripts and reports on them.
///
/// Implementations must not block: `submit` returns once the job is
/// accepted and `poll` only inspects its current state.
#[async_trait]
pub trait ExecutionSubstrate: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Hands a job over for execution.
    async fn submit(&self, job: JobSubmission) -> Result<JobHandle, SubmissionError>;

    /// Reports the current status of a job.
    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, SubmissionError>;

    /// Directory the job writes its `stdout` and `stderr` into.
    fn cwd_of(&self, handle: &JobHandle) -> Result<PathBuf, SubmissionError>;

    /// Best-effort request to stop a running job.
    async fn cancel(&self, _handle: &JobHandle) -> Result<(), SubmissionError> {
        Ok(())
    }

    /// Whether a previous run of `stage` left complete output behind.
    async fn prior_success(&self, _stage: &str) -> bool {
        false
    }
}
