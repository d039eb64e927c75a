//! A substrate that prepares stage directories without running anything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::error::SubmissionError;

use super::local::{prepare_stage_dir, STDOUT_FILE};
use super::substrate::{ExecutionSubstrate, JobHandle, JobStatus, JobSubmission};

/// Writes scripts and parameter snapshots, then reports every job as
/// succeeded. Useful to inspect what a sweep would submit.
pub struct DryRunSubstrate {
    run_dir: PathBuf,
    jobs: Mutex<HashMap<JobHandle, PathBuf>>,
}

impl DryRunSubstrate {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Number of jobs submitted so far.
    pub fn submitted(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ExecutionSubstrate for DryRunSubstrate {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn submit(&self, job: JobSubmission) -> Result<JobHandle, SubmissionError> {
        let dir = self.run_dir.join(&job.stage);
        prepare_stage_dir(&dir, &job).await?;
        // Downstream scrapes expect an output file, even an empty one.
        let stdout = dir.join(STDOUT_FILE);
        if !tokio::fs::try_exists(&stdout).await? {
            tokio::fs::write(&stdout, b"").await?;
        }

        info!(
            stage = %job.stage,
            memory_megabytes = job.resources.memory_megabytes,
            thread_count = job.resources.thread_count,
            "Dry run: script written, not executed"
        );
        let handle = JobHandle::new(&job.stage);
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.clone(), dir);
        Ok(handle)
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, SubmissionError> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(handle) {
            Ok(JobStatus::Succeeded)
        } else {
            Err(SubmissionError::UnknownHandle(handle.to_string()))
        }
    }

    fn cwd_of(&self, handle: &JobHandle) -> Result<PathBuf, SubmissionError> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(handle)
            .cloned()
            .ok_or_else(|| SubmissionError::UnknownHandle(handle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ResourceRequest;
    use crate::scheduler::local::SCRIPT_FILE;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dry_run_writes_script_and_succeeds() {
        let dir = TempDir::new().expect("tempdir");
        let substrate = DryRunSubstrate::new(dir.path());
        let handle = substrate
            .submit(JobSubmission {
                stage: "exp".to_string(),
                script: "exit 1\n".to_string(),
                resources: ResourceRequest::default(),
                params: None,
            })
            .await
            .expect("submit");

        assert_eq!(substrate.poll(&handle).await.expect("poll"), JobStatus::Succeeded);
        let cwd = substrate.cwd_of(&handle).expect("cwd");
        assert_eq!(
            std::fs::read_to_string(cwd.join(SCRIPT_FILE)).expect("script"),
            "exit 1\n"
        );
        assert!(cwd.join(STDOUT_FILE).exists());
        assert_eq!(substrate.submitted(), 1);
        assert!(!substrate.prior_success("exp").await);
    }
}
