//! Runs stage scripts as child processes of the current machine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::SubmissionError;

use super::substrate::{ExecutionSubstrate, JobHandle, JobStatus, JobSubmission};

/// Script written into every stage directory.
pub const SCRIPT_FILE: &str = "script.sh";
/// Frozen parameter snapshot of the stage.
pub const PARAMS_FILE: &str = "params.json";
/// Captured standard output; what the scraper reads.
pub const STDOUT_FILE: &str = "stdout";
/// Captured standard error.
pub const STDERR_FILE: &str = "stderr";
/// Written after a zero exit; marks the output as complete.
pub const DONE_FILE: &str = "DONE";

/// Lines of stderr kept as failure diagnostic.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

struct LocalJob {
    dir: PathBuf,
    child: Child,
}

/// Executes jobs with `sh` in `<run_dir>/<stage>/`.
///
/// A job is forgotten once a poll has reported its terminal status; later
/// polls of that handle fail with [`SubmissionError::UnknownHandle`].
pub struct LocalSubstrate {
    run_dir: PathBuf,
    shell: String,
    jobs: Mutex<HashMap<JobHandle, LocalJob>>,
}

impl LocalSubstrate {
    /// Creates a substrate rooted at `run_dir`.
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            shell: "sh".to_string(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Uses a different shell to interpret the scripts.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn stage_dir(&self, stage: &str) -> PathBuf {
        self.run_dir.join(stage)
    }

    /// Jobs submitted and not yet reported finished or cancelled.
    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Creates the stage directory and writes the script and parameter snapshot.
///
/// A stale completion marker from an earlier run is removed.
pub(crate) async fn prepare_stage_dir(
    dir: &Path,
    job: &JobSubmission,
) -> Result<(), SubmissionError> {
    tokio::fs::create_dir_all(dir).await?;
    let marker = dir.join(DONE_FILE);
    if tokio::fs::try_exists(&marker).await? {
        tokio::fs::remove_file(&marker).await?;
    }
    tokio::fs::write(dir.join(SCRIPT_FILE), &job.script).await?;
    if let Some(params) = &job.params {
        let json = serde_json::to_string_pretty(params)?;
        tokio::fs::write(dir.join(PARAMS_FILE), json).await?;
    }
    Ok(())
}

fn stderr_tail(dir: &Path) -> String {
    let text = std::fs::read_to_string(dir.join(STDERR_FILE)).unwrap_or_default();
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl ExecutionSubstrate for LocalSubstrate {
    fn name(&self) -> &str {
        "local"
    }

    async fn submit(&self, job: JobSubmission) -> Result<JobHandle, SubmissionError> {
        let dir = self.stage_dir(&job.stage);
        prepare_stage_dir(&dir, &job).await?;

        let stdout = std::fs::File::create(dir.join(STDOUT_FILE))?;
        let stderr = std::fs::File::create(dir.join(STDERR_FILE))?;

        let child = Command::new(&self.shell)
            .arg(SCRIPT_FILE)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|source| SubmissionError::Spawn {
                stage: job.stage.clone(),
                source,
            })?;

        let handle = JobHandle::new(&job.stage);
        info!(
            stage = %job.stage,
            pid = child.id().unwrap_or_default(),
            dir = %dir.display(),
            "Spawned local job"
        );

        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert(
            handle.clone(),
            LocalJob { dir, child },
        );
        Ok(handle)
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, SubmissionError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let job = jobs
            .get_mut(handle)
            .ok_or_else(|| SubmissionError::UnknownHandle(handle.to_string()))?;

        let status = match job.child.try_wait()? {
            None => return Ok(JobStatus::Running),
            Some(exit) if exit.success() => {
                std::fs::write(job.dir.join(DONE_FILE), b"")?;
                JobStatus::Succeeded
            }
            Some(exit) => JobStatus::Failed {
                exit_code: exit.code(),
                diagnostic: stderr_tail(&job.dir),
            },
        };
        debug!(stage = %handle.stage(), status = %status, "Local job finished");
        jobs.remove(handle);
        Ok(status)
    }

    fn cwd_of(&self, handle: &JobHandle) -> Result<PathBuf, SubmissionError> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(handle)
            .map(|job| job.dir.clone())
            .ok_or_else(|| SubmissionError::UnknownHandle(handle.to_string()))
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), SubmissionError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut job) = jobs.remove(handle) {
            if let Err(e) = job.child.start_kill() {
                warn!(stage = %handle.stage(), error = %e, "Failed to kill local job");
            }
        }
        Ok(())
    }

    async fn prior_success(&self, stage: &str) -> bool {
        tokio::fs::try_exists(self.stage_dir(stage).join(DONE_FILE))
            .await
            .unwrap_or(false)
    }
}
