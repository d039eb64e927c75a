//! The runner loop: dispatch ready stages, poll running ones, repeat.
//!
//! A single control task drives the whole graph. It only suspends between
//! two polls of the substrate; dependency resolution and in-process stages
//! (roots and scrapes) run synchronously between those suspension points.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ConfigurationError, GraphError, StageFailure};
use crate::experiment::ScriptRenderer;
use crate::scheduler::{ExecutionSubstrate, JobStatus, JobSubmission};
use crate::scrape::{load_params, ScrapeInput};

use super::config::{ConfigError, RunnerConfig};
use super::context::RunContext;
use super::graph::PipelineGraph;
use super::stage::{StageId, StageState, StageWork, Submission};

/// Errors that stop a run as a whole.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid stage graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Invalid runner configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Script renderer error: {0}")]
    Renderer(#[from] ConfigurationError),

    #[error("Run timed out after {elapsed:?}; unfinished stages: {}", .unfinished.join(", "))]
    Timeout {
        elapsed: Duration,
        unfinished: Vec<String>,
        summary: Box<RunSummary>,
    },
}

/// Final word on a stage that did not succeed.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub state: StageState,
    pub attempts: u32,
    pub diagnostic: String,
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub aborted: usize,
    pub unfinished: usize,
    /// Failed and aborted stages, in topological order.
    pub reports: Vec<StageReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Every stage succeeded.
    pub fn is_success(&self) -> bool {
        self.succeeded == self.total
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stages: {} succeeded, {} failed, {} aborted, {} unfinished ({:.1}s)",
            self.total,
            self.succeeded,
            self.failed,
            self.aborted,
            self.unfinished,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Drives a validated [`PipelineGraph`] to completion on a substrate.
pub struct Runner {
    graph: PipelineGraph,
    order: Vec<StageId>,
    ctx: Arc<RunContext>,
    substrate: Arc<dyn ExecutionSubstrate>,
    config: RunnerConfig,
    renderer: ScriptRenderer,
}

impl Runner {
    /// Validates `graph` and `config` and prepares a run.
    pub fn new(
        graph: PipelineGraph,
        ctx: Arc<RunContext>,
        substrate: Arc<dyn ExecutionSubstrate>,
        config: RunnerConfig,
    ) -> Result<Self, RunError> {
        config.validate()?;
        let order = graph.validate()?;
        Ok(Self {
            graph,
            order,
            ctx,
            substrate,
            config,
            renderer: ScriptRenderer::new()?,
        })
    }

    /// Replaces the default script template.
    pub fn with_renderer(mut self, renderer: ScriptRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    pub fn into_graph(self) -> PipelineGraph {
        self.graph
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Runs until every stage is terminal or the global timeout elapses.
    pub async fn run(&mut self) -> Result<RunSummary, RunError> {
        let start = Instant::now();
        info!(
            run_id = %self.ctx.run_id(),
            sweep = %self.ctx.name(),
            stages = self.graph.len(),
            substrate = %self.substrate.name(),
            "Starting run"
        );

        if self.config.skip_completed {
            self.skip_completed().await;
        }

        loop {
            self.dispatch_phase().await;

            if self.all_terminal() {
                break;
            }

            let elapsed = start.elapsed();
            if elapsed >= self.config.global_timeout {
                return Err(self.timed_out(elapsed).await);
            }

            tokio::time::sleep(self.config.poll_interval).await;
            self.poll_running().await;
        }

        let summary = self.summary(start.elapsed());
        if summary.is_success() {
            info!(summary = %summary, "Run complete");
        } else {
            warn!(summary = %summary, "Run finished with failures");
        }
        Ok(summary)
    }

    /// Aborts `id` and every stage that depends on it, directly or not.
    ///
    /// Running jobs get a best-effort cancel; succeeded stages are left alone.
    pub async fn abort(&mut self, id: StageId) -> Result<(), GraphError> {
        if self.graph.stage(id).is_none() {
            return Err(GraphError::UnknownStage(id.get()));
        }
        for target in self.graph.reachable_from(&[id]) {
            self.abort_one(target, "aborted by operator").await;
        }
        Ok(())
    }

    /// Snapshot of the per-state counts and failures.
    pub fn summary(&self, elapsed: Duration) -> RunSummary {
        let retries = self.config.default_max_retries;
        let mut summary = RunSummary {
            run_id: self.ctx.run_id(),
            total: self.graph.len(),
            succeeded: 0,
            failed: 0,
            aborted: 0,
            unfinished: 0,
            reports: Vec::new(),
            elapsed,
        };
        for id in &self.order {
            let Some(stage) = self.graph.stage(*id) else {
                continue;
            };
            match stage.state() {
                StageState::Succeeded => summary.succeeded += 1,
                StageState::Aborted => summary.aborted += 1,
                StageState::Failed if stage.is_exhausted(retries) => summary.failed += 1,
                _ => summary.unfinished += 1,
            }
            if matches!(stage.state(), StageState::Failed | StageState::Aborted) {
                summary.reports.push(StageReport {
                    stage: stage.name().to_string(),
                    state: stage.state(),
                    attempts: stage.attempts(),
                    diagnostic: stage.last_failure().unwrap_or_default().to_string(),
                });
            }
        }
        summary
    }

    async fn skip_completed(&mut self) {
        for id in self.order.clone() {
            let Some(stage) = self.graph.stage(id) else {
                continue;
            };
            if stage.state() != StageState::Pending
                || stage.always_relaunch()
                || !stage.work().is_external()
            {
                continue;
            }
            let name = stage.name().to_string();
            if self.substrate.prior_success(&name).await {
                info!(stage = %name, "Skipping stage with complete prior output");
                if let Some(stage) = self.graph.stage_mut(id) {
                    stage.cwd = Some(self.ctx.stage_dir(&name));
                    stage.state = StageState::Succeeded;
                }
            }
        }
    }

    /// Aborts, then dispatches until no in-process stage unlocks new work.
    async fn dispatch_phase(&mut self) {
        loop {
            self.propagate_aborts();
            let ready = self.ready_stages();
            if ready.is_empty() {
                return;
            }
            let mut unlocked = 0;
            for id in ready {
                if let Some(stage) = self.graph.stage_mut(id) {
                    stage.state = StageState::Ready;
                    debug!(stage = %stage.name(), "Stage ready");
                }
                if self.dispatch(id).await {
                    unlocked += 1;
                }
            }
            if unlocked == 0 {
                return;
            }
        }
    }

    /// Pending or retryable stages whose prerequisites all succeeded.
    fn ready_stages(&self) -> Vec<StageId> {
        let retries = self.config.default_max_retries;
        self.order
            .iter()
            .copied()
            .filter(|id| {
                let Some(stage) = self.graph.stage(*id) else {
                    return false;
                };
                let eligible = match stage.state() {
                    StageState::Pending => true,
                    StageState::Failed => stage.can_retry(retries),
                    _ => false,
                };
                eligible
                    && stage.prerequisites().iter().all(|p| {
                        self.graph
                            .stage(*p)
                            .map(|s| s.state() == StageState::Succeeded)
                            .unwrap_or(false)
                    })
            })
            .collect()
    }

    /// Marks pending stages behind a dead prerequisite as aborted.
    fn propagate_aborts(&mut self) {
        let retries = self.config.default_max_retries;
        for id in self.order.clone() {
            let blocked_by = {
                let Some(stage) = self.graph.stage(id) else {
                    continue;
                };
                if stage.state() != StageState::Pending {
                    continue;
                }
                stage.prerequisites().iter().find_map(|p| {
                    self.graph.stage(*p).and_then(|s| {
                        let dead = s.state() == StageState::Aborted || s.is_exhausted(retries);
                        dead.then(|| s.name().to_string())
                    })
                })
            };
            if let Some(prerequisite) = blocked_by {
                if let Some(stage) = self.graph.stage_mut(id) {
                    warn!(
                        stage = %stage.name(),
                        prerequisite = %prerequisite,
                        "Stage aborted: prerequisite failed"
                    );
                    stage.state = StageState::Aborted;
                    stage.last_failure = Some(format!("prerequisite '{}' failed", prerequisite));
                }
            }
        }
    }

    /// Starts one ready stage. Returns whether it finished in-process with
    /// success, which may unlock dependents right away.
    async fn dispatch(&mut self, id: StageId) -> bool {
        let Some(stage) = self.graph.stage(id) else {
            return false;
        };
        let name = stage.name().to_string();
        match stage.work().clone() {
            StageWork::Root { .. } => {
                let dir = self.ctx.run_dir();
                if let Some(stage) = self.graph.stage_mut(id) {
                    stage.attempts += 1;
                    stage.cwd = Some(dir);
                    stage.state = StageState::Succeeded;
                }
                info!(stage = %name, "Root stage succeeded");
                true
            }
            StageWork::Scrape(job) => {
                let inputs = self.scrape_inputs(id);
                let stage_dir = self.ctx.stage_dir(&name);
                if let Some(stage) = self.graph.stage_mut(id) {
                    stage.attempts += 1;
                    stage.state = StageState::Running;
                }
                match job.run(&inputs, &stage_dir) {
                    Ok(rows) => {
                        if let Some(stage) = self.graph.stage_mut(id) {
                            stage.cwd = Some(stage_dir);
                            stage.state = StageState::Succeeded;
                        }
                        info!(stage = %name, inputs = inputs.len(), rows, "Scrape stage succeeded");
                        true
                    }
                    Err(failure) => {
                        self.record_failure(id, failure);
                        false
                    }
                }
            }
            work @ (StageWork::Experiment(_) | StageWork::Script { .. }) => {
                self.submit(id, name, work).await;
                false
            }
        }
    }

    /// Freezes the parameters, renders the script and hands it over.
    async fn submit(&mut self, id: StageId, name: String, work: StageWork) {
        let prepared = match &work {
            StageWork::Experiment(snapshot) => snapshot
                .compute_resource_request()
                .and_then(|resources| {
                    let script = self
                        .renderer
                        .render_experiment(&self.ctx, snapshot, &resources)?;
                    Ok((script, resources, Some(snapshot.clone())))
                }),
            StageWork::Script {
                body, resources, ..
            } => self
                .renderer
                .render_body(&self.ctx, &name, resources, body)
                .map(|script| (script, *resources, None)),
            _ => return,
        };

        let attempt = match self.graph.stage_mut(id) {
            Some(stage) => {
                stage.attempts += 1;
                stage.attempts
            }
            None => return,
        };

        let (script, resources, snapshot) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                self.record_failure(id, StageFailure::Configuration(e));
                return;
            }
        };

        let job = JobSubmission {
            stage: name.clone(),
            script,
            resources,
            params: snapshot.as_ref().map(|s| s.params().clone()),
        };

        match self.substrate.submit(job).await {
            Ok(handle) => {
                let cwd = match self.substrate.cwd_of(&handle) {
                    Ok(cwd) => Some(cwd),
                    Err(e) => {
                        warn!(stage = %name, error = %e, "Substrate did not report a working directory");
                        None
                    }
                };
                info!(
                    stage = %name,
                    attempt,
                    handle = %handle,
                    memory_megabytes = resources.memory_megabytes,
                    thread_count = resources.thread_count,
                    wall_clock_minutes = resources.wall_clock_minutes,
                    "Stage submitted"
                );
                if let Some(stage) = self.graph.stage_mut(id) {
                    stage.cwd = cwd;
                    stage.submission = Some(Submission {
                        handle,
                        snapshot,
                        resources,
                    });
                    stage.state = StageState::Running;
                }
            }
            Err(e) => self.record_failure(id, StageFailure::Submission(e)),
        }
    }

    async fn poll_running(&mut self) {
        let running: Vec<StageId> = self
            .order
            .iter()
            .copied()
            .filter(|id| {
                self.graph
                    .stage(*id)
                    .map(|s| s.state() == StageState::Running)
                    .unwrap_or(false)
            })
            .collect();

        for id in running {
            let Some(handle) = self
                .graph
                .stage(id)
                .and_then(|s| s.submission())
                .map(|s| s.handle.clone())
            else {
                continue;
            };
            match self.substrate.poll(&handle).await {
                Ok(JobStatus::Running) => {}
                Ok(JobStatus::Succeeded) => {
                    if let Some(stage) = self.graph.stage_mut(id) {
                        stage.state = StageState::Succeeded;
                        info!(stage = %stage.name(), attempt = stage.attempts(), "Stage succeeded");
                    }
                }
                Ok(JobStatus::Failed {
                    exit_code,
                    diagnostic,
                }) => self.record_failure(
                    id,
                    StageFailure::Execution {
                        exit_code,
                        diagnostic,
                    },
                ),
                Err(e) => self.record_failure(id, StageFailure::Submission(e)),
            }
        }
    }

    fn record_failure(&mut self, id: StageId, failure: StageFailure) {
        let retries = self.config.default_max_retries;
        let Some(stage) = self.graph.stage_mut(id) else {
            return;
        };
        stage.state = StageState::Failed;
        stage.permanent_failure = !failure.is_retryable();
        stage.last_failure = Some(failure.to_string());

        match stage.remaining_retries(retries) {
            Some(0) => error!(
                stage = %stage.name(),
                attempt = stage.attempts(),
                error = %failure,
                "Stage failed, no retries left"
            ),
            remaining => warn!(
                stage = %stage.name(),
                attempt = stage.attempts(),
                remaining = ?remaining,
                error = %failure,
                "Stage failed, will retry"
            ),
        }
    }

    fn scrape_inputs(&self, id: StageId) -> Vec<ScrapeInput> {
        self.graph
            .prerequisites_of(id)
            .into_iter()
            .filter_map(|p| self.graph.stage(p))
            .filter(|s| s.state() == StageState::Succeeded && s.work().is_external())
            .map(|s| {
                let dir = s
                    .cwd()
                    .cloned()
                    .unwrap_or_else(|| self.ctx.stage_dir(s.name()));
                // Stages skipped as complete never submitted in this run, so
                // their parameters (seed included) come from the snapshot on disk.
                let params = match s.submission().and_then(|sub| sub.snapshot.as_ref()) {
                    Some(snapshot) => snapshot.params().clone(),
                    None => match load_params(&dir) {
                        Ok(params) => params,
                        Err(e) => {
                            warn!(
                                stage = %s.name(),
                                dir = %dir.display(),
                                error = %e,
                                "No parameter snapshot, using in-memory parameters"
                            );
                            match s.work() {
                                StageWork::Experiment(exp) => exp.params().clone(),
                                _ => Default::default(),
                            }
                        }
                    },
                };
                ScrapeInput { dir, params }
            })
            .collect()
    }

    async fn abort_one(&mut self, id: StageId, reason: &str) {
        let Some(stage) = self.graph.stage(id) else {
            return;
        };
        if stage.state() == StageState::Succeeded || stage.state() == StageState::Aborted {
            return;
        }
        if stage.state() == StageState::Running {
            if let Some(submission) = stage.submission() {
                if let Err(e) = self.substrate.cancel(&submission.handle).await {
                    warn!(stage = %stage.name(), error = %e, "Cancel request failed");
                }
            }
        }
        if let Some(stage) = self.graph.stage_mut(id) {
            warn!(stage = %stage.name(), reason, "Stage aborted");
            stage.state = StageState::Aborted;
            stage.last_failure = Some(reason.to_string());
        }
    }

    fn all_terminal(&self) -> bool {
        let retries = self.config.default_max_retries;
        self.graph.stages().all(|s| s.is_terminal(retries))
    }

    async fn timed_out(&mut self, elapsed: Duration) -> RunError {
        let retries = self.config.default_max_retries;
        let unfinished: Vec<String> = self
            .graph
            .stages()
            .filter(|s| !s.is_terminal(retries))
            .map(|s| s.name().to_string())
            .collect();

        for stage in self.graph.stages() {
            if stage.state() != StageState::Running {
                continue;
            }
            if let Some(submission) = stage.submission() {
                if let Err(e) = self.substrate.cancel(&submission.handle).await {
                    warn!(stage = %stage.name(), error = %e, "Cancel request failed");
                }
            }
        }

        error!(
            elapsed_secs = elapsed.as_secs(),
            unfinished = unfinished.len(),
            "Run timed out"
        );
        RunError::Timeout {
            elapsed,
            unfinished,
            summary: Box::new(self.summary(elapsed)),
        }
    }
}
