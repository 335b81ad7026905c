//! Sweep dispatch: expansion, filtering and the bounded worker pool

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sweeplet_core::template;
use sweeplet_core::{
    JobSpec, LockBackend, ParamValue, ResourceId, SchedulingPolicy, SweepConfig, SweepResult,
};
use sweeplet_runtime::process::wait_for_processes;
use sweeplet_runtime::{CommandBuilder, Invocation, JobLaunch, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::completion::CompletionTracker;
use crate::lock::{FileLock, LocalLock, RoundLock};
use crate::placement::{PlacementStrategy, RandomTieBreak};

/// Lifecycle of one job within a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Generated, completion not checked yet
    Pending,
    /// Completion marker already present
    Skipped,
    /// Waiting for a pool slot
    Queued,
    /// In the admission loop
    WaitingForResource,
    /// Process running
    Running,
    /// Process exited
    Finished,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "Pending"),
            JobState::Skipped => write!(f, "Skipped"),
            JobState::Queued => write!(f, "Queued"),
            JobState::WaitingForResource => write!(f, "WaitingForResource"),
            JobState::Running => write!(f, "Running"),
            JobState::Finished => write!(f, "Finished"),
        }
    }
}

/// A job with its templates resolved and its command built
#[derive(Debug, Clone)]
pub struct PreparedJob {
    /// Position in grid order
    pub index: usize,
    pub name: String,
    pub root: PathBuf,
    pub spec: JobSpec,
    /// Command without the resource overlay
    pub invocation: Invocation,
    pub state: JobState,
}

/// What happened to one runnable job
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub index: usize,
    pub name: String,
    pub root: PathBuf,
    pub state: JobState,
    /// Resources the job was restricted to
    pub resources: Vec<ResourceId>,
    /// Whether the process was spawned
    pub launched: bool,
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Whether the completion marker was written
    pub marked: bool,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobOutcome {
    fn queued(job: &PreparedJob) -> Self {
        Self {
            index: job.index,
            name: job.name.clone(),
            root: job.root.clone(),
            state: JobState::Queued,
            resources: Vec::new(),
            launched: false,
            exit_code: None,
            success: false,
            marked: false,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Summary of one dispatch round
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub run_id: Uuid,
    /// Jobs generated from the grid
    pub total: usize,
    /// Jobs without a completion marker
    pub runnable: usize,
    /// Jobs skipped because they already finished
    pub finished: usize,
    pub pool_size: usize,
    pub debug: bool,
    /// Expanded commands of the runnable jobs (debug mode only)
    pub commands: Vec<String>,
    /// Per-job results, in grid order
    pub outcomes: Vec<JobOutcome>,
}

impl DispatchReport {
    pub fn launched(&self) -> usize {
        self.outcomes.iter().filter(|o| o.launched).count()
    }

    /// Jobs whose process exited with a non-zero status or never started
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }
}

/// Everything a worker task needs, shared across the pool
struct WorkerContext {
    admission: AdmissionController,
    runtime: Arc<dyn Runtime>,
    tracker: CompletionTracker,
    builder: CommandBuilder,
    permits: Semaphore,
}

/// Dispatcher runs one sweep round
pub struct Dispatcher {
    config: SweepConfig,
    runtime: Arc<dyn Runtime>,
    placement: Arc<dyn PlacementStrategy>,
    run_id: Uuid,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(config: SweepConfig, runtime: Arc<dyn Runtime>) -> Self {
        let run_id = Uuid::new_v4();

        info!(
            run_id = %run_id,
            runtime = runtime.name(),
            script = %config.sweep.script.display(),
            "Dispatcher initialized"
        );

        Self {
            config,
            runtime,
            placement: Arc::new(RandomTieBreak),
            run_id,
        }
    }

    pub fn with_placement(mut self, placement: Arc<dyn PlacementStrategy>) -> Self {
        self.placement = placement;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    fn builder(&self) -> CommandBuilder {
        CommandBuilder::new(&self.config.sweep.interpreter, &self.config.sweep.script)
            .with_visibility_env(&self.config.dispatch.visibility_env)
    }

    fn tracker(&self) -> CompletionTracker {
        CompletionTracker::new(self.config.dispatch.completion)
    }

    /// Lock guarding this round's load table
    pub fn lock_for_round(&self) -> Arc<dyn RoundLock> {
        let dispatch = &self.config.dispatch;
        match dispatch.lock {
            LockBackend::File => Arc::new(FileLock::for_round(
                &dispatch.lock_dir,
                &self.run_id,
                dispatch.lock_poll(),
            )),
            LockBackend::Local => Arc::new(LocalLock::new()),
        }
    }

    /// Expand the grid and resolve every job, classifying each as skipped
    /// or queued. Touches nothing on disk.
    pub fn prepare(&self) -> SweepResult<Vec<PreparedJob>> {
        let settings = &self.config.sweep;
        let mut grid = self.config.grid()?;
        grid.dedup();
        let defaults = self.config.defaults()?;
        let builder = self.builder();
        let tracker = self.tracker();

        let mut jobs = Vec::with_capacity(grid.job_count());
        for (index, point) in grid.expand().into_iter().enumerate() {
            let mut spec = defaults.clone();
            for (name, value) in point {
                spec.bind(&name, value)?;
            }

            let folder = template::resolve(&settings.folder, &spec);
            let name = template::resolve(&settings.name, &spec);
            if template::has_placeholders(&folder) || template::has_placeholders(&name) {
                warn!(
                    job = %name,
                    folder = %folder,
                    "Job name or folder references unbound parameters"
                );
            }
            let root = settings.base_dir.join(&folder).join(&name);

            if let Some(param) = &settings.root_param {
                spec.bind(param, ParamValue::Scalar(root.display().to_string()))?;
            }
            let unresolved = template::resolve_deferred(&mut spec);
            if !unresolved.is_empty() {
                warn!(
                    job = %name,
                    params = ?unresolved,
                    "Parameters left unresolved and will not be passed"
                );
            }

            let invocation = builder.build(&spec);
            let state = if tracker.is_finished(&root) {
                JobState::Skipped
            } else {
                JobState::Queued
            };
            debug!(job = %name, state = %state, "Job prepared");

            jobs.push(PreparedJob {
                index,
                name,
                root,
                spec,
                invocation,
                state,
            });
        }

        Ok(jobs)
    }

    /// Command as shown in debug mode. Non-distributed jobs list every
    /// resource they may be placed on.
    fn display_command(&self, policy: &SchedulingPolicy, job: &PreparedJob) -> String {
        let builder = self.builder();
        if policy.distributed {
            builder.restrict(job.invocation.clone(), &policy.resources).to_string()
        } else {
            let candidates = policy
                .resources
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join("|");
            job.invocation
                .clone()
                .with_env(builder.visibility_env(), candidates)
                .to_string()
        }
    }

    /// Run one round: every runnable job is launched once admission allows.
    pub async fn dispatch(&self) -> SweepResult<DispatchReport> {
        let settings = &self.config.sweep;
        let dispatch = &self.config.dispatch;

        let policy = self.config.scheduling.policy()?;
        let pool_size = policy.pool_size();

        let jobs = self.prepare()?;
        let total = jobs.len();
        let (skipped, runnable): (Vec<PreparedJob>, Vec<PreparedJob>) = jobs
            .into_iter()
            .partition(|j| j.state == JobState::Skipped);

        info!(
            run_id = %self.run_id,
            runnable = runnable.len(),
            finished = skipped.len(),
            total = total,
            pool_size = pool_size,
            "Sweep prepared"
        );

        let mut report = DispatchReport {
            run_id: self.run_id,
            total,
            runnable: runnable.len(),
            finished: skipped.len(),
            pool_size,
            debug: settings.debug,
            commands: Vec::new(),
            outcomes: Vec::new(),
        };

        if settings.debug {
            report.commands = runnable
                .iter()
                .map(|job| self.display_command(&policy, job))
                .collect();
            return Ok(report);
        }

        let tracker = self.tracker();
        for job in &runnable {
            tracker.record_arguments(&job.root, &job.spec).await?;
        }

        if !settings.wait_for_pids.is_empty() {
            wait_for_processes(&settings.wait_for_pids, dispatch.pid_poll()).await;
        }

        if !dispatch.grace().is_zero() {
            info!(grace_secs = dispatch.grace_secs, "Starting shortly, interrupt to abort");
            tokio::time::sleep(dispatch.grace()).await;
        }

        if dispatch.lock == LockBackend::File {
            tokio::fs::create_dir_all(&dispatch.lock_dir).await?;
        }
        let lock = self.lock_for_round();
        lock.force_release()?;

        let admission = AdmissionController::new(policy, lock)
            .with_placement(self.placement.clone())
            .with_backoff(dispatch.admission_backoff())
            .with_strict(dispatch.strict_admission);

        let context = Arc::new(WorkerContext {
            admission,
            runtime: self.runtime.clone(),
            tracker,
            builder: self.builder(),
            permits: Semaphore::new(pool_size),
        });

        let round_start = Instant::now();
        let stagger = dispatch.stagger();
        let mut workers = JoinSet::new();
        for (position, job) in runnable.into_iter().enumerate() {
            let start_at = round_start + stagger_offset(stagger, position);
            workers.spawn(run_job(context.clone(), job, start_at));
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }
        report.outcomes.sort_by_key(|o| o.index);

        info!(
            run_id = %self.run_id,
            runnable = report.runnable,
            finished = report.finished,
            total = report.total,
            launched = report.launched(),
            failed = report.failed(),
            "Sweep round complete"
        );

        Ok(report)
    }
}

/// One worker: pool slot, stagger, admission, process, marker, release
async fn run_job(context: Arc<WorkerContext>, job: PreparedJob, start_at: Instant) -> JobOutcome {
    let mut outcome = JobOutcome::queued(&job);

    let _permit = match context.permits.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            outcome.error = Some(format!("worker pool closed: {}", e));
            return outcome;
        }
    };
    tokio::time::sleep_until(start_at).await;

    if !context.admission.policy().distributed {
        outcome.state = JobState::WaitingForResource;
    }
    debug!(job = %job.name, state = %outcome.state, "Requesting resources");
    let allocation = match context.admission.allocate().await {
        Ok(allocation) => allocation,
        Err(e) => {
            error!(job = %job.name, error = %e, "Admission failed");
            outcome.error = Some(e.to_string());
            return outcome;
        }
    };
    outcome.resources = allocation.resources();

    let launch = JobLaunch {
        name: job.name.clone(),
        root: job.root.clone(),
        invocation: context
            .builder
            .restrict(job.invocation.clone(), &outcome.resources),
    };

    outcome.state = JobState::Running;
    outcome.started_at = Some(Utc::now());
    info!(job = %job.name, resources = ?outcome.resources, "Launching job");
    debug!(job = %job.name, command = %launch.invocation, "Job command");

    match context.runtime.run(&launch).await {
        Ok(exit) => {
            outcome.launched = true;
            outcome.exit_code = exit.code;
            outcome.success = exit.success();
            if !outcome.success {
                warn!(job = %job.name, code = ?exit.code, "Job exited with failure");
            }
            match context.tracker.on_exit(&job.root, outcome.success).await {
                Ok(marked) => outcome.marked = marked,
                Err(e) => {
                    error!(job = %job.name, error = %e, "Failed to write completion marker");
                    outcome.error = Some(e.to_string());
                }
            }
        }
        Err(e) => {
            error!(job = %job.name, error = %e, "Job could not be run");
            outcome.error = Some(e.to_string());
        }
    }
    outcome.finished_at = Some(Utc::now());
    outcome.state = JobState::Finished;

    if let Err(e) = context.admission.release(&allocation).await {
        error!(job = %job.name, error = %e, "Failed to release resources");
    }

    info!(job = %job.name, marked = outcome.marked, "Job finished");
    outcome
}

/// Stagger offset for the job at `position` in the runnable list
pub fn stagger_offset(stagger: Duration, position: usize) -> Duration {
    stagger.saturating_mul(position as u32)
}
