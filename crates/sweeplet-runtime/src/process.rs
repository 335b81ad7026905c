//! Process-based runtime implementation
//!
//! Each job runs as a direct OS child process. The resource overlay is applied
//! to the child's environment only.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::process::Stdio;
use std::time::Duration;
use sweeplet_core::{SweepError, SweepResult};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::traits::{JobExit, JobLaunch, Runtime};

/// Process-based runtime configuration
#[derive(Debug, Clone)]
pub struct ProcessRuntimeConfig {
    /// Append job stdout/stderr to a file in the job root
    pub capture_output: bool,
    /// Name of that file
    pub output_file: String,
}

impl Default for ProcessRuntimeConfig {
    fn default() -> Self {
        Self {
            capture_output: true,
            output_file: "output.log".to_string(),
        }
    }
}

/// Process-based runtime for sweep jobs
pub struct ProcessRuntime {
    config: ProcessRuntimeConfig,
}

impl ProcessRuntime {
    /// Create a new process runtime
    pub fn new(config: ProcessRuntimeConfig) -> Self {
        Self { config }
    }

    /// Build the command to start a job
    fn build_command(&self, job: &JobLaunch) -> SweepResult<Command> {
        let mut cmd = Command::new(&job.invocation.program);
        cmd.args(&job.invocation.args);
        cmd.envs(job.invocation.env.iter().map(|(k, v)| (k, v)));
        cmd.stdin(Stdio::null());
        // Children outlive an interrupted coordinator
        cmd.kill_on_drop(false);

        if self.config.capture_output {
            std::fs::create_dir_all(&job.root)?;
            let log = OpenOptions::new()
                .create(true)
                .append(true)
                .open(job.root.join(&self.config.output_file))?;
            cmd.stdout(Stdio::from(log.try_clone()?));
            cmd.stderr(Stdio::from(log));
        }

        Ok(cmd)
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new(ProcessRuntimeConfig::default())
    }
}

#[async_trait]
impl Runtime for ProcessRuntime {
    async fn run(&self, job: &JobLaunch) -> SweepResult<JobExit> {
        let mut cmd = self.build_command(job)?;

        let mut child = cmd.spawn().map_err(|e| {
            error!(job = %job.name, error = %e, "Failed to spawn job process");
            SweepError::Runtime(format!("Failed to spawn {}: {}", job.invocation.program, e))
        })?;

        let pid = child.id();
        info!(job = %job.name, pid = ?pid, "Job process started");

        let status = child.wait().await.map_err(|e| {
            SweepError::Runtime(format!("Failed to wait for job {}: {}", job.name, e))
        })?;

        debug!(job = %job.name, status = %status, "Job process exited");

        Ok(JobExit {
            pid,
            code: status.code(),
        })
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Check whether a process with `pid` exists
pub async fn process_exists(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let output = Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match output {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    #[cfg(windows)]
    {
        let output = Command::new("tasklist")
            .arg("/FI")
            .arg(format!("PID eq {}", pid))
            .output()
            .await;

        match output {
            Ok(o) => String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()),
            Err(_) => false,
        }
    }
}

/// Block until none of `pids` is alive, checking every `poll`
pub async fn wait_for_processes(pids: &[u32], poll: Duration) {
    let mut attempt = 1u32;
    loop {
        let mut alive = Vec::new();
        for &pid in pids {
            if process_exists(pid).await {
                alive.push(pid);
            }
        }
        if alive.is_empty() {
            return;
        }

        info!(
            attempt = attempt,
            pids = ?alive,
            wait_secs = poll.as_secs(),
            "Waiting for processes to exit"
        );
        attempt += 1;
        tokio::time::sleep(poll).await;
    }
}
