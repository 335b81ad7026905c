//! Runtime trait definitions

use async_trait::async_trait;
use std::path::PathBuf;
use sweeplet_core::SweepResult;

use crate::command::Invocation;

/// A job ready to be launched on its allocated resources
#[derive(Debug, Clone)]
pub struct JobLaunch {
    /// Job name
    pub name: String,
    /// Job root folder
    pub root: PathBuf,
    /// Command including the resource overlay
    pub invocation: Invocation,
}

/// How a job process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobExit {
    /// Process ID, if the runtime knows it
    pub pid: Option<u32>,
    /// Exit code; `None` when the process was killed by a signal
    pub code: Option<i32>,
}

impl JobExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runtime trait for running sweep jobs
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Run a job and wait for it to exit
    async fn run(&self, job: &JobLaunch) -> SweepResult<JobExit>;

    /// Get the runtime name
    fn name(&self) -> &'static str;
}
