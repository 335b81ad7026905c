//! Per-job completion markers and argument records

use std::path::Path;
use sweeplet_core::{CompletionPolicy, JobSpec, SweepResult};
use tracing::debug;

/// Parameter record written into each runnable job's root folder
pub const ARGUMENTS_FILE: &str = "arguments.txt";
/// Zero-length marker; its presence means the job already ran
pub const FINISHED_MARKER: &str = "state.finished";

/// Reads and writes the on-disk state that makes re-dispatch idempotent
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionTracker {
    policy: CompletionPolicy,
}

impl CompletionTracker {
    pub fn new(policy: CompletionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    pub fn is_finished(&self, root: &Path) -> bool {
        root.join(FINISHED_MARKER).exists()
    }

    /// (Re)write `arguments.txt`, creating the folder if needed
    pub async fn record_arguments(&self, root: &Path, spec: &JobSpec) -> SweepResult<()> {
        tokio::fs::create_dir_all(root).await?;
        tokio::fs::write(root.join(ARGUMENTS_FILE), spec.arguments_record()).await?;
        Ok(())
    }

    pub async fn mark_finished(&self, root: &Path) -> SweepResult<()> {
        tokio::fs::create_dir_all(root).await?;
        tokio::fs::write(root.join(FINISHED_MARKER), b"").await?;
        debug!(root = %root.display(), "Job marked finished");
        Ok(())
    }

    /// Apply the completion policy to an exited job. Returns whether the
    /// marker was written.
    pub async fn on_exit(&self, root: &Path, success: bool) -> SweepResult<bool> {
        if !self.policy.should_mark(success) {
            return Ok(false);
        }
        self.mark_finished(root).await?;
        Ok(true)
    }
}
