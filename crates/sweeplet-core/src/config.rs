//! Configuration types for sweeplet

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SweepError, SweepResult};
use crate::grid::ParameterGrid;
use crate::param::JobSpec;

/// Compute resource identifier (GPU index)
pub type ResourceId = u32;

/// A sweep file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// What to launch and where to put each job
    pub sweep: SweepSettings,
    /// Resource policy; every key is required at dispatch time
    #[serde(default)]
    pub scheduling: SchedulingSettings,
    /// Shared base parameters
    #[serde(default)]
    pub defaults: toml::Table,
    /// Candidate values per swept parameter
    #[serde(default)]
    pub grid: toml::Table,
    /// Dispatch timing and coordination options
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SweepConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> SweepResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SweepError::Config(format!("Failed to read sweep file {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> SweepResult<Self> {
        toml::from_str(content)
            .map_err(|e| SweepError::Config(format!("Failed to parse sweep file: {}", e)))
    }

    /// The `[grid]` table as a parameter grid
    pub fn grid(&self) -> SweepResult<ParameterGrid> {
        ParameterGrid::from_toml(&self.grid)
    }

    /// The `[defaults]` table as the base job specification
    pub fn defaults(&self) -> SweepResult<JobSpec> {
        JobSpec::from_toml(&self.defaults)
    }
}

/// Program and layout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Interpreter used to run the script
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Script handed to the interpreter
    pub script: PathBuf,
    /// Directory under which job folders are created
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Folder template, relative to `base_dir`
    #[serde(default)]
    pub folder: String,
    /// Job name template; the last path component of each job root
    pub name: String,
    /// Parameter that receives the job root folder path
    #[serde(default)]
    pub root_param: Option<String>,
    /// Processes that must exit before the round starts
    #[serde(default)]
    pub wait_for_pids: Vec<u32>,
    /// Only print the expanded commands
    #[serde(default)]
    pub debug: bool,
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

impl SweepSettings {
    pub fn new(script: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            interpreter: default_interpreter(),
            script: script.into(),
            base_dir: default_base_dir(),
            folder: String::new(),
            name: name.into(),
            root_param: None,
            wait_for_pids: Vec::new(),
            debug: false,
        }
    }
}

/// Raw `[scheduling]` section; keys stay optional so that a missing one is
/// reported as a configuration error by the dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulingSettings {
    pub resources: Option<Vec<ResourceId>>,
    pub max_jobs_per_resource: Option<u32>,
    pub distributed: Option<bool>,
}

impl SchedulingSettings {
    /// Check that every key is present and build the validated policy
    pub fn policy(&self) -> SweepResult<SchedulingPolicy> {
        let missing = |key: &str| {
            SweepError::Config(format!("missing required scheduling key: {}", key))
        };
        let policy = SchedulingPolicy {
            resources: self.resources.clone().ok_or_else(|| missing("resources"))?,
            max_jobs_per_resource: self
                .max_jobs_per_resource
                .ok_or_else(|| missing("max_jobs_per_resource"))?,
            distributed: self.distributed.ok_or_else(|| missing("distributed"))?,
        };
        policy.validate()?;
        Ok(policy)
    }
}

impl From<SchedulingPolicy> for SchedulingSettings {
    fn from(policy: SchedulingPolicy) -> Self {
        Self {
            resources: Some(policy.resources),
            max_jobs_per_resource: Some(policy.max_jobs_per_resource),
            distributed: Some(policy.distributed),
        }
    }
}

/// How jobs share the configured resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingPolicy {
    /// Ordered, unique resource ids
    pub resources: Vec<ResourceId>,
    /// Concurrent jobs per resource (or concurrent full-set jobs when distributed)
    pub max_jobs_per_resource: u32,
    /// One job spans the whole resource set
    pub distributed: bool,
}

impl SchedulingPolicy {
    pub fn new(resources: Vec<ResourceId>, max_jobs_per_resource: u32, distributed: bool) -> Self {
        Self {
            resources,
            max_jobs_per_resource,
            distributed,
        }
    }

    pub fn validate(&self) -> SweepResult<()> {
        if self.resources.is_empty() {
            return Err(SweepError::Config(
                "scheduling.resources must name at least one resource".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.resources.iter().find(|r| !seen.insert(**r)) {
            return Err(SweepError::Config(format!(
                "scheduling.resources lists resource {} twice",
                dup
            )));
        }
        if self.max_jobs_per_resource == 0 {
            return Err(SweepError::Config(
                "scheduling.max_jobs_per_resource must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of concurrent workers for one round
    pub fn pool_size(&self) -> usize {
        if self.distributed {
            self.max_jobs_per_resource as usize
        } else {
            self.resources.len() * self.max_jobs_per_resource as usize
        }
    }
}

/// Mutual-exclusion backend for one dispatch round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    /// Marker file, excludes independent processes sharing `lock_dir`
    #[default]
    File,
    /// In-process lock, for rounds whose workers share one process
    Local,
}

/// When a finished process gets its completion marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Mark on any exit status
    #[default]
    Always,
    /// Mark only on exit status zero; failed jobs run again next round
    SuccessOnly,
}

impl CompletionPolicy {
    pub fn should_mark(&self, success: bool) -> bool {
        match self {
            CompletionPolicy::Always => true,
            CompletionPolicy::SuccessOnly => success,
        }
    }
}

/// `[dispatch]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Pause between the summary and the first launch
    pub grace_secs: u64,
    /// Start offset per runnable position
    pub stagger_ms: u64,
    /// Upper bound on a saturated admission wait
    pub admission_backoff_secs: u64,
    /// Lock marker poll interval
    pub lock_poll_ms: u64,
    /// Poll interval for `wait_for_pids`
    pub pid_poll_secs: u64,
    pub lock: LockBackend,
    /// Directory holding lock markers
    pub lock_dir: PathBuf,
    pub completion: CompletionPolicy,
    /// Check capacity again inside the critical section
    pub strict_admission: bool,
    /// Variable restricting visible resources for each job
    pub visibility_env: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            grace_secs: 5,
            stagger_ms: 1000,
            admission_backoff_secs: 60,
            lock_poll_ms: 10,
            pid_poll_secs: 60,
            lock: LockBackend::File,
            lock_dir: PathBuf::from("."),
            completion: CompletionPolicy::Always,
            strict_admission: true,
            visibility_env: "CUDA_VISIBLE_DEVICES".to_string(),
        }
    }
}

impl DispatchSettings {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn admission_backoff(&self) -> Duration {
        Duration::from_secs(self.admission_backoff_secs)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }

    pub fn pid_poll(&self) -> Duration {
        Duration::from_secs(self.pid_poll_secs)
    }

    /// Settings with every delay set to zero, for tests and dry runs
    pub fn immediate() -> Self {
        Self {
            grace_secs: 0,
            stagger_ms: 0,
            lock_poll_ms: 1,
            pid_poll_secs: 0,
            ..Self::default()
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ParamValue;

    const SWEEP: &str = r#"
[sweep]
script = "train.py"
base_dir = "/tmp/exp"
folder = "cifar10/{optim}"
name = "optim={optim}-seed={seed}"
root_param = "root_folder"

[scheduling]
resources = [0, 1]
max_jobs_per_resource = 2
distributed = false

[defaults]
lr = 0.001
resume = true

[grid]
optim = ["sgd", "adam"]
seed = [0, 1, 2]

[dispatch]
grace_secs = 0
lock = "local"
completion = "success_only"
"#;

    #[test]
    fn test_parse_sweep_file() {
        let config = SweepConfig::parse(SWEEP).unwrap();
        assert_eq!(config.sweep.interpreter, "python");
        assert_eq!(config.sweep.root_param.as_deref(), Some("root_folder"));
        assert_eq!(config.dispatch.lock, LockBackend::Local);
        assert_eq!(config.dispatch.completion, CompletionPolicy::SuccessOnly);
        assert_eq!(config.dispatch.stagger_ms, 1000);
        assert_eq!(config.logging.level, "info");

        let grid = config.grid().unwrap();
        assert_eq!(grid.job_count(), 6);

        let defaults = config.defaults().unwrap();
        assert_eq!(defaults.get("resume"), Some(&ParamValue::Flag(true)));
    }

    #[test]
    fn test_policy_from_settings() {
        let config = SweepConfig::parse(SWEEP).unwrap();
        let policy = config.scheduling.policy().unwrap();
        assert_eq!(policy.resources, vec![0, 1]);
        assert_eq!(policy.pool_size(), 4);
    }

    #[test]
    fn test_missing_scheduling_key() {
        let settings = SchedulingSettings {
            resources: Some(vec![0]),
            max_jobs_per_resource: None,
            distributed: Some(false),
        };
        let err = settings.policy().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: missing required scheduling key: max_jobs_per_resource"
        );
    }

    #[test]
    fn test_policy_validation() {
        assert!(SchedulingPolicy::new(vec![], 1, false).validate().is_err());
        assert!(SchedulingPolicy::new(vec![0, 0], 1, false).validate().is_err());
        assert!(SchedulingPolicy::new(vec![0], 0, false).validate().is_err());
        assert!(SchedulingPolicy::new(vec![3, 1], 1, true).validate().is_ok());
    }

    #[test]
    fn test_pool_size() {
        assert_eq!(SchedulingPolicy::new(vec![0, 1, 2], 2, false).pool_size(), 6);
        assert_eq!(SchedulingPolicy::new(vec![0, 1, 2], 2, true).pool_size(), 2);
    }

    #[test]
    fn test_completion_policy() {
        assert!(CompletionPolicy::Always.should_mark(false));
        assert!(!CompletionPolicy::SuccessOnly.should_mark(false));
        assert!(CompletionPolicy::SuccessOnly.should_mark(true));
    }

    #[test]
    fn test_missing_file() {
        let err = SweepConfig::from_file(Path::new("/nonexistent/sweep.toml")).unwrap_err();
        assert!(matches!(err, SweepError::Config(_)));
    }
}
