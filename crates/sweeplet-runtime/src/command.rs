//! Job command construction

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use sweeplet_core::{JobSpec, ParamValue, ResourceId};

/// A fully built job command: program, arguments and environment overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set on the child only
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Same command with `key` set to `value` in the overlay
    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.env.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.env.push((key.to_string(), value)),
        }
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}={} ", key, value)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Comma-separated resource list, as expected by `CUDA_VISIBLE_DEVICES`
pub fn visible_resources(resources: &[ResourceId]) -> String {
    resources
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Turns job specifications into invocations of one script
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    interpreter: String,
    script: PathBuf,
    visibility_env: String,
}

impl CommandBuilder {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            visibility_env: "CUDA_VISIBLE_DEVICES".to_string(),
        }
    }

    pub fn with_visibility_env(mut self, name: impl Into<String>) -> Self {
        self.visibility_env = name.into();
        self
    }

    pub fn visibility_env(&self) -> &str {
        &self.visibility_env
    }

    /// Command-line flags for every bound parameter. Deferred values are
    /// skipped; stored names are decoded back to their original spelling.
    pub fn flags(spec: &JobSpec) -> Vec<String> {
        let mut args = Vec::new();
        for (key, value) in spec.iter() {
            let flag = format!("--{}", key.name());
            match value {
                ParamValue::Flag(true) => args.push(flag),
                ParamValue::Flag(false) | ParamValue::Deferred(_) => {}
                ParamValue::List(items) => {
                    args.push(flag);
                    args.extend(items.iter().cloned());
                }
                ParamValue::Scalar(v) => {
                    args.push(flag);
                    args.push(v.clone());
                }
            }
        }
        args
    }

    /// Invocation without a resource overlay
    pub fn build(&self, spec: &JobSpec) -> Invocation {
        let mut args = vec![self.script.display().to_string()];
        args.extend(Self::flags(spec));
        Invocation {
            program: self.interpreter.clone(),
            args,
            env: Vec::new(),
        }
    }

    /// Invocation restricted to `resources`
    pub fn build_for(&self, spec: &JobSpec, resources: &[ResourceId]) -> Invocation {
        self.restrict(self.build(spec), resources)
    }

    /// Add the visibility overlay to an already built invocation
    pub fn restrict(&self, invocation: Invocation, resources: &[ResourceId]) -> Invocation {
        invocation.with_env(&self.visibility_env, visible_resources(resources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> JobSpec {
        let mut spec = JobSpec::new();
        spec.bind("lr", ParamValue::scalar(0.001)).unwrap();
        spec.bind("lr_decay_at", ParamValue::list([82, 123])).unwrap();
        spec.bind("resume", ParamValue::Flag(true)).unwrap();
        spec.bind("amp", ParamValue::Flag(false)).unwrap();
        spec.bind("log_dir", ParamValue::text("{root}/logs")).unwrap();
        spec
    }

    #[test]
    fn test_flags() {
        assert_eq!(
            CommandBuilder::flags(&spec()),
            vec!["--lr", "0.001", "--lr_decay_at", "82", "123", "--resume"]
        );
    }

    #[test]
    fn test_escaped_name_round_trips() {
        let mut spec = JobSpec::new();
        spec.bind("lr.warmup", ParamValue::scalar(500)).unwrap();
        let key = spec.iter().next().unwrap().0.clone();
        assert_eq!(key.escaped(), "lr_dwarmup");

        let builder = CommandBuilder::new("python", "train.py");
        assert_eq!(
            builder.build(&spec).to_string(),
            "python train.py --lr.warmup 500"
        );
    }

    #[test]
    fn test_build_for_single_resource() {
        let builder = CommandBuilder::new("python", "main.py");
        let invocation = builder.build_for(&spec(), &[3]);
        assert_eq!(
            invocation.env,
            vec![("CUDA_VISIBLE_DEVICES".to_string(), "3".to_string())]
        );
        assert_eq!(
            invocation.to_string(),
            "CUDA_VISIBLE_DEVICES=3 python main.py --lr 0.001 --lr_decay_at 82 123 --resume"
        );
    }

    #[test]
    fn test_build_for_resource_set() {
        let builder = CommandBuilder::new("python3", "main.py").with_visibility_env("HIP_VISIBLE_DEVICES");
        let invocation = builder.build_for(&JobSpec::new(), &[0, 1, 2]);
        assert_eq!(invocation.to_string(), "HIP_VISIBLE_DEVICES=0,1,2 python3 main.py");
    }

    #[test]
    fn test_restrict_replaces_overlay() {
        let builder = CommandBuilder::new("python", "main.py");
        let invocation = builder.build_for(&JobSpec::new(), &[0]);
        let invocation = builder.restrict(invocation, &[1]);
        assert_eq!(invocation.env.len(), 1);
        assert_eq!(invocation.env[0].1, "1");
    }
}
