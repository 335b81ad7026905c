//! sweeplet-runtime: Command building and job launching
//!
//! This crate turns job specifications into commands and runs them:
//! - Flag serialization and resource visibility overlay
//! - Process-based runtime
//! - Waiting on unrelated processes before a round starts

pub mod command;
pub mod process;
pub mod traits;

pub use command::{CommandBuilder, Invocation};
pub use process::{ProcessRuntime, ProcessRuntimeConfig};
pub use traits::{JobExit, JobLaunch, Runtime};
