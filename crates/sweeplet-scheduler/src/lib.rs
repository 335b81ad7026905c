//! sweeplet-scheduler: Resource-capped sweep dispatch
//!
//! This crate decides when and where each job of a sweep runs:
//! - Per-resource load tracking and admission
//! - Tie-break placement among least-loaded resources
//! - Round locks (marker file or in-process)
//! - Completion markers for idempotent re-dispatch
//! - The bounded worker pool driving one round

pub mod admission;
pub mod completion;
pub mod dispatcher;
pub mod lock;
pub mod placement;

pub use admission::{AdmissionController, Allocation, LoadTable};
pub use completion::CompletionTracker;
pub use dispatcher::{DispatchReport, Dispatcher, JobOutcome, JobState, PreparedJob};
pub use lock::{FileLock, LocalLock, RoundLock};
pub use placement::{FirstTieBreak, PlacementStrategy, RandomTieBreak};
