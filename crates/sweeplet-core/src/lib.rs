//! sweeplet-core: Core types for the sweeplet dispatcher
//!
//! This crate provides the fundamental types used throughout sweeplet:
//! - Parameter names, tagged values and job specifications
//! - Parameter grid expansion
//! - Placeholder templates
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod grid;
pub mod param;
pub mod template;

pub use config::*;
pub use error::*;
pub use grid::{GridPoint, ParameterGrid};
pub use param::{JobSpec, ParamKey, ParamValue};
