//! Brick Core
//!
//! Core types and abstractions for the Brick monorepo build tool.
//!
//! This crate contains:
//! - Domain types: Targets, Steps and the identifiers that key them
//! - Run types: per-step status and the report of one invocation
//! - Errors: the error taxonomy shared by every Brick crate

pub mod domain;
pub mod error;

pub use domain::log::{LogEntry, LogLevel};
pub use domain::run::{RunReport, StepOutcome, StepStatus};
pub use domain::target::{Step, StepId, Target};
pub use error::{BrickError, Result};

/// Name of the descriptor file that declares a target
pub const DESCRIPTOR_FILE: &str = "BUILD.yaml";

/// Name of the marker file at the root of a workspace
pub const WORKSPACE_MARKER: &str = "WORKSPACE";

/// Directory (relative to the workspace root) holding Brick's local state
pub const STATE_DIR: &str = ".brick";
