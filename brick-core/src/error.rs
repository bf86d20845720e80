//! Error types shared by the Brick crates

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::target::StepId;

/// Result type alias for Brick operations
pub type Result<T> = std::result::Result<T, BrickError>;

/// Errors that can occur while loading, planning or running a build
#[derive(Debug, Error)]
pub enum BrickError {
    /// Missing workspace marker, missing or malformed descriptor, duplicate names
    #[error("Configuration error: {0}")]
    Config(String),

    /// The inferred dependency graph contains a cycle
    #[error("Dependency cycle detected: {}", format_cycle(.cycle))]
    Cycle {
        /// Steps along the cycle, first step repeated at the end
        cycle: Vec<StepId>,
    },

    /// A declared input could not be read while fingerprinting
    #[error("I/O error on {}: {message}", .path.display())]
    Io {
        path: PathBuf,
        message: String,
    },

    /// A step's commands could not be run or exited non-zero
    #[error("Step {id} failed: {message}")]
    StepExecution {
        id: StepId,
        message: String,
        exit_code: Option<i32>,
    },

    /// The cache store could not be read or written
    #[error("Cache error: {0}")]
    Cache(String),
}

impl BrickError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an I/O error for the given path
    pub fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// True for errors that abort the invocation before any step runs
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Cycle { .. })
    }
}

fn format_cycle(cycle: &[StepId]) -> String {
    cycle
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
