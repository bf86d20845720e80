//! Run domain types
//!
//! Describe what happened to each step during one invocation of the engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::log::LogEntry;
use super::target::StepId;

/// Step execution status
///
/// `Pending` and `Running` are transient; every scheduled step ends in one
/// of the four terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    /// Fingerprint matched the cache; nothing was executed
    Skipped,
    Succeeded,
    Failed,
    /// A predecessor failed (or the run was cancelled) before dispatch
    Blocked,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }

    /// Succeeded or Skipped: dependents may proceed
    pub fn is_ok(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "Pending"),
            StepStatus::Running => write!(f, "Running"),
            StepStatus::Skipped => write!(f, "Skipped"),
            StepStatus::Succeeded => write!(f, "Succeeded"),
            StepStatus::Failed => write!(f, "Failed"),
            StepStatus::Blocked => write!(f, "Blocked"),
        }
    }
}

/// Terminal outcome of one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub id: StepId,
    pub status: StepStatus,
    pub fingerprint: Option<String>,
    pub duration: Duration,
    /// Combined stdout/stderr of the step's commands
    pub output: Vec<LogEntry>,
    pub error_message: Option<String>,
}

impl StepOutcome {
    pub fn blocked(id: StepId, reason: impl Into<String>) -> Self {
        Self {
            id,
            status: StepStatus::Blocked,
            fingerprint: None,
            duration: Duration::ZERO,
            output: Vec::new(),
            error_message: Some(reason.into()),
        }
    }

    pub fn skipped(id: StepId, fingerprint: String) -> Self {
        Self {
            id,
            status: StepStatus::Skipped,
            fingerprint: Some(fingerprint),
            duration: Duration::ZERO,
            output: Vec::new(),
            error_message: None,
        }
    }
}

/// Result of one engine invocation
///
/// Outcomes are kept in the order steps reached a terminal state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub outcomes: Vec<StepOutcome>,
}

impl RunReport {
    pub fn push(&mut self, outcome: StepOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn get(&self, id: &StepId) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| &o.id == id)
    }

    pub fn status(&self, id: &StepId) -> Option<StepStatus> {
        self.get(id).map(|o| o.status)
    }

    /// Identifiers of the steps that ended with the given status
    pub fn with_status(&self, status: StepStatus) -> Vec<&StepId> {
        self.outcomes
            .iter()
            .filter(|o| o.status == status)
            .map(|o| &o.id)
            .collect()
    }

    /// True when no step failed or was blocked
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| !matches!(o.status, StepStatus::Failed | StepStatus::Blocked))
    }
}
