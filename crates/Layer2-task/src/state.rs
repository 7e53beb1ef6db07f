//! Terminal task outcomes

use serde::{Deserialize, Serialize};

/// How a task ended. Every submitted task produces exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskOutcome<T> {
    /// Work finished within its deadline
    Completed(T),

    /// Work returned an error or panicked
    Failed(String),

    /// Deadline passed before the work finished
    TimedOut,
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, TaskOutcome::TimedOut)
    }

    /// Value of a completed task
    pub fn completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// Error message of a failed task
    pub fn error(&self) -> Option<&str> {
        match self {
            TaskOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }

    /// Get display name for the outcome
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskOutcome::Completed(_) => "Completed",
            TaskOutcome::Failed(_) => "Failed",
            TaskOutcome::TimedOut => "TimedOut",
        }
    }
}

impl<T> std::fmt::Display for TaskOutcome<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Failed(message) => write!(f, "Failed: {}", message),
            other => write!(f, "{}", other.display_name()),
        }
    }
}
