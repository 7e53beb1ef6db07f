//! Task definition and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A unit of asynchronous work submitted to the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// What the task acts on (a batch label, a cm handle id, ...)
    pub target: String,

    /// Operation name, used in logs
    pub operation: String,

    /// Hard timeout; `None` uses the executor default
    pub timeout: Option<Duration>,

    /// When the task was created
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task
    pub fn new(target: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            target: target.into(),
            operation: operation.into(),
            timeout: None,
            created_at: Utc::now(),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Effective timeout given the executor default
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{} {}]", self.id, self.operation, self.target)
    }
}
