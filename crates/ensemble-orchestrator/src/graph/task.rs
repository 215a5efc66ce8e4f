//! Tasks and their terminal outcomes.

use crate::agents::Agent;
use ensemble_abstraction::FAILURE_MARKER;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Result text recorded for tasks a fail-fast run never reached.
pub const NOT_EXECUTED: &str = "Error: task not executed";

/// A unit of work assigned to an agent.
///
/// The description is the task's identity key; dependencies are named by
/// description.
#[derive(Clone)]
pub struct Task {
    /// Identity key and the input handed to the agent.
    pub description: String,
    /// The agent that executes the task.
    pub agent: Arc<dyn Agent>,
    /// Informational only; has no effect on scheduling.
    pub priority: i32,
    /// Descriptions of the tasks this one depends on.
    pub depends_on: Vec<String>,
    /// Needs the shared actuator lease while running.
    pub exclusive: bool,
}

impl Task {
    /// Creates a task with no dependencies.
    pub fn new(description: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self {
            description: description.into(),
            agent,
            priority: 0,
            depends_on: Vec::new(),
            exclusive: false,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a dependency by description.
    #[must_use]
    pub fn depends_on(mut self, description: impl Into<String>) -> Self {
        self.depends_on.push(description.into());
        self
    }

    /// Marks the task as needing the shared actuator lease.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("description", &self.description)
            .field("agent", &self.agent.id())
            .field("priority", &self.priority)
            .field("depends_on", &self.depends_on)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

/// Lifecycle state of a task within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet started.
    Pending,
    /// The agent is running.
    Executing,
    /// The agent returned a non-error result.
    Succeeded,
    /// The agent failed or returned failure-marked text.
    Failed,
    /// A dependency failed; the agent was never invoked.
    Skipped,
}

/// Terminal result of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The agent's output.
    Succeeded {
        /// Output text.
        output: String,
    },
    /// The agent's failure, always failure-marked.
    Failed {
        /// Failure text.
        error: String,
    },
    /// Skipped because dependencies failed.
    Skipped {
        /// Descriptions of the failed dependencies.
        failed_dependencies: Vec<String>,
        /// Failure text naming the dependencies and carrying their failures.
        error: String,
    },
    /// Never reached because a fail-fast run stopped first.
    NotExecuted,
}

impl TaskOutcome {
    pub(crate) fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        let error = if ensemble_abstraction::is_failure_text(&message) {
            message
        } else {
            format!("{FAILURE_MARKER} executing task: {message}")
        };
        Self::Failed { error }
    }

    pub(crate) fn skipped(failures: Vec<(String, String)>) -> Self {
        let names: Vec<String> = failures.iter().map(|(name, _)| name.clone()).collect();
        let details: Vec<String> =
            failures.iter().map(|(name, error)| format!("'{name}': {error}")).collect();
        let error = format!(
            "{FAILURE_MARKER}: skipped because dependencies failed: [{}] ({})",
            names.join(", "),
            details.join("; ")
        );
        Self::Skipped { failed_dependencies: names, error }
    }

    /// Returns `true` for every outcome except success.
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Succeeded { .. })
    }

    /// The terminal status, or `Pending` for tasks never reached.
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Succeeded { .. } => TaskStatus::Succeeded,
            Self::Failed { .. } => TaskStatus::Failed,
            Self::Skipped { .. } => TaskStatus::Skipped,
            Self::NotExecuted => TaskStatus::Pending,
        }
    }

    /// The result as a single string; errors start with the failure marker.
    pub fn text(&self) -> &str {
        match self {
            Self::Succeeded { output } => output,
            Self::Failed { error } | Self::Skipped { error, .. } => error,
            Self::NotExecuted => NOT_EXECUTED,
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}
