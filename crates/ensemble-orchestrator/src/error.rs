// Error types for routing, graph validation and agents

use ensemble_abstraction::ModelError;
use thiserror::Error;

/// Terminal router failures.
///
/// Every message starts with the failure marker so a stringified router
/// failure is recognised as an error result downstream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouterError {
    /// The router was constructed with zero backends.
    #[error("Error: no LLM backends available")]
    NoBackends,

    /// Every backend was tried once and none succeeded.
    #[error("Error: all {attempts} backends failed; last error: {last_error}")]
    Exhausted {
        /// Number of backends tried.
        attempts: usize,
        /// The last observed failure.
        last_error: String,
    },
}

impl From<RouterError> for ModelError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::NoBackends => ModelError::UnsupportedModelProvider(err.to_string()),
            RouterError::Exhausted { .. } => ModelError::Other(err.to_string()),
        }
    }
}

/// Task graph construction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two tasks share a description.
    #[error("duplicate task description: {0}")]
    DuplicateTask(String),

    /// A task depends on a description that is not in the graph.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// The dependent task.
        task: String,
        /// The missing dependency.
        dependency: String,
    },

    /// The dependency edges form a cycle.
    #[error("circular dependency detected: {0}")]
    CycleDetected(String),

    /// A task names an agent that was never registered.
    #[error("task '{task}' is assigned to unknown agent '{agent}'")]
    UnknownAgent {
        /// The task.
        task: String,
        /// The missing agent name.
        agent: String,
    },
}

/// Agent execution errors.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Model error
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Router exhausted or empty
    #[error("{0}")]
    Router(#[from] RouterError),

    /// Other error
    #[error("Agent error: {0}")]
    Other(String),
}
