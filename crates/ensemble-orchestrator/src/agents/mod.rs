//! Agents consumed by the task graph executor.
//!
//! An agent turns a task description plus the results of the task's
//! dependencies into an output. Agents talk to a backend through the
//! [`Model`](ensemble_abstraction::Model) trait, which the resilient router
//! also implements.

pub mod simple;
pub mod tool_agent;
pub mod tools;

use crate::error::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use simple::SimpleAgent;
pub use tool_agent::{Plan, ToolAgent, parse_plan};
pub use tools::{EchoTool, Tool, ToolParameters, ToolRegistry};

/// Represents the output produced by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentOutput {
    /// The agent produced a text response.
    Text(String),
    /// The agent produced a structured data response (e.g., JSON).
    StructuredData(serde_json::Value),
}

impl AgentOutput {
    /// Renders the output as text; structured data is serialized as JSON.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::StructuredData(value) => value.to_string(),
        }
    }
}

/// A trait that defines the interface for any autonomous agent.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Returns the unique ID of the agent.
    fn id(&self) -> &str;

    /// Returns a description of the agent's purpose and capabilities.
    fn description(&self) -> &str;

    /// Executes the agent for one task.
    ///
    /// # Arguments
    /// * `input` - The task description
    /// * `dependency_results` - Successful results of the task's dependencies,
    ///   in dependency declaration order
    ///
    /// # Errors
    /// Returns an `AgentError` if execution fails. Failure-marked text in an
    /// `Ok` output is also treated as a failure by the executor.
    async fn execute(
        &self,
        input: &str,
        dependency_results: &[String],
    ) -> Result<AgentOutput, AgentError>;
}
