//! Simple agent implementation.
//!
//! This agent sends the task, prefixed by any dependency results, to a model
//! and returns the response.

use super::{Agent, AgentOutput};
use crate::error::AgentError;
use async_trait::async_trait;
use ensemble_abstraction::Model;
use std::sync::Arc;
use tracing::{debug, error};

/// A simple agent that processes text using a model.
#[derive(Clone)]
pub struct SimpleAgent {
    /// The agent's unique ID.
    id: String,
    /// The agent's description.
    description: String,
    /// The model used for generation.
    model: Arc<dyn Model>,
}

impl SimpleAgent {
    /// Creates a new `SimpleAgent` with the given ID, description and model.
    #[must_use]
    pub fn new(id: String, description: String, model: Arc<dyn Model>) -> Self {
        Self { id, description, model }
    }

    fn build_prompt(input: &str, dependency_results: &[String]) -> String {
        if dependency_results.is_empty() {
            return input.to_string();
        }
        format!(
            "--- Results of previous tasks ---\n{}\n\n--- Current task ---\n{input}",
            dependency_results.join("\n")
        )
    }
}

#[async_trait]
impl Agent for SimpleAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(
        &self,
        input: &str,
        dependency_results: &[String],
    ) -> Result<AgentOutput, AgentError> {
        debug!(
            agent_id = %self.id,
            input_len = input.len(),
            dependencies = dependency_results.len(),
            "SimpleAgent executing"
        );

        let prompt = Self::build_prompt(input, dependency_results);
        let response = self.model.generate_text(&prompt, None).await.map_err(|e| {
            error!(agent_id = %self.id, error = %e, "Model generation failed");
            e
        })?;

        debug!(
            agent_id = %self.id,
            response_len = response.content.len(),
            "SimpleAgent completed"
        );

        Ok(AgentOutput::Text(response.content))
    }
}
