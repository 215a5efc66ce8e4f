//! Backend adapters for Ensemble.
//!
//! This crate provides concrete implementations of the `Model` trait, a
//! factory that builds them from configuration or the environment, and the
//! token utilities used for budgeting prompts.
//!
//! # Supported Providers
//!
//! - **Mock**: Testing and development
//! - **Claude**: Anthropic's Claude models (API key required)
//! - **Gemini**: Google's Gemini models (API key required)
//! - **OpenAI**: OpenAI's GPT models (API key required)
//! - **Groq, Mistral, OpenRouter, Qwen**: OpenAI-compatible endpoints
//! - **Universal**: any other OpenAI-compatible server, local or remote

mod http;

pub mod claude;
pub mod factory;
pub mod gemini;
pub mod openai;
pub mod tokens;

use async_trait::async_trait;
use ensemble_abstraction::{ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage};
use tracing::debug;

pub use claude::ClaudeModel;
pub use factory::{ModelConfig, ModelFactory, ModelType};
pub use gemini::GeminiModel;
pub use http::DEFAULT_TIMEOUT;
pub use openai::OpenAIModel;
pub use tokens::{
    BpeTokenCounter, Encoding, HeuristicTokenCounter, context_window, token_counter, truncate_to_tokens,
};

/// A mock implementation of the `Model` trait for testing and demonstration.
#[derive(Debug, Default)]
pub struct MockModel {
    id: String,
}

impl MockModel {
    /// Creates a new `MockModel` with the given ID.
    #[must_use]
    pub const fn new(id: String) -> Self {
        Self { id }
    }
}

#[async_trait]
impl Model for MockModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.id,
            prompt_len = prompt.len(),
            parameters = ?parameters,
            "MockModel generating text"
        );

        let response_content = format!("Mock response for: {prompt}");

        let prompt_tokens = count_tokens(prompt);
        let completion_tokens = count_tokens(&response_content);

        Ok(ModelResponse {
            content: response_content,
            model_id: Some(self.id.clone()),
            usage: Some(ModelUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let last = messages.iter().rev().find(|m| m.role == "user").map_or("", |m| m.content.as_str());
        self.generate_text(last, parameters).await
    }

    fn model_id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

/// Count tokens in a string (simplified: word count).
#[allow(clippy::cast_possible_truncation)]
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}
