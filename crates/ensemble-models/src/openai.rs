//! OpenAI model implementation.
//!
//! This module provides an implementation of the `Model` trait for OpenAI's
//! chat completions API. The same wire format is spoken by Groq, Mistral,
//! OpenRouter and DashScope's compatible mode, so those providers reuse this
//! adapter with a different base URL.

use crate::http::{self, DEFAULT_TIMEOUT};
use async_trait::async_trait;
use ensemble_abstraction::{
    ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, error};

/// Default base URL for the OpenAI API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat completions adapter.
#[derive(Debug, Clone)]
pub struct OpenAIModel {
    /// Provider label used in logs and errors (e.g. "openai", "groq").
    provider: String,
    /// The model ID (e.g., "gpt-4o-mini", "llama3-8b-8192").
    model_id: String,
    /// The API key for authentication. `None` for unauthenticated local servers.
    api_key: Option<String>,
    /// The base URL for the API, without the `/chat/completions` suffix.
    base_url: String,
    /// Parameters applied when the caller passes none.
    defaults: ModelParameters,
    /// HTTP client for making requests.
    client: Client,
}

impl OpenAIModel {
    /// Creates a new `OpenAIModel` reading `OPENAI_API_KEY` from the environment.
    ///
    /// # Errors
    /// Returns a `ModelError` if the API key is not set.
    pub fn new(model_id: String) -> Result<Self, ModelError> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            ModelError::UnsupportedModelProvider(
                "OPENAI_API_KEY environment variable not set".to_string(),
            )
        })?;

        Ok(Self::with_api_key(model_id, api_key))
    }

    /// Creates a new `OpenAIModel` with an explicit API key.
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String) -> Self {
        Self::compatible("openai", model_id, OPENAI_BASE_URL.to_string(), Some(api_key))
    }

    /// Creates an adapter for any OpenAI-compatible endpoint.
    #[must_use]
    pub fn compatible(
        provider: &str,
        model_id: String,
        base_url: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            model_id,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            defaults: ModelParameters::default(),
            client: http::build_client(DEFAULT_TIMEOUT),
        }
    }

    /// Bounds every request by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http::build_client(timeout);
        self
    }

    /// Sets the parameters used when a call passes none.
    #[must_use]
    pub fn with_defaults(mut self, defaults: ModelParameters) -> Self {
        self.defaults = defaults;
        self
    }

    /// Returns the base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Model for OpenAIModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            provider = %self.provider,
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            "OpenAIModel generating text"
        );

        let messages = vec![ChatMessage::user(prompt)];
        self.generate_chat_completion(&messages, parameters).await
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            provider = %self.provider,
            model_id = %self.model_id,
            message_count = messages.len(),
            "OpenAIModel generating chat completion"
        );

        let url = format!("{}/chat/completions", self.base_url);
        let params = parameters.map_or_else(|| self.defaults.clone(), |p| p.or(&self.defaults));

        let request_body = OpenAIRequest {
            model: self.model_id.clone(),
            messages: messages
                .iter()
                .map(|msg| OpenAIMessage { role: msg.role.clone(), content: msg.content.clone() })
                .collect(),
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            stop: params.stop_sequences,
        };

        let mut request = self.client.post(&url).json(&request_body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| http::send_error(&self.provider, &e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(http::status_error(&self.provider, status, error_text));
        }

        let openai_response: OpenAIResponse =
            response.json().await.map_err(|e| http::decode_error(&self.provider, &e))?;

        let content = openai_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                error!(provider = %self.provider, "No content in API response");
                ModelError::ModelResponseError(format!(
                    "No response content from {}",
                    self.provider
                ))
            })?;

        let usage = openai_response.usage.map(|u| ModelUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ModelResponse { content, model_id: Some(self.model_id.clone()), usage })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider(&self) -> &str {
        &self.provider
    }
}

// OpenAI API request/response structures

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)] // Matches API naming
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_model_creation_with_api_key() {
        let model = OpenAIModel::with_api_key("gpt-4".to_string(), "test-key".to_string());
        assert_eq!(model.model_id(), "gpt-4");
        assert_eq!(model.provider(), "openai");
        assert_eq!(model.base_url(), OPENAI_BASE_URL);
    }

    #[test]
    fn test_compatible_trims_trailing_slash() {
        let model = OpenAIModel::compatible(
            "groq",
            "llama3-8b-8192".to_string(),
            "https://api.groq.com/openai/v1/".to_string(),
            None,
        );
        assert_eq!(model.base_url(), "https://api.groq.com/openai/v1");
        assert_eq!(model.provider(), "groq");
    }
}
