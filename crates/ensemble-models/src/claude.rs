//! Claude (Anthropic) model implementation.
//!
//! System messages are lifted out of the conversation into Anthropic's
//! dedicated `system` field; everything else is sent as-is.

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

const CLAUDE_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude model implementation.
#[derive(Debug, Clone)]
pub struct ClaudeModel {
    /// The model ID (e.g., "claude-3-haiku-20240307").
    model_id: String,
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the Claude API.
    base_url: String,
    /// Parameters applied when the caller passes none.
    defaults: ModelParameters,
    /// HTTP client for making requests.
    client: Client,
}

impl ClaudeModel {
    /// Creates a new `ClaudeModel` reading `ANTHROPIC_API_KEY` from the environment.
    ///
    /// # Errors
    /// Returns a `ModelError` if the API key is not set.
    pub fn new(model_id: String) -> Result<Self, ModelError> {
        let api_key = env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ModelError::UnsupportedModelProvider(
                "ANTHROPIC_API_KEY environment variable not set".to_string(),
            )
        })?;

        Ok(Self::with_api_key(model_id, api_key))
    }

    /// Creates a new `ClaudeModel` with an explicit API key.
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String) -> Self {
        Self {
            model_id,
            api_key,
            base_url: CLAUDE_BASE_URL.to_string(),
            defaults: ModelParameters::default(),
            client: http::build_client(DEFAULT_TIMEOUT),
        }
    }

    /// Overrides the API base URL (used by tests and proxies).
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
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

    /// Joins every system message into a single system prompt.
    fn extract_system_prompt(messages: &[ChatMessage]) -> Option<String> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|msg| msg.role == "system")
            .map(|msg| msg.content.as_str())
            .collect();

        if system.is_empty() { None } else { Some(system.join("\n\n")) }
    }
}

#[async_trait]
impl Model for ClaudeModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let messages = vec![ChatMessage::user(prompt)];
        self.generate_chat_completion(&messages, parameters).await
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.model_id,
            message_count = messages.len(),
            "ClaudeModel generating chat completion"
        );

        let params = parameters.map_or_else(|| self.defaults.clone(), |p| p.or(&self.defaults));
        let request_body = ClaudeRequest {
            model: self.model_id.clone(),
            system: Self::extract_system_prompt(messages),
            messages: messages
                .iter()
                .filter(|msg| msg.role != "system")
                .map(|msg| ClaudeMessage { role: msg.role.clone(), content: msg.content.clone() })
                .collect(),
            max_tokens: params.max_tokens.unwrap_or(1024),
            temperature: params.temperature,
            top_p: params.top_p,
            stop_sequences: params.stop_sequences,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| http::send_error("claude", &e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(http::status_error("claude", status, error_text));
        }

        let claude_response: ClaudeResponse =
            response.json().await.map_err(|e| http::decode_error("claude", &e))?;

        let content = claude_response
            .content
            .into_iter()
            .find_map(|block| if block.kind == "text" { block.text } else { None })
            .ok_or_else(|| {
                error!("No text content in Claude API response");
                ModelError::ModelResponseError("No response content from Anthropic".to_string())
            })?;

        let usage = claude_response.usage.map(|u| ModelUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(ModelResponse { content, model_id: Some(self.model_id.clone()), usage })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider(&self) -> &str {
        "claude"
    }
}

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ClaudeMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct ClaudeUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_system_prompt() {
        let messages = vec![
            ChatMessage::system("You are helpful"),
            ChatMessage::user("Hello"),
            ChatMessage::system("Be brief"),
        ];
        assert_eq!(
            ClaudeModel::extract_system_prompt(&messages),
            Some("You are helpful\n\nBe brief".to_string())
        );
        assert_eq!(ClaudeModel::extract_system_prompt(&[ChatMessage::user("hi")]), None);
    }

    #[tokio::test]
    async fn test_overloaded_maps_to_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/messages")
            .with_status(529)
            .with_body("overloaded")
            .create_async()
            .await;

        let model = ClaudeModel::with_api_key("claude-3-haiku-20240307".to_string(), "k".to_string())
            .with_base_url(server.url());
        let err = model.generate_text("hi", None).await.unwrap_err();
        assert_eq!(err.status(), Some(529));
    }

    #[tokio::test]
    async fn test_text_block_is_extracted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "k")
            .with_status(200)
            .with_body(
                r#"{"content":[{"type":"text","text":"Bonjour"}],"usage":{"input_tokens":3,"output_tokens":1}}"#,
            )
            .create_async()
            .await;

        let model = ClaudeModel::with_api_key("claude-3-haiku-20240307".to_string(), "k".to_string())
            .with_base_url(server.url());
        let response = model.generate_text("hi", None).await.unwrap();
        assert_eq!(response.content, "Bonjour");
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(4));
    }
}
