//! Gemini model implementation.

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

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini model implementation.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    /// The model ID (e.g., "gemini-1.5-flash").
    model_id: String,
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the Gemini API.
    base_url: String,
    /// Parameters applied when the caller passes none.
    defaults: ModelParameters,
    /// HTTP client for making requests.
    client: Client,
}

impl GeminiModel {
    /// Creates a new `GeminiModel` reading `GEMINI_API_KEY` from the environment.
    ///
    /// # Errors
    /// Returns a `ModelError` if the API key is not set.
    pub fn new(model_id: String) -> Result<Self, ModelError> {
        let api_key = env::var("GEMINI_API_KEY").map_err(|_| {
            ModelError::UnsupportedModelProvider(
                "GEMINI_API_KEY environment variable not set".to_string(),
            )
        })?;

        Ok(Self::with_api_key(model_id, api_key))
    }

    /// Creates a new `GeminiModel` with an explicit API key.
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String) -> Self {
        Self {
            model_id,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            defaults: ModelParameters { top_k: Some(40), ..ModelParameters::default() },
            client: http::build_client(DEFAULT_TIMEOUT),
        }
    }

    /// Overrides the API base URL.
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

    fn role_to_gemini(role: &str) -> &str {
        match role {
            "assistant" | "model" => "model",
            _ => "user",
        }
    }
}

#[async_trait]
impl Model for GeminiModel {
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
            "GeminiModel generating chat completion"
        );

        let params = parameters.map_or_else(|| self.defaults.clone(), |p| p.or(&self.defaults));

        let system: Vec<GeminiPart> = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| GeminiPart { text: m.content.clone() })
            .collect();

        let request_body = GeminiRequest {
            contents: messages
                .iter()
                .filter(|m| m.role != "system")
                .map(|m| GeminiContent {
                    role: Self::role_to_gemini(&m.role).to_string(),
                    parts: vec![GeminiPart { text: m.content.clone() }],
                })
                .collect(),
            system_instruction: if system.is_empty() {
                None
            } else {
                Some(GeminiSystemInstruction { parts: system })
            },
            generation_config: GeminiGenerationConfig {
                temperature: params.temperature,
                top_p: params.top_p,
                top_k: params.top_k,
                max_output_tokens: params.max_tokens,
                stop_sequences: params.stop_sequences,
            },
        };

        let url =
            format!("{}/models/{}:generateContent?key={}", self.base_url, self.model_id, self.api_key);

        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| http::send_error("gemini", &e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(http::status_error("gemini", status, error_text));
        }

        let gemini_response: GeminiResponse =
            response.json().await.map_err(|e| http::decode_error("gemini", &e))?;

        let content = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| {
                error!("No candidates in Gemini API response");
                ModelError::ModelResponseError(
                    "No response content from Gemini (blocked or empty)".to_string(),
                )
            })?;

        let usage = gemini_response.usage_metadata.map(|meta| ModelUsage {
            prompt_tokens: meta.prompt_token_count.unwrap_or(0),
            completion_tokens: meta.candidates_token_count.unwrap_or(0),
            total_tokens: meta.total_token_count.unwrap_or(0),
        });

        Ok(ModelResponse { content, model_id: Some(self.model_id.clone()), usage })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider(&self) -> &str {
        "gemini"
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_field_names)]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_conversion() {
        assert_eq!(GeminiModel::role_to_gemini("assistant"), "model");
        assert_eq!(GeminiModel::role_to_gemini("user"), "user");
    }

    #[tokio::test]
    async fn test_candidate_text_is_extracted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "k".into()))
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Olá"}]}}]}"#)
            .create_async()
            .await;

        let model = GeminiModel::with_api_key("gemini-1.5-flash".to_string(), "k".to_string())
            .with_base_url(server.url());
        let response = model.generate_text("hi", None).await.unwrap();
        assert_eq!(response.content, "Olá");
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_response_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"candidates":[]}"#)
            .create_async()
            .await;

        let model = GeminiModel::with_api_key("gemini-1.5-flash".to_string(), "k".to_string())
            .with_base_url(server.url());
        let err = model.generate_text("hi", None).await.unwrap_err();
        assert!(matches!(err, ModelError::ModelResponseError(_)));
    }
}
