//! Backend abstraction layer for Ensemble.
//!
//! This crate defines the contract every text-generation backend implements,
//! the error taxonomy those backends report, and the token-counting capability
//! consumed by the context memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix that marks a textual result as a failure.
///
/// Tools and some backends report failures as text rather than as errors.
/// Any text starting with this marker is classified as an error result.
pub const FAILURE_MARKER: &str = "Error";

/// Returns `true` if `text` is a failure-marked result.
///
/// Leading whitespace is ignored; the comparison is case-sensitive.
pub fn is_failure_text(text: &str) -> bool {
    text.trim_start().starts_with(FAILURE_MARKER)
}

/// Represents an error that can occur when interacting with a backend.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// The request never produced a response (connection refused, DNS, reset).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The backend did not answer within its own timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The backend answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// The HTTP status code.
        status: u16,
        /// The response body or a description of it.
        message: String,
    },

    /// The model returned an error (e.g., invalid input, empty completion).
    #[error("Model Response Error: {0}")]
    ModelResponseError(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The backend kind is not supported or not configured.
    #[error("Unsupported Model Provider: {0}")]
    UnsupportedModelProvider(String),

    /// Provider quota exceeded or rate limit hit.
    #[error("Provider '{provider}' quota exceeded{}", message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    QuotaExceeded {
        /// The provider name (e.g., "openai", "gemini").
        provider: String,
        /// Optional error message from the provider.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

impl ModelError {
    /// Returns the HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::QuotaExceeded { .. } => Some(429),
            _ => None,
        }
    }
}

/// Represents a message in a conversation with a chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    pub role: String,
    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
}

/// Parameters for controlling the model's generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// What sampling temperature to use, between 0 and 2.
    pub temperature: Option<f32>,

    /// Nucleus sampling probability mass.
    pub top_p: Option<f32>,

    /// Provider-specific top-k sampling (Gemini).
    pub top_k: Option<u32>,

    /// The maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sequences where the API will stop generating further tokens.
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: None,
            top_k: None,
            max_tokens: Some(1024),
            stop_sequences: None,
        }
    }
}

impl ModelParameters {
    /// Fills every unset field of `self` from `defaults`.
    #[must_use]
    pub fn or(self, defaults: &Self) -> Self {
        Self {
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            top_k: self.top_k.or(defaults.top_k),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            stop_sequences: self.stop_sequences.or_else(|| defaults.stop_sequences.clone()),
        }
    }
}

/// The response from a text generation or chat completion model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated content.
    pub content: String,

    /// Optional: The ID of the model used to generate the response.
    pub model_id: Option<String>,

    /// Optional: Usage statistics for the request.
    pub usage: Option<ModelUsage>,
}

impl ModelResponse {
    /// Creates a response carrying only content and the producing model ID.
    pub fn text(content: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self { content: content.into(), model_id: Some(model_id.into()), usage: None }
    }
}

/// Usage statistics for a model request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,

    /// Number of tokens in the completion.
    pub completion_tokens: u32,

    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// A uniform wrapper around one text-generation backend.
///
/// Implementations own their connection and credential state and are
/// stateless between calls. All backends must be `Send + Sync` so a router can
/// share them across tasks.
#[async_trait]
pub trait Model: Send + Sync {
    /// Generates a text completion based on the given prompt.
    ///
    /// # Errors
    /// Returns a `ModelError` if generation fails.
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError>;

    /// Generates a chat completion based on the given conversation history.
    ///
    /// The default implementation flattens the conversation into a single
    /// prompt and delegates to [`Model::generate_text`].
    ///
    /// # Errors
    /// Returns a `ModelError` if generation fails.
    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let prompt = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.generate_text(&prompt, parameters).await
    }

    /// Returns the ID of the underlying model (e.g. "gpt-4o-mini").
    fn model_id(&self) -> &str;

    /// Returns the provider name (e.g. "openai"). Used in logs and identifiers.
    fn provider(&self) -> &str {
        "unknown"
    }
}

/// Counts tokens for a given model family.
///
/// Token accounting is optional: consumers that receive no counter fall back
/// to count-based limits.
pub trait TokenCounter: Send + Sync {
    /// Returns the number of tokens `text` would occupy.
    fn count(&self, text: &str) -> usize;

    /// Returns the model identifier this counter is keyed by.
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoModel;

    #[async_trait]
    impl Model for EchoModel {
        async fn generate_text(
            &self,
            prompt: &str,
            _parameters: Option<ModelParameters>,
        ) -> Result<ModelResponse, ModelError> {
            Ok(ModelResponse::text(prompt, "echo"))
        }

        fn model_id(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_failure_marker_detection() {
        assert!(is_failure_text("Error: boom"));
        assert!(is_failure_text("   Error generating with Gemini"));
        assert!(!is_failure_text("All good"));
        assert!(!is_failure_text("error in lowercase is not a marker"));
    }

    #[test]
    fn test_quota_error_display() {
        let err = ModelError::QuotaExceeded {
            provider: "openai".to_string(),
            message: Some("slow down".to_string()),
        };
        assert_eq!(err.to_string(), "Provider 'openai' quota exceeded: slow down");
        assert_eq!(err.status(), Some(429));

        let bare = ModelError::QuotaExceeded { provider: "gemini".to_string(), message: None };
        assert_eq!(bare.to_string(), "Provider 'gemini' quota exceeded");
    }

    #[test]
    fn test_parameters_merge() {
        let defaults = ModelParameters { temperature: Some(0.2), ..ModelParameters::default() };
        let explicit = ModelParameters {
            temperature: None,
            top_p: Some(0.9),
            top_k: None,
            max_tokens: None,
            stop_sequences: None,
        };
        let merged = explicit.or(&defaults);
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.top_p, Some(0.9));
        assert_eq!(merged.max_tokens, Some(1024));
    }

    #[tokio::test]
    async fn test_default_chat_completion_flattens_messages() {
        let model = EchoModel;
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let response = model.generate_chat_completion(&messages, None).await.unwrap();
        assert_eq!(response.content, "system: be brief\nuser: hi");
        assert_eq!(model.provider(), "unknown");
    }
}
