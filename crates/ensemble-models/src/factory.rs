//! Model factory for creating backend adapters from configuration.
//!
//! This module maps a backend kind plus credential and model identifier onto a
//! concrete adapter, and discovers configured backends from environment
//! variables.

use crate::http::DEFAULT_TIMEOUT;
use crate::{ClaudeModel, GeminiModel, MockModel, OpenAIModel};
use ensemble_abstraction::{Model, ModelError, ModelParameters};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backend kind enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Mock model for testing.
    Mock,
    /// Google Gemini.
    Gemini,
    /// OpenAI.
    OpenAI,
    /// Groq (OpenAI-compatible).
    Groq,
    /// Anthropic Claude.
    Claude,
    /// Mistral AI (OpenAI-compatible).
    Mistral,
    /// OpenRouter (OpenAI-compatible).
    OpenRouter,
    /// Alibaba Qwen via DashScope's OpenAI-compatible mode.
    Qwen,
    /// Any other OpenAI-compatible endpoint; requires a base URL.
    Universal,
}

impl ModelType {
    /// Every kind probed by [`ModelFactory::discover_from_env`], in priority order.
    pub const DISCOVERABLE: [Self; 7] = [
        Self::Gemini,
        Self::OpenAI,
        Self::Groq,
        Self::Claude,
        Self::Mistral,
        Self::OpenRouter,
        Self::Qwen,
    ];

    /// Environment variable holding the credential for this kind.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Claude => Some("ANTHROPIC_API_KEY"),
            Self::Mistral => Some("MISTRAL_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::Qwen => Some("DASHSCOPE_API_KEY"),
            Self::Mock | Self::Universal => None,
        }
    }

    /// Environment variable overriding the model name for this kind.
    pub fn model_env(self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some("GEMINI_MODEL"),
            Self::OpenAI => Some("OPENAI_MODEL"),
            Self::Groq => Some("GROQ_MODEL"),
            Self::Claude => Some("ANTHROPIC_MODEL"),
            Self::Mistral => Some("MISTRAL_MODEL"),
            Self::OpenRouter => Some("OPENROUTER_MODEL"),
            Self::Qwen => Some("QWEN_MODEL"),
            Self::Mock | Self::Universal => None,
        }
    }

    /// Model used when none is configured.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => "gemini-1.5-flash",
            Self::OpenAI => "gpt-3.5-turbo",
            Self::Groq => "llama3-8b-8192",
            Self::Claude => "claude-3-haiku-20240307",
            Self::Mistral => "mistral-large-latest",
            Self::OpenRouter => "openrouter/auto",
            Self::Qwen => "qwen-turbo",
            Self::Mock => "mock-model",
            Self::Universal => "default",
        }
    }

    /// Base URL for OpenAI-compatible kinds.
    fn compatible_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some(crate::openai::OPENAI_BASE_URL),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Mistral => Some("https://api.mistral.ai/v1"),
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::Qwen => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            _ => None,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mock => "mock",
            Self::Gemini => "gemini",
            Self::OpenAI => "openai",
            Self::Groq => "groq",
            Self::Claude => "claude",
            Self::Mistral => "mistral",
            Self::OpenRouter => "openrouter",
            Self::Qwen => "qwen",
            Self::Universal => "universal",
        };
        f.write_str(name)
    }
}

impl FromStr for ModelType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAI),
            "groq" => Ok(Self::Groq),
            "claude" | "anthropic" => Ok(Self::Claude),
            "mistral" => Ok(Self::Mistral),
            "openrouter" => Ok(Self::OpenRouter),
            "qwen" | "dashscope" => Ok(Self::Qwen),
            "universal" | "openai-compatible" | "local" => Ok(Self::Universal),
            other => Err(ModelError::UnsupportedModelProvider(format!(
                "Unrecognized model type: {other}"
            ))),
        }
    }
}

/// Adapter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// The kind of backend to create.
    pub model_type: ModelType,
    /// The model ID (e.g., "gemini-1.5-flash", "gpt-4o-mini").
    pub model_id: String,
    /// API key. Remote kinds fall back to their environment variable when unset.
    pub api_key: Option<String>,
    /// Base URL override; required for `Universal`.
    pub base_url: Option<String>,
    /// Sampling temperature applied when callers pass no parameters.
    pub temperature: Option<f32>,
    /// Completion token cap applied when callers pass no parameters.
    pub max_tokens: Option<u32>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ModelConfig {
    /// Creates a new `ModelConfig` with the given type and model ID.
    #[must_use]
    pub fn new(model_type: ModelType, model_id: String) -> Self {
        Self {
            model_type,
            model_id,
            api_key: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Sets the base URL for this configuration.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Sets the default sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn default_parameters(&self, base: ModelParameters) -> ModelParameters {
        ModelParameters {
            temperature: self.temperature.or(base.temperature),
            max_tokens: self.max_tokens.or(base.max_tokens),
            ..base
        }
    }
}

/// Factory for creating model instances.
pub struct ModelFactory;

impl ModelFactory {
    /// Creates a model instance from the given configuration.
    ///
    /// # Errors
    /// Returns a `ModelError` if the credential is missing or the kind needs a
    /// base URL that was not supplied.
    pub fn create(config: ModelConfig) -> Result<Arc<dyn Model>, ModelError> {
        debug!(
            model_type = %config.model_type,
            model_id = %config.model_id,
            "Creating model instance"
        );

        let api_key = config.api_key.clone().or_else(|| {
            config.model_type.api_key_env().and_then(|var| std::env::var(var).ok())
        });

        match config.model_type {
            ModelType::Mock => Ok(Arc::new(MockModel::new(config.model_id))),
            ModelType::Claude => {
                let api_key = require_key(config.model_type, api_key)?;
                let mut model = ClaudeModel::with_api_key(config.model_id.clone(), api_key)
                    .with_timeout(config.timeout)
                    .with_defaults(config.default_parameters(ModelParameters::default()));
                if let Some(base_url) = &config.base_url {
                    model = model.with_base_url(base_url.clone());
                }
                Ok(Arc::new(model))
            }
            ModelType::Gemini => {
                let api_key = require_key(config.model_type, api_key)?;
                let base = ModelParameters { top_k: Some(40), ..ModelParameters::default() };
                let mut model = GeminiModel::with_api_key(config.model_id.clone(), api_key)
                    .with_timeout(config.timeout)
                    .with_defaults(config.default_parameters(base));
                if let Some(base_url) = &config.base_url {
                    model = model.with_base_url(base_url.clone());
                }
                Ok(Arc::new(model))
            }
            ModelType::Universal => {
                let base_url = config.base_url.clone().ok_or_else(|| {
                    ModelError::UnsupportedModelProvider(
                        "base_url is required for Universal model type".to_string(),
                    )
                })?;
                let model = OpenAIModel::compatible(
                    "universal",
                    config.model_id.clone(),
                    base_url,
                    api_key,
                )
                .with_timeout(config.timeout)
                .with_defaults(config.default_parameters(ModelParameters::default()));
                Ok(Arc::new(model))
            }
            kind => {
                let api_key = require_key(kind, api_key)?;
                let base_url = config
                    .base_url
                    .clone()
                    .or_else(|| kind.compatible_base_url().map(str::to_string))
                    .unwrap_or_default();
                let model = OpenAIModel::compatible(
                    &kind.to_string(),
                    config.model_id.clone(),
                    base_url,
                    Some(api_key),
                )
                .with_timeout(config.timeout)
                .with_defaults(config.default_parameters(ModelParameters::default()));
                Ok(Arc::new(model))
            }
        }
    }

    /// Creates a model instance from a model type string and model ID.
    ///
    /// # Errors
    /// Returns a `ModelError` if the model type is unrecognized or creation fails.
    pub fn create_from_str(
        model_type_str: &str,
        model_id: String,
    ) -> Result<Arc<dyn Model>, ModelError> {
        let model_type = ModelType::from_str(model_type_str)?;
        Self::create(ModelConfig::new(model_type, model_id))
    }

    /// Discovers every backend whose credential is present in the process environment.
    pub fn discover_from_env() -> Vec<ModelConfig> {
        Self::discover_with(|var| std::env::var(var).ok())
    }

    /// Discovers backends using `lookup` to read variables.
    ///
    /// Kinds whose credential is absent are skipped. The result may be empty.
    pub fn discover_with<F>(lookup: F) -> Vec<ModelConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut configs = Vec::new();
        for kind in ModelType::DISCOVERABLE {
            let Some(key_var) = kind.api_key_env() else { continue };
            let Some(api_key) = lookup(key_var).filter(|k| !k.trim().is_empty()) else {
                info!(backend = %kind, variable = key_var, "Credential not set, skipping backend");
                continue;
            };
            let model_id = kind
                .model_env()
                .and_then(|var| lookup(var))
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| kind.default_model().to_string());
            debug!(backend = %kind, model_id = %model_id, "Discovered backend");
            configs.push(ModelConfig::new(kind, model_id).with_api_key(api_key));
        }

        if configs.is_empty() {
            warn!("No backend credentials found in the environment");
        }
        configs
    }
}

fn require_key(kind: ModelType, api_key: Option<String>) -> Result<String, ModelError> {
    api_key.ok_or_else(|| {
        ModelError::UnsupportedModelProvider(format!(
            "{} environment variable not set",
            kind.api_key_env().unwrap_or("API key")
        ))
    })
}
