//! Round-robin router with failover across interchangeable backends.

use super::classify::{FailureClass, classify_error, classify_text};
use crate::error::RouterError;
use async_trait::async_trait;
use ensemble_abstraction::{
    ChatMessage, Model, ModelError, ModelParameters, ModelResponse, is_failure_text,
};
use ensemble_models::{ModelConfig, ModelFactory};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause inserted after a retryable failure before the next backend is tried.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

enum Request<'a> {
    Text(&'a str),
    Chat(&'a [ChatMessage]),
}

/// Spreads generation calls across backends and fails over on errors.
///
/// Each call starts at the backend after the one that last served a request
/// successfully and visits every backend at most once. Only a success moves
/// the cursor, so a backend that just failed is not the first choice on the
/// next call. No cooldown state is kept between calls.
pub struct ResilientRouter {
    backends: Vec<Arc<dyn Model>>,
    last_served: Mutex<Option<usize>>,
    retry_backoff: Duration,
}

impl ResilientRouter {
    /// Creates a router over `backends`; insertion order is priority order.
    pub fn new(backends: Vec<Arc<dyn Model>>) -> Self {
        info!(backend_count = backends.len(), "Resilient router initialized");
        Self { backends, last_served: Mutex::new(None), retry_backoff: DEFAULT_RETRY_BACKOFF }
    }

    /// Builds backends from `configs`, skipping any that cannot be created.
    pub fn from_configs(configs: Vec<ModelConfig>) -> Self {
        let mut backends = Vec::with_capacity(configs.len());
        for config in configs {
            let kind = config.model_type;
            let model_id = config.model_id.clone();
            match ModelFactory::create(config) {
                Ok(model) => {
                    info!(backend = %kind, model_id = %model_id, "Backend added");
                    backends.push(model);
                }
                Err(e) => {
                    warn!(backend = %kind, model_id = %model_id, error = %e, "Skipping backend");
                }
            }
        }
        Self::new(backends)
    }

    /// Builds a router from every backend configured in the process environment.
    pub fn from_env() -> Self {
        Self::from_configs(ModelFactory::discover_from_env())
    }

    /// Sets the pause applied after retryable failures.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Number of configured backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns `true` if no backend is configured.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// `provider:model` labels of the backends, in priority order.
    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| format!("{}:{}", b.provider(), b.model_id())).collect()
    }

    /// Position of the backend that served the most recent successful call.
    pub fn last_served(&self) -> Option<usize> {
        *self.last_served.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn trial_order(&self) -> Vec<usize> {
        let n = self.backends.len();
        let start = self.last_served().map_or(0, |last| (last + 1) % n);
        (0..n).map(|offset| (start + offset) % n).collect()
    }

    /// Generates text for `prompt`, failing over across backends.
    ///
    /// # Errors
    /// Returns [`RouterError::NoBackends`] if none are configured, or
    /// [`RouterError::Exhausted`] once every backend has failed.
    pub async fn generate(&self, prompt: &str) -> Result<String, RouterError> {
        self.route(&Request::Text(prompt), None).await.map(|response| response.content)
    }

    /// Like [`ResilientRouter::generate`] but folds failures into the returned text.
    ///
    /// The error text always starts with the failure marker.
    pub async fn generate_or_error(&self, prompt: &str) -> String {
        self.generate(prompt).await.unwrap_or_else(|e| e.to_string())
    }

    async fn route(
        &self,
        request: &Request<'_>,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, RouterError> {
        if self.backends.is_empty() {
            error!("No backends configured");
            return Err(RouterError::NoBackends);
        }

        let order = self.trial_order();
        let attempts = order.len();
        let mut last_error = String::new();

        for (attempt, index) in order.into_iter().enumerate() {
            let backend = &self.backends[index];
            debug!(
                backend = %backend.provider(),
                model_id = %backend.model_id(),
                attempt = attempt + 1,
                "Routing request"
            );

            let outcome =
                AssertUnwindSafe(Self::attempt(backend.as_ref(), request, parameters.clone()))
                    .catch_unwind()
                    .await;

            let (class, message) = match outcome {
                Ok(Ok(response)) if !is_failure_text(&response.content) => {
                    *self.last_served.lock().unwrap_or_else(PoisonError::into_inner) = Some(index);
                    return Ok(response);
                }
                Ok(Ok(response)) => (classify_text(&response.content), response.content),
                Ok(Err(e)) => (classify_error(&e), e.to_string()),
                Err(payload) => {
                    (FailureClass::Retryable, format!("backend panicked: {}", panic_message(&*payload)))
                }
            };

            warn!(
                backend = %backend.provider(),
                model_id = %backend.model_id(),
                attempt = attempt + 1,
                retryable = class.is_retryable(),
                error = %message,
                "Backend attempt failed"
            );
            last_error = message;

            if class.is_retryable() && attempt + 1 < attempts && !self.retry_backoff.is_zero() {
                tokio::time::sleep(self.retry_backoff).await;
            }
        }

        error!(attempts, last_error = %last_error, "All backends failed");
        Err(RouterError::Exhausted { attempts, last_error })
    }

    async fn attempt(
        backend: &dyn Model,
        request: &Request<'_>,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        match request {
            Request::Text(prompt) => backend.generate_text(prompt, parameters).await,
            Request::Chat(messages) => backend.generate_chat_completion(messages, parameters).await,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl Model for ResilientRouter {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        self.route(&Request::Text(prompt), parameters).await.map_err(ModelError::from)
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        self.route(&Request::Chat(messages), parameters).await.map_err(ModelError::from)
    }

    fn model_id(&self) -> &str {
        "resilient-router"
    }

    fn provider(&self) -> &str {
        "router"
    }
}
