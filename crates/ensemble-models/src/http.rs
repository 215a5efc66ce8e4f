//! Shared HTTP plumbing for the remote adapters.
//!
//! Every remote adapter funnels transport failures and non-success statuses
//! through these helpers so the router sees the same error shapes regardless
//! of provider.

use ensemble_abstraction::ModelError;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{error, warn};

/// Default per-request timeout for remote adapters.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds an HTTP client whose every request is bounded by `timeout`.
pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client with timeout, using defaults");
        Client::new()
    })
}

/// Maps a reqwest transport error into a `ModelError`.
pub(crate) fn send_error(provider: &str, e: &reqwest::Error) -> ModelError {
    error!(provider = %provider, error = %e, "Failed to send request");
    if e.is_timeout() {
        ModelError::Timeout(format!("{provider} request timed out: {e}"))
    } else {
        ModelError::RequestError(format!("Network error: {e}"))
    }
}

/// Maps a non-success HTTP status and body into a `ModelError`.
///
/// 402 and 429 become `QuotaExceeded`; every other status is preserved as
/// `Http` so callers can classify it.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: String) -> ModelError {
    error!(
        provider = %provider,
        status = %status,
        error = %body,
        "API returned error status"
    );

    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::PAYMENT_REQUIRED {
        return ModelError::QuotaExceeded { provider: provider.to_string(), message: Some(body) };
    }

    ModelError::Http { status: status.as_u16(), message: body }
}

/// Maps a response-decoding failure into a `ModelError`.
pub(crate) fn decode_error(provider: &str, e: &reqwest::Error) -> ModelError {
    error!(provider = %provider, error = %e, "Failed to parse API response");
    ModelError::SerializationError(format!("Failed to parse response: {e}"))
}
