//! Failure classification for backend attempts.
//!
//! A failure is either retryable (the next backend may well succeed and the
//! current one deserves a short pause) or non-retryable (the request itself
//! is the problem, though another backend may still accept it).

use ensemble_abstraction::ModelError;
use once_cell::sync::Lazy;
use regex::Regex;

/// How a failed attempt should be treated by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Rate limit, 5xx-class, network fault or transient access denial.
    Retryable,
    /// Any other application error.
    NonRetryable,
}

impl FailureClass {
    /// Returns `true` for [`FailureClass::Retryable`].
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }
}

// Status codes embedded in free-form error text.
static RETRYABLE_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(401|403|408|429|5\d\d)\b").expect("status regex should be valid")
});

const RETRYABLE_PHRASES: &[&str] = &[
    "rate limit",
    "rate-limit",
    "too many requests",
    "quota",
    "timeout",
    "timed out",
    "connection",
    "network",
    "unavailable",
    "overloaded",
    "permission denied",
    "access denied",
    "unauthorized",
    "forbidden",
];

/// Returns `true` for status codes that warrant failover.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 408 | 429 | 500..=599)
}

/// Classifies a structured adapter error.
pub fn classify_error(err: &ModelError) -> FailureClass {
    match err {
        ModelError::RequestError(_) | ModelError::Timeout(_) | ModelError::QuotaExceeded { .. } => {
            FailureClass::Retryable
        }
        ModelError::Http { status, .. } => {
            if is_retryable_status(*status) {
                FailureClass::Retryable
            } else {
                FailureClass::NonRetryable
            }
        }
        ModelError::ModelResponseError(message)
        | ModelError::SerializationError(message)
        | ModelError::UnsupportedModelProvider(message)
        | ModelError::Other(message) => classify_text(message),
    }
}

/// Classifies a failure described only by text.
pub fn classify_text(text: &str) -> FailureClass {
    if RETRYABLE_STATUS.is_match(text) {
        return FailureClass::Retryable;
    }
    let lowered = text.to_lowercase();
    if RETRYABLE_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        FailureClass::Retryable
    } else {
        FailureClass::NonRetryable
    }
}
