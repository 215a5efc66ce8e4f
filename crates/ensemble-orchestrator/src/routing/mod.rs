//! Backend routing with round-robin load spreading and failover.
//!
//! The router owns an ordered, immutable set of backends and a cursor naming
//! the backend that last served a request. Failures are classified as
//! retryable or not, and every call walks the full backend set at most once.

pub mod classify;
pub mod router;

pub use classify::{FailureClass, classify_error, classify_text, is_retryable_status};
pub use router::{DEFAULT_RETRY_BACKOFF, ResilientRouter};
