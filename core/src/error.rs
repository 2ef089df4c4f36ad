//! Engine error taxonomy.
//!
//! Errors store stringified causes rather than wrapping source errors so
//! backend-specific types (reqwest, io) never leak across the adapter
//! boundary. The kinds here are the stable contract: the retry layer and
//! the coordinator dispatch on kind, never on message text.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`QuorumErr`].
pub type Result<T> = std::result::Result<T, QuorumErr>;

/// Errors produced by the engine and its adapters.
#[derive(Debug, Error)]
pub enum QuorumErr {
    /// Adapter cannot be used at all (not installed, missing key).
    /// Surfaced at selection time; excludes the adapter, never aborts
    /// the request.
    #[error("adapter not available: {0}")]
    NotAvailable(String),

    /// Transport failure. Retriable.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Operation exceeded its configured deadline. Retriable.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Backend signalled throttling. Retriable on the rate-limit
    /// schedule.
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        /// Backend-suggested wait, when it sent one.
        retry_after: Option<Duration>,
    },

    /// Credentials rejected. Not retriable.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The circuit breaker rejected the call without invoking the
    /// backend. Not retriable within this request.
    #[error("circuit open for {adapter}, retry in {retry_in:?}")]
    CircuitOpen { adapter: String, retry_in: Duration },

    /// Caller input violated a local invariant. Surfaced before any
    /// event stream starts.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Backend failed in a way that is not transport, auth or
    /// throttling (nonzero exit, malformed response, HTTP 5xx body).
    #[error("backend error: {0}")]
    Backend(String),

    /// Unexpected condition; logged with context and converted to a
    /// turn-level error so the request can continue where possible.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QuorumErr {
    /// Whether the retry layer may re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QuorumErr::Connection(_) | QuorumErr::Timeout(_) | QuorumErr::RateLimit { .. }
        )
    }

    /// True for throttling errors, which use a separate delay schedule.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, QuorumErr::RateLimit { .. })
    }

    /// Backend-suggested retry delay, when one was sent.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            QuorumErr::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for QuorumErr {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QuorumErr::Timeout(Duration::ZERO)
        } else if err.is_connect() {
            QuorumErr::Connection(format!("connection failed: {err}"))
        } else {
            QuorumErr::Backend(err.to_string())
        }
    }
}

impl From<std::io::Error> for QuorumErr {
    fn from(err: std::io::Error) -> Self {
        QuorumErr::Connection(err.to_string())
    }
}

/// Map an error onto a short user-facing phrase.
///
/// Display text is decoupled from kind: the mapping keys off message
/// substrings the way backends actually phrase their failures, so a
/// wrapped cause still gets a friendly line.
pub fn friendly_message(err: &QuorumErr, adapter_name: &str) -> String {
    let text = err.to_string().to_lowercase();

    if text.contains("connection") || text.contains("connect") {
        return format!("{adapter_name} is not reachable. Check your connection.");
    }
    if text.contains("timed out") || text.contains("timeout") {
        return format!("{adapter_name} is taking too long to respond.");
    }
    if text.contains("rate limit") || text.contains("too many") {
        return format!("{adapter_name} is rate limiting requests. Please wait.");
    }
    if text.contains("auth") || text.contains("key") || text.contains("token") {
        return format!("{adapter_name} authentication failed. Check your credentials.");
    }
    if text.contains("not found") || text.contains("not installed") || text.contains("not available")
    {
        return format!("{adapter_name} is not installed or not found.");
    }
    format!("{adapter_name} error: {err}")
}
