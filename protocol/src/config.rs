//! Adapter configuration and response records.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Configuration for one adapter instance.
///
/// Created once at startup and read-only afterwards. The recognized
/// option set matches what front-ends may put in their config files;
/// anything backend-specific goes into `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Wall-clock timeout for a single `send`, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum tokens requested from the backend.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Model override, when the backend supports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Endpoint override for HTTP backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Retry attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between retries, in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f64,
    /// Backend-specific options.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> f64 {
    1.0
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            model: None,
            endpoint: None,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            extra: HashMap::new(),
        }
    }
}

impl AdapterConfig {
    /// Wall-clock timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }

    /// Set the per-send timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Set the model override.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the endpoint override.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A complete (non-streamed) response from an adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterResponse {
    /// Produced text.
    pub content: String,
    /// Model that produced it, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Token count, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    /// Elapsed wall-clock time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    /// Raw backend payload, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
}

/// Coarse health of one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Ok,
    Unavailable,
    Error,
}

/// Composite status record returned by an adapter health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub name: String,
    pub display_name: String,
    pub available: bool,
    /// Backend version, or `"unknown"` / `"N/A"` when unavailable.
    pub version: String,
    pub state: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
