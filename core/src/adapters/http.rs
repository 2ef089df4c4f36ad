//! HTTP-backed adapters.
//!
//! Two wire shapes cover the remote backends: [`HttpAdapter`] posts a
//! JSON body and consumes a Server-Sent-Events stream of text deltas
//! (Anthropic-compatible services), and [`LocalAdapter`] talks to a local
//! model server that streams newline-delimited JSON (Ollama-compatible).

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::StatusCode;
use quorum_protocol::AdapterConfig;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use crate::adapters::Adapter;
use crate::adapters::ChunkStream;
use crate::error::QuorumErr;
use crate::error::Result;

/// Budget for availability probes; independent of the send timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// How credentials travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// `x-api-key: <key>`.
    ApiKeyHeader,
}

/// Static description of one SSE backend.
#[derive(Debug, Clone)]
pub struct HttpProfile {
    pub name: String,
    pub display_name: String,
    pub icon: String,
    pub color: String,
    pub base_url: String,
    /// Request path appended to the base URL.
    pub path: String,
    pub auth: AuthStyle,
    /// Environment variables consulted for the API key, first hit wins.
    pub api_key_env: Vec<String>,
    pub default_model: String,
    /// Static headers sent with every request.
    pub headers: Vec<(String, String)>,
    /// Version string reported by [`Adapter::version`].
    pub version_label: String,
}

impl HttpProfile {
    /// The GLM service behind an Anthropic-compatible API.
    pub fn glm() -> Self {
        Self {
            name: "glm".to_string(),
            display_name: "GLM-4.7".to_string(),
            icon: "🔵".to_string(),
            color: "bright_cyan".to_string(),
            base_url: "https://api.z.ai/api/anthropic/v1".to_string(),
            path: "/messages".to_string(),
            auth: AuthStyle::ApiKeyHeader,
            api_key_env: vec!["ZAI_API_KEY".to_string(), "GLM_API_KEY".to_string()],
            default_model: "glm-4.7".to_string(),
            headers: vec![("anthropic-version".to_string(), "2023-06-01".to_string())],
            version_label: "GLM-4.7 (via Z.AI)".to_string(),
        }
    }
}

/// Adapter over a remote SSE streaming API.
pub struct HttpAdapter {
    profile: HttpProfile,
    config: AdapterConfig,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(profile: HttpProfile, config: AdapterConfig) -> Self {
        Self {
            profile,
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_key(&self) -> Option<String> {
        self.profile
            .api_key_env
            .iter()
            .find_map(|name| env::var(name).ok())
            .filter(|key| !key.is_empty())
    }

    fn url(&self) -> String {
        let base = self
            .config
            .endpoint
            .clone()
            .unwrap_or_else(|| self.profile.base_url.clone());
        format!("{base}{}", self.profile.path)
    }

    fn model(&self) -> String {
        self.config
            .model
            .clone()
            .unwrap_or_else(|| self.profile.default_model.clone())
    }

    fn request(&self, body: &Value, api_key: &str, timeout: Duration) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(self.url())
            .timeout(timeout)
            .header("content-type", "application/json")
            .json(body);
        builder = match self.profile.auth {
            AuthStyle::Bearer => builder.bearer_auth(api_key),
            AuthStyle::ApiKeyHeader => builder.header("x-api-key", api_key),
        };
        for (key, value) in &self.profile.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        builder
    }

    /// Map a non-success status onto the error taxonomy.
    async fn classify_failure(name: &str, response: reqwest::Response) -> QuorumErr {
        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();

        match status {
            StatusCode::TOO_MANY_REQUESTS => QuorumErr::RateLimit {
                message: format!("{name} rate limit reached"),
                retry_after,
            },
            StatusCode::UNAUTHORIZED => {
                QuorumErr::Authentication(format!("{name} rejected the API key"))
            }
            _ => QuorumErr::Backend(format!("{name} returned {status}: {body}")),
        }
    }

    /// Pull the text delta out of an Anthropic-style stream event.
    fn extract_delta(value: &Value) -> Option<String> {
        if value.get("type")?.as_str()? != "content_block_delta" {
            return None;
        }
        let delta = value.get("delta")?;
        if delta.get("type")?.as_str()? != "text_delta" {
            return None;
        }
        Some(delta.get("text")?.as_str()?.to_string())
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn display_name(&self) -> &str {
        &self.profile.display_name
    }

    fn icon(&self) -> &str {
        &self.profile.icon
    }

    fn color(&self) -> &str {
        &self.profile.color
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    async fn check_availability(&self) -> bool {
        let Some(api_key) = self.api_key() else {
            return false;
        };
        let body = json!({
            "model": self.model(),
            "max_tokens": 5,
            "messages": [{"role": "user", "content": "hi"}],
        });
        match self.request(&body, &api_key, PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn version(&self) -> String {
        self.profile.version_label.clone()
    }

    async fn send(&self, prompt: &str) -> Result<ChunkStream> {
        let api_key = self.api_key().ok_or_else(|| {
            QuorumErr::NotAvailable(format!(
                "{}: no API key set ({})",
                self.profile.display_name,
                self.profile.api_key_env.join(" or ")
            ))
        })?;

        let body = json!({
            "model": self.model(),
            "max_tokens": self.config.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
            "stream": true,
        });

        let response = self
            .request(&body, &api_key, self.config.timeout())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QuorumErr::Timeout(self.config.timeout())
                } else {
                    QuorumErr::from(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(&self.profile.display_name, response).await);
        }

        debug!(adapter = %self.profile.name, "sse stream open");
        let timeout = self.config.timeout();
        let mut events = response.bytes_stream().eventsource();

        Ok(Box::pin(async_stream::stream! {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        if event.data == "[DONE]" {
                            break;
                        }
                        let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
                            continue;
                        };
                        if let Some(text) = Self::extract_delta(&value)
                            && !text.is_empty()
                        {
                            yield Ok(text);
                        }
                    }
                    Err(err) => {
                        let text = err.to_string();
                        if text.contains("timed out") || text.contains("timeout") {
                            yield Err(QuorumErr::Timeout(timeout));
                        } else {
                            yield Err(QuorumErr::Connection(text));
                        }
                        break;
                    }
                }
            }
        }))
    }
}

/// Adapter over a local model server with newline-delimited JSON
/// streaming.
pub struct LocalAdapter {
    config: AdapterConfig,
    display_name: String,
    client: reqwest::Client,
}

impl LocalAdapter {
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";
    pub const DEFAULT_MODEL: &'static str = "llama3.1:70b";

    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config,
            display_name: "Ollama".to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// A named instance pinned to one model, used by the selector to run
    /// several specialized local models side by side.
    pub fn instance(config: AdapterConfig, model: &str, display_name: &str) -> Self {
        Self {
            config: config.with_model(model),
            display_name: display_name.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_ENDPOINT.to_string())
    }

    fn model(&self) -> String {
        self.config
            .model
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string())
    }

    /// Models the server has pulled.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.endpoint());
        let response = self
            .client
            .get(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(QuorumErr::from)?;
        let value: Value = response.json().await.map_err(QuorumErr::from)?;
        let models = value
            .get("models")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|m| m.get("name")?.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }
}

#[async_trait]
impl Adapter for LocalAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn icon(&self) -> &str {
        "🟣"
    }

    fn color(&self) -> &str {
        "bright_magenta"
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    async fn check_availability(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint());
        match self
            .client
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn version(&self) -> String {
        let url = format!("{}/api/version", self.endpoint());
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        if let Ok(response) = response
            && response.status().is_success()
            && let Ok(value) = response.json::<Value>().await
            && let Some(version) = value.get("version").and_then(Value::as_str)
        {
            return version.to_string();
        }
        "unknown".to_string()
    }

    async fn send(&self, prompt: &str) -> Result<ChunkStream> {
        let url = format!("{}/api/chat", self.endpoint());
        let body = json!({
            "model": self.model(),
            "messages": [{"role": "user", "content": prompt}],
            "stream": true,
        });

        let response = self
            .client
            .post(url)
            .timeout(self.config.timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QuorumErr::Timeout(self.config.timeout())
                } else {
                    QuorumErr::from(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(HttpAdapter::classify_failure(&self.display_name, response).await);
        }

        let timeout = self.config.timeout();
        let mut bytes = response.bytes_stream();

        Ok(Box::pin(async_stream::stream! {
            // The server streams one JSON object per line; a chunk may
            // carry a partial line, so split on the buffered text.
            let mut buffer = String::new();
            'outer: while let Some(item) = bytes.next().await {
                match item {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(pos) = buffer.find('\n') {
                            let line: String = buffer.drain(..=pos).collect();
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            let Ok(value) = serde_json::from_str::<Value>(line) else {
                                continue;
                            };
                            if let Some(text) = value
                                .get("message")
                                .and_then(|m| m.get("content"))
                                .and_then(Value::as_str)
                                && !text.is_empty()
                            {
                                yield Ok(text.to_string());
                            }
                            if value.get("done").and_then(Value::as_bool) == Some(true) {
                                break 'outer;
                            }
                        }
                    }
                    Err(err) => {
                        if err.is_timeout() {
                            yield Err(QuorumErr::Timeout(timeout));
                        } else {
                            yield Err(QuorumErr::Connection(err.to_string()));
                        }
                        break;
                    }
                }
            }
        }))
    }
}
