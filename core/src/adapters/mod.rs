//! Uniform capability surface over heterogeneous backends.
//!
//! An [`Adapter`] wraps one text-producing backend: a local CLI streamed
//! over pipes (or a PTY), or an HTTP API consumed as an SSE stream. The
//! engine only ever sees the trait: a name, an availability probe, a
//! version string, and `send`, which produces a lazy, finite,
//! non-restartable sequence of text chunks.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use quorum_protocol::AdapterConfig;
use quorum_protocol::AdapterInfo;
use quorum_protocol::AdapterResponse;
use quorum_protocol::HealthState;
use quorum_protocol::HealthStatus;
use tracing::debug;

use crate::availability::AvailabilityCache;
use crate::error::Result;

pub mod http;
pub mod registry;
pub mod subprocess;

pub use http::HttpAdapter;
pub use http::HttpProfile;
pub use http::LocalAdapter;
pub use registry::AdapterRegistry;
pub use subprocess::CommandProfile;
pub use subprocess::SubprocessAdapter;

/// Lazy, finite sequence of response chunks. Dropping it cancels the
/// underlying work.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Capability set every backend wrapper exposes.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable identifier ("claude", "ollama", …).
    fn name(&self) -> &str;

    /// Human-facing name; defaults to [`Adapter::name`].
    fn display_name(&self) -> &str {
        self.name()
    }

    fn icon(&self) -> &str {
        "🤖"
    }

    fn color(&self) -> &str {
        "white"
    }

    fn config(&self) -> &AdapterConfig;

    /// Uncached availability probe. Callers go through [`is_available`].
    async fn check_availability(&self) -> bool;

    /// Backend version string, or `"unknown"`.
    async fn version(&self) -> String {
        "unknown".to_string()
    }

    /// Send a prompt; chunks arrive in transmission order. Must honour
    /// the adapter's configured timeout.
    async fn send(&self, prompt: &str) -> Result<ChunkStream>;
}

/// Display identity record for the event stream.
pub fn info(adapter: &dyn Adapter) -> AdapterInfo {
    AdapterInfo {
        name: adapter.name().to_string(),
        display_name: adapter.display_name().to_string(),
        icon: adapter.icon().to_string(),
        color: adapter.color().to_string(),
    }
}

/// Cached availability check.
///
/// Hits under the TTL skip the probe entirely; misses probe and record.
pub async fn is_available(adapter: &dyn Adapter, cache: &AvailabilityCache) -> bool {
    if let Some(cached) = cache.get(adapter.name()).await {
        return cached;
    }
    let present = adapter.check_availability().await;
    cache.put(adapter.name(), present).await;
    present
}

/// Composite health record for one adapter.
pub async fn health_check(adapter: &dyn Adapter, cache: &AvailabilityCache) -> HealthStatus {
    let available = is_available(adapter, cache).await;
    let version = if available {
        adapter.version().await
    } else {
        "N/A".to_string()
    };
    HealthStatus {
        name: adapter.name().to_string(),
        display_name: adapter.display_name().to_string(),
        available,
        version,
        state: if available {
            HealthState::Ok
        } else {
            HealthState::Unavailable
        },
        error: None,
    }
}

/// Send a prompt and collect the full response.
pub async fn send_and_wait(adapter: &dyn Adapter, prompt: &str) -> Result<AdapterResponse> {
    let started = Instant::now();
    let mut stream = adapter.send(prompt).await?;
    let mut content = String::new();
    while let Some(chunk) = stream.next().await {
        content.push_str(&chunk?);
    }
    Ok(AdapterResponse {
        content,
        model: adapter.config().model.clone(),
        tokens_used: None,
        elapsed_ms: Some(started.elapsed().as_millis() as u64),
        raw_response: None,
    })
}

/// Probe all adapters concurrently under one aggregate deadline.
///
/// Returns the sublist (in input order) whose probe succeeded before the
/// deadline; failures and timeouts are silently treated as unavailable.
pub async fn check_adapters_parallel(
    adapters: &[Arc<dyn Adapter>],
    cache: &AvailabilityCache,
    deadline: Duration,
) -> Vec<Arc<dyn Adapter>> {
    let probes = adapters.iter().map(|adapter| {
        let adapter = adapter.clone();
        async move {
            let ok = tokio::time::timeout(deadline, is_available(adapter.as_ref(), cache))
                .await
                .unwrap_or(false);
            (adapter, ok)
        }
    });

    let results = futures::future::join_all(probes).await;
    let available: Vec<Arc<dyn Adapter>> = results
        .into_iter()
        .filter(|(_, ok)| *ok)
        .map(|(adapter, _)| adapter)
        .collect();
    debug!(
        probed = adapters.len(),
        available = available.len(),
        "availability fan-out finished"
    );
    available
}
