//! Name → constructor registry for adapters.
//!
//! The set of adapter kinds (subprocess, PTY subprocess, HTTP, local
//! server) is closed; the registry only maps configured names onto those
//! kinds so front-ends can instantiate by string.

use std::collections::HashMap;
use std::sync::Arc;

use quorum_protocol::AdapterConfig;

use crate::adapters::Adapter;
use crate::adapters::CommandProfile;
use crate::adapters::HttpAdapter;
use crate::adapters::HttpProfile;
use crate::adapters::LocalAdapter;
use crate::adapters::SubprocessAdapter;
use crate::error::QuorumErr;
use crate::error::Result;

type Constructor = Arc<dyn Fn(AdapterConfig) -> Arc<dyn Adapter> + Send + Sync>;

/// Registry of adapter constructors keyed by adapter name.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    constructors: HashMap<String, Constructor>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("claude", |config| {
            Arc::new(SubprocessAdapter::new(CommandProfile::claude(), config))
        });
        registry.register("codex", |config| {
            Arc::new(SubprocessAdapter::new(CommandProfile::codex(), config))
        });
        registry.register("gemini", |config| {
            Arc::new(SubprocessAdapter::new(CommandProfile::gemini(), config))
        });
        registry.register("glm", |config| {
            Arc::new(HttpAdapter::new(HttpProfile::glm(), config))
        });
        registry.register("ollama", |config| Arc::new(LocalAdapter::new(config)));
        registry
    }

    /// Register (or replace) a constructor for `name`.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(AdapterConfig) -> Arc<dyn Adapter> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_string(), Arc::new(constructor));
    }

    /// Instantiate the adapter registered under `name`.
    pub fn create(&self, name: &str, config: AdapterConfig) -> Result<Arc<dyn Adapter>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| QuorumErr::Validation(format!("unknown adapter name: {name}")))?;
        Ok(constructor(config))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate every registered adapter with defaults.
    pub fn create_all(&self) -> Vec<Arc<dyn Adapter>> {
        self.names()
            .iter()
            .filter_map(|name| self.create(name, AdapterConfig::default()).ok())
            .collect()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("names", &self.names())
            .finish()
    }
}
