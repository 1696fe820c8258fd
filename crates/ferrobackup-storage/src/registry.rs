//! Compile-time registry of storage providers

use crate::local::LocalProvider;
use crate::memory::MemoryProvider;
use ferrobackup_types::{Error, ProviderConfiguration, Result, StorageProvider};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Builds an unconfigured provider
pub type ProviderFactory = fn() -> Box<dyn StorageProvider>;

/// Maps case-insensitive provider names to factories
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends
    ///
    /// `file` (alias `fs`) is the local filesystem, `memory` a volatile
    /// in-memory tree.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("file", || Box::new(LocalProvider::new()));
        registry.register("fs", || Box::new(LocalProvider::new()));
        registry.register("memory", || Box::new(MemoryProvider::new()));
        registry
    }

    /// Add or replace a provider
    pub fn register(&mut self, name: &str, factory: ProviderFactory) {
        self.factories.insert(name.to_lowercase(), factory);
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// True when `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_lowercase())
    }

    /// Build and initialize the provider named by `configuration`
    pub fn create(&self, configuration: &ProviderConfiguration) -> Result<Arc<dyn StorageProvider>> {
        let factory = self
            .factories
            .get(&configuration.provider_name.to_lowercase())
            .ok_or_else(|| {
                Error::config(format!(
                    "unknown storage provider '{}' (available: {})",
                    configuration.provider_name,
                    self.names().join(", ")
                ))
            })?;

        let mut provider = factory();
        provider.initialize(&configuration.options)?;
        debug!(
            "Created '{}' provider for '{}'",
            configuration.provider_name, configuration.path
        );
        Ok(Arc::from(provider))
    }
}
