// ABOUTME: Registry pattern for runtime adapter selection.
// ABOUTME: Adapters register factories by name; callers create Coders from the registry.

use crate::backends::claude::{self, ClaudeAdapter};
use crate::backends::codex::{self, CodexAdapter};
use crate::backends::gemini::{self, GeminiAdapter};
use crate::coder::Coder;
use crate::config::AdaptersConfig;
use crate::error::{CoderError, Result};
use crate::options::StartOpts;
use crate::traits::CoderAdapter;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Factory that builds an adapter instance bound to default start options
pub type AdapterFactory = Arc<dyn Fn(StartOpts) -> Result<Arc<dyn CoderAdapter>> + Send + Sync>;

/// Table of adapter factories by coder name.
///
/// Starts empty. Clones share the same table. Re-registering a name replaces the
/// previous factory and hands it back to the caller.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: Arc<RwLock<HashMap<String, AdapterFactory>>>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the claude, codex and gemini CLI adapters
    pub fn builtin(config: &AdaptersConfig) -> Self {
        let registry = Self::new();
        registry.register(claude::CODER_NAME, ClaudeAdapter::factory(config.claude()));
        registry.register(codex::CODER_NAME, CodexAdapter::factory(config.codex()));
        registry.register(gemini::CODER_NAME, GeminiAdapter::factory(config.gemini()));
        registry
    }

    /// Register a factory under `name`, returning the factory it replaced
    pub fn register(&self, name: &str, factory: AdapterFactory) -> Option<AdapterFactory> {
        let previous = self
            .factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), factory);
        if previous.is_some() {
            tracing::warn!(coder = %name, "Replacing registered adapter factory");
        } else {
            tracing::debug!(coder = %name, "Registered adapter factory");
        }
        previous
    }

    /// Remove the factory registered under `name`
    pub fn unregister(&self, name: &str) -> Option<AdapterFactory> {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    /// Remove every factory. Safe on an empty registry.
    pub fn clear(&self) {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Registered coder names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Build a Coder for `name` with `defaults` as its start options
    pub fn create_coder(&self, name: &str, defaults: StartOpts) -> Result<Coder> {
        // Clone the factory out so it runs without holding the lock
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| CoderError::NotRegistered(name.to_string()))?;
        let adapter = factory(defaults.clone())?;
        Ok(Coder::new(name, adapter, defaults))
    }
}

static GLOBAL: OnceLock<AdapterRegistry> = OnceLock::new();

/// Process-wide registry. Empty until something registers into it.
pub fn global() -> &'static AdapterRegistry {
    GLOBAL.get_or_init(AdapterRegistry::new)
}

pub fn register_adapter(name: &str, factory: AdapterFactory) -> Option<AdapterFactory> {
    global().register(name, factory)
}

pub fn unregister_adapter(name: &str) -> Option<AdapterFactory> {
    global().unregister(name)
}

pub fn clear_registered_adapters() {
    global().clear()
}

pub fn create_coder(name: &str, defaults: StartOpts) -> Result<Coder> {
    global().create_coder(name, defaults)
}
