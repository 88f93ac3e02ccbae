use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::{DetectorBackend, SharedBackend};
use super::backends::NoopBackend;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
/// One registry is built per process; every job clones the handle of the backend it
/// was configured with.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry holding only the pass-through `noop` backend.
    pub fn with_noop() -> Self {
        let mut registry = Self::new();
        registry.register(NoopBackend::new());
        registry
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        self.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Register an already shared backend under its own name.
    pub fn register_shared(&mut self, backend: SharedBackend) -> Result<()> {
        let name = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?
            .name()
            .to_string();
        self.insert(name, backend);
        Ok(())
    }

    fn insert(&mut self, name: String, backend: SharedBackend) {
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        if self.backends.insert(name.clone(), backend).is_some() {
            log::warn!("detector backend '{}' registered twice, keeping the latest", name);
        }
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!(
                "backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            ));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the warm-up hook of every registered backend.
    pub fn warm_up_all(&self) -> Result<()> {
        for name in self.list() {
            if let Some(backend) = self.get(&name) {
                backend
                    .lock()
                    .map_err(|_| anyhow!("backend lock poisoned"))?
                    .warm_up()
                    .map_err(|e| anyhow!("warm-up of backend '{}' failed: {:#}", name, e))?;
            }
        }
        Ok(())
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
