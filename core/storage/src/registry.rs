//! Backend registry for resolving a backend from configuration.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::backend::StorageBackend;
use crate::memory::{AccessPolicy, MemoryBackend};
use skybucket_common::{Error, Result};

/// Factory function type for creating backends.
pub type BackendFactory = Box<dyn Fn(Value) -> Result<Arc<dyn StorageBackend>> + Send + Sync>;

/// Registry for storage backend factories.
///
/// Allows hosts to pick a backend by name and JSON configuration.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a backend by name and configuration.
    ///
    /// # Errors
    /// - Backend not registered
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn StorageBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Backend '{}' is not registered", name)))?;
        debug!("Resolving storage backend '{}'", name);
        factory(config)
    }

    /// Registered backend names, sorted.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn memory_factory(config: Value) -> Result<Arc<dyn StorageBackend>> {
    let policy = match config.get("policy") {
        Some(policy) => serde_json::from_value::<AccessPolicy>(policy.clone())?,
        None => AccessPolicy::default(),
    };

    let mut backend = MemoryBackend::with_policy(policy);
    if let Some(bucket) = config.get("bucket").and_then(|v| v.as_str()) {
        backend = backend.with_bucket(bucket);
    }
    Ok(Arc::new(backend))
}

fn local_factory(config: Value) -> Result<Arc<dyn StorageBackend>> {
    let root = config
        .get("root")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidInput("Local backend requires 'root' path".to_string()))?;
    let require_auth = config
        .get("require_auth")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Ok(Arc::new(
        crate::local::LocalBackend::new(root)?.with_require_auth(require_auth),
    ))
}

/// Create a registry with the bundled backends (`memory`, `local`).
pub fn create_default_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry
        .factories
        .insert("memory".to_string(), Box::new(memory_factory));
    registry
        .factories
        .insert("local".to_string(), Box::new(local_factory));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = BackendRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryBackend::new()))))
            .unwrap();

        let backend = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = create_default_registry();
        let result = registry.register("memory", Box::new(memory_factory));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = BackendRegistry::new();
        assert!(registry.resolve("unknown", Value::Null).is_err());
    }

    #[test]
    fn test_default_backends() {
        let registry = create_default_registry();
        assert_eq!(registry.backends(), vec!["local", "memory"]);
    }

    #[test]
    fn test_local_requires_root() {
        let registry = create_default_registry();
        assert!(registry.resolve("local", json!({})).is_err());

        let temp = tempfile::TempDir::new().unwrap();
        let backend = registry
            .resolve("local", json!({ "root": temp.path().to_str().unwrap() }))
            .unwrap();
        assert_eq!(backend.name(), "local");
    }

    #[test]
    fn test_memory_policy_from_config() {
        let registry = create_default_registry();
        let config = json!({
            "bucket": "media",
            "policy": { "require_auth": false, "read_only": ["pub"] }
        });
        let backend = registry.resolve("memory", config).unwrap();
        assert_eq!(backend.name(), "memory");

        let bad = registry.resolve("memory", json!({ "policy": { "read_only": 3 } }));
        assert!(bad.is_err());
    }
}
