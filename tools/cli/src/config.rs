//! Host configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use skybucket_client::ClientConfig;

/// Settings of the command-line host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Registered backend name ("local" or "memory").
    pub backend: String,
    /// Backend-specific settings passed to its factory.
    pub backend_config: Value,
    pub client: ClientConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            backend_config: Value::Object(Default::default()),
            client: ClientConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load from `path`, or from the per-user default location if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => {
                    debug!("No configuration file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        debug!("Loading configuration from {}", path.display());
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Backend settings with the local store's root filled in when missing.
    pub fn resolved_backend_config(&self) -> Result<Value> {
        let mut config = match &self.backend_config {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };

        if self.backend == "local" && config.get("root").is_none() {
            let root = default_data_dir()
                .context("Cannot determine a data directory; set backend_config.root")?;
            let map = config
                .as_object_mut()
                .context("backend_config must be a JSON object")?;
            map.insert(
                "root".to_string(),
                Value::String(root.to_string_lossy().into_owned()),
            );
        }

        Ok(config)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("skybucket").join("config.json"))
}

fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("skybucket").join("objects"))
}
