//! Configuration structure and file loading (YAML or JSON)
//!
//! The default location is `~/.config/keyrelay/config.yaml` (the platform
//! config directory on other systems).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};
use crate::keyring::BackendType;

/// Options for the keyctl backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyctlConfig {
    /// One of `user`, `session`, `process`, `thread`
    pub scope: String,

    /// Named keyring under the scope keyring; items go into the scope keyring when unset
    pub container_name: Option<String>,

    /// Permission mask for created keys and keyrings; 0 keeps kernel defaults
    pub permission_mask: u32,
}

impl KeyctlConfig {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Default::default()
        }
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    pub fn with_permission_mask(mut self, mask: u32) -> Self {
        self.permission_mask = mask;
        self
    }
}

/// Top-level configuration
///
/// # Example
///
/// ```
/// use keyrelay_core::config::Config;
/// use keyrelay_core::keyring::BackendType;
///
/// let config = Config::from_yaml_str(
///     "allowed_backends: [keyctl]\nkeyctl:\n  scope: session\n  container_name: myapp\n",
/// ).unwrap();
/// assert_eq!(config.allowed_backends, vec![BackendType::KeyCtl]);
/// assert_eq!(config.keyctl.container_name.as_deref(), Some("myapp"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backends to try, in order; empty means every registered backend
    pub allowed_backends: Vec<BackendType>,

    pub keyctl: KeyctlConfig,
}

impl Config {
    pub fn with_allowed_backends(mut self, backends: Vec<BackendType>) -> Self {
        self.allowed_backends = backends;
        self
    }

    pub fn with_keyctl(mut self, keyctl: KeyctlConfig) -> Self {
        self.keyctl = keyctl;
        self
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        // An empty document deserializes to unit, not an empty map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as YAML
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Load from the default location, or defaults if the file does not exist
    pub fn load() -> ConfigResult<Self> {
        let path = default_config_path()
            .ok_or_else(|| ConfigError::Other("no config directory on this platform".to_string()))?;
        Self::load_or_default(path)
    }

    /// Load from `path`, or defaults if the file does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Write as YAML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}

/// `~/.config/keyrelay/config.yaml` (XDG config dir on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("keyrelay").join("config.yaml"))
}
