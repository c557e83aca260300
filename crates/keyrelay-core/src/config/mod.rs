//! Configuration for opening keyrings
//!
//! Loaded from YAML (or JSON) files, or built programmatically.

mod error;
mod file;

pub use error::{ConfigError, ConfigResult};
pub use file::{default_config_path, Config, KeyctlConfig};
