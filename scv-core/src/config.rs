use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// The manager's one domain knob: how long an activated stream may sit idle
/// before its heartbeat timer auto-deactivates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Human-readable duration (`"20m"`, `"90s"`, ...), parsed with
    /// [`humantime::parse_duration`] rather than stored as a raw integer so
    /// config files stay readable.
    pub expiration_window: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            expiration_window: "20m".to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn expiration_window(&self) -> anyhow::Result<Duration> {
        humantime::parse_duration(&self.expiration_window)
            .map_err(|e| anyhow::anyhow!("invalid expiration_window {:?}: {e}", self.expiration_window))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Binding for the thin demonstrative HTTP surface the binary exposes to
/// compute cores; request routing and auth themselves are out of scope for
/// this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub manager: ManagerConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
}

impl ServiceConfig {
    /// Loads configuration from an optional YAML file overlaid with
    /// `SCV_`-prefixed environment variables (e.g. `SCV_MANAGER_EXPIRATION_WINDOW`).
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, config::FileFormat::Yaml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCV")
                .separator("_")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }
}
