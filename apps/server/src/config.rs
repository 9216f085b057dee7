//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! Everything except the bind port and advertise host is passed through to
//! icewire-core's [`Config`].

use std::path::Path;

use anyhow::{Context, Result};
use icewire_core::{Config, MountConfig, SourceType};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `ICEWIRE_BIND_PORT`
    pub bind_port: u16,

    /// Host name or IP used in public listen URLs.
    /// If not specified, auto-detection will be attempted.
    /// Override: `ICEWIRE_ADVERTISE_HOST`
    pub advertise_host: Option<String>,

    /// Mounts, passwords and streaming tunables.
    #[serde(flatten)]
    pub core: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 8000,
            advertise_host: None,
            core: Config::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `ICEWIRE_*` overrides read through `var`.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("ICEWIRE_BIND_PORT") {
            match val.parse() {
                Ok(port) => self.bind_port = port,
                Err(_) => log::warn!("Ignoring invalid ICEWIRE_BIND_PORT: {}", val),
            }
        }

        if let Some(host) = var("ICEWIRE_ADVERTISE_HOST") {
            self.advertise_host = Some(host);
        }

        if let Some(password) = var("ICEWIRE_SOURCE_PASSWORD") {
            self.core.source_password = password;
        }

        if let Some(password) = var("ICEWIRE_ADMIN_PASSWORD") {
            self.core.admin_password = password;
        }

        // Turns the first mount into a relay of the given URL.
        if let Some(url) = var("ICEWIRE_RELAY_URL") {
            match self.core.mounts.first_mut() {
                Some(mount) => {
                    mount.source_type = SourceType::Relay;
                    mount.relay_url = Some(url);
                }
                None => self.core.mounts.push(MountConfig::relay("/stream", url)),
            }
        }
    }

    /// Converts to icewire-core's Config type.
    pub fn to_core_config(&self) -> Config {
        self.core.clone()
    }
}
