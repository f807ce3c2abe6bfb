//! TOML configuration with full defaults.
//!
//! Every field has a default so a missing `config.toml` yields a working
//! setup: dashboard on 127.0.0.1:3000, images under `./images`, session
//! credentials under `./auth`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,
    #[serde(default = "default_auth_dir")]
    pub auth_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            images_dir: default_images_dir(),
            auth_dir: default_auth_dir(),
        }
    }
}

/// Where to find the external messaging bridge binary. When unset, discovery
/// falls back to `SNAPFILE_BRIDGE_BIN`, well-known workspace paths, and PATH.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub binary: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Consecutive failed sessions before giving up. 0 = retry forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_images_dir() -> PathBuf {
    PathBuf::from("./images")
}
fn default_auth_dir() -> PathBuf {
    PathBuf::from("./auth")
}
fn default_max_attempts() -> u32 {
    10
}
fn default_initial_backoff_secs() -> u64 {
    5
}
fn default_max_backoff_secs() -> u64 {
    60
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config::load(&temp.path().join("config.toml")).unwrap();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.storage.images_dir, PathBuf::from("./images"));
        assert_eq!(config.storage.auth_dir, PathBuf::from("./auth"));
        assert_eq!(config.reconnect.max_attempts, 10);
    }

    #[test]
    fn partial_file_keeps_unset_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nport = 8080\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.reconnect.initial_backoff_secs, 5);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "gateway = not valid").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
