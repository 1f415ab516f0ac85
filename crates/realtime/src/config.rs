//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use testpilot_common::{protocol, Error, Result};

use crate::credentials::{AUTH_TOKEN_KEY, SESSION_KEY};

/// Realtime client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the realtime server (http, https, ws or wss)
    pub url: String,

    /// Socket.IO mount path
    pub path: String,

    /// Client-side bound on a single connect attempt
    pub connect_timeout_ms: u64,

    /// Handshake timeout handed to the transport
    pub transport_timeout_ms: u64,

    /// Reconnect backoff configuration
    pub reconnect: ReconnectConfig,

    /// Credential lookup configuration
    pub credentials: CredentialsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
            path: protocol::DEFAULT_PATH.to_string(),
            connect_timeout_ms: 10_000,
            transport_timeout_ms: 10_000,
            reconnect: ReconnectConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub base_delay_ms: u64,

    /// Growth factor applied per attempt
    pub multiplier: u32,

    /// Attempts made before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2,
            max_attempts: 5,
        }
    }
}

/// Where stored session tokens are looked up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Local key/value storage file
    pub storage_path: PathBuf,

    /// Storage keys tried in order
    pub keys: Vec<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            storage_path: testpilot_common::default_storage_path(),
            keys: vec![AUTH_TOKEN_KEY.to_string(), SESSION_KEY.to_string()],
        }
    }
}

impl ClientConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the client cannot run with
    pub fn validate(&self) -> Result<()> {
        protocol::websocket_endpoint(&self.url, &self.path)?;

        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.reconnect.multiplier == 0 {
            return Err(Error::InvalidConfig(
                "reconnect.multiplier must be at least 1".to_string(),
            ));
        }
        if self.credentials.keys.is_empty() {
            return Err(Error::InvalidConfig(
                "credentials.keys must name at least one storage key".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnect.base_delay_ms, 1000);
        assert_eq!(config.reconnect.multiplier, 2);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.credentials.keys, vec!["sb-auth-token", "sb-session"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.path, "/socket.io");
    }

    #[test]
    fn test_save_and_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ClientConfig::default();
        config.url = "https://realtime.example.com".to_string();
        config.reconnect.max_attempts = 3;
        config.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded.url, "https://realtime.example.com");
        assert_eq!(loaded.reconnect.max_attempts, 3);

        // Omitted sections fall back to defaults
        std::fs::write(&path, "url = \"http://localhost:9000\"\n").unwrap();
        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded.url, "http://localhost:9000");
        assert_eq!(loaded.reconnect.base_delay_ms, 1000);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "url = \"ftp://example.com\"\n").unwrap();
        assert!(matches!(
            ClientConfig::load(&path),
            Err(Error::InvalidConfig(_))
        ));

        std::fs::write(&path, "[reconnect]\nmultiplier = 0\n").unwrap();
        assert!(ClientConfig::load(&path).is_err());
    }
}
