//! Realtime client construction from CLI settings

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use testpilot_realtime::{
    ClientConfig, CredentialProvider, LocalStorage, RealtimeClient, StaticToken, StoredSession,
};
use tracing::debug;

/// Time given to the socket task to flush queued frames before exit
pub const FLUSH_GRACE: Duration = Duration::from_millis(200);

/// Connection settings gathered from flags and the environment
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Config file; the default location when `None`
    pub config_path: Option<PathBuf>,
    /// Overrides the configured server URL
    pub url: Option<String>,
    /// Static access token; takes precedence over the stored session
    pub token: Option<String>,
}

impl Settings {
    pub fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(testpilot_common::default_config_path)
    }

    /// Effective client configuration
    pub fn load_config(&self) -> Result<ClientConfig> {
        let path = self.config_path();
        let mut config = ClientConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        if let Some(url) = &self.url {
            debug!("Overriding server URL with {}", url);
            config.url = url.clone();
            config.validate()?;
        }
        Ok(config)
    }

    /// Token source for this invocation
    pub fn credentials(&self, config: &ClientConfig) -> Arc<dyn CredentialProvider> {
        match self.token.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(token) => {
                debug!("Using access token from the environment");
                Arc::new(StaticToken::new(token))
            }
            None => stored_session(&config.credentials.storage_path, &config.credentials.keys),
        }
    }

    /// Build a client without connecting it
    pub fn client(&self) -> Result<RealtimeClient> {
        let config = self.load_config()?;
        let credentials = self.credentials(&config);
        Ok(RealtimeClient::new(config, credentials))
    }

    /// Build a client and wait for it to connect
    pub async fn connect(&self) -> Result<RealtimeClient> {
        let client = self.client()?;
        client
            .connect()
            .await
            .with_context(|| format!("Failed to connect to {}", client.config().url))?;
        Ok(client)
    }
}

fn stored_session(path: &Path, keys: &[String]) -> Arc<dyn CredentialProvider> {
    Arc::new(StoredSession::with_keys(
        LocalStorage::new(path),
        keys.to_vec(),
    ))
}

/// Close the connection, leaving time for queued frames to go out
pub async fn shutdown(client: &RealtimeClient) {
    tokio::time::sleep(FLUSH_GRACE).await;
    client.disconnect();
}
