//! Credential providers
//!
//! The client never reads tokens itself; it asks a [`CredentialProvider`]
//! each time it opens a transport.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use testpilot_common::Result;
use tracing::{debug, warn};

/// Primary storage key holding the signed-in session
pub const AUTH_TOKEN_KEY: &str = "sb-auth-token";

/// Fallback storage key holding the signed-in session
pub const SESSION_KEY: &str = "sb-session";

/// Source of the bearer token attached to the transport handshake
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current access token, `None` when signed out
    async fn token(&self) -> Option<String>;
}

/// Fixed token, e.g. from the environment
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        if self.0.trim().is_empty() {
            None
        } else {
            Some(self.0.clone())
        }
    }
}

/// Persistent string key/value storage backed by a JSON file
#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Map::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the raw value stored under `key`
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all().await?.remove(key))
    }

    /// Store `value` under `key`, creating the file when needed
    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&entries)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Remove `key`, returning whether it was present
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.read_all().await?;
        let removed = entries.remove(key).is_some();
        if removed {
            tokio::fs::write(&self.path, serde_json::to_string_pretty(&entries)?).await?;
        }
        Ok(removed)
    }
}

/// Reads the access token of a stored session, trying each key in order
#[derive(Debug, Clone)]
pub struct StoredSession {
    storage: LocalStorage,
    keys: Vec<String>,
}

impl StoredSession {
    /// Provider over the default `sb-auth-token` / `sb-session` keys
    pub fn new(storage: LocalStorage) -> Self {
        Self::with_keys(
            storage,
            vec![AUTH_TOKEN_KEY.to_string(), SESSION_KEY.to_string()],
        )
    }

    pub fn with_keys(storage: LocalStorage, keys: Vec<String>) -> Self {
        Self { storage, keys }
    }
}

#[async_trait]
impl CredentialProvider for StoredSession {
    async fn token(&self) -> Option<String> {
        for key in &self.keys {
            let value = match self.storage.get(key).await {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Failed to read {} from {}: {}", key, self.storage.path().display(), e);
                    continue;
                }
            };

            match access_token(&value) {
                Some(token) => {
                    debug!("Using access token from {}", key);
                    return Some(token);
                }
                None => debug!("No usable access token under {}", key),
            }
        }
        None
    }
}

/// Extract `access_token` from a stored session blob.
///
/// Browsers keep the session as a JSON-encoded string; a plain object is
/// accepted as well.
fn access_token(value: &Value) -> Option<String> {
    let parsed;
    let session = match value {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw).ok()?;
            &parsed
        }
        other => other,
    };

    session
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
