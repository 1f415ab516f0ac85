//! TestPilot Common Library
//!
//! Shared types, wire codec and error handling for the TestPilot realtime
//! event client and its tooling.

pub mod error;
pub mod protocol;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use protocol::{EnginePacket, OpenHandshake, SocketPacket};
pub use types::*;

/// TestPilot version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".testpilot")
}

/// Default client configuration path
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Default local key/value storage holding the signed-in session
pub fn default_storage_path() -> std::path::PathBuf {
    default_store_path().join("storage.json")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
