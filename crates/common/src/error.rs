//! Error types for TestPilot realtime

use thiserror::Error;

/// Result type alias using the TestPilot Error
pub type Result<T> = std::result::Result<T, Error>;

/// TestPilot realtime error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("No authentication token available")]
    MissingToken,

    #[error("Connection timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,

    #[error("Not connected to realtime server")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error came from the connect handshake rather than local setup
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Error::MissingToken | Error::Timeout { .. } | Error::ConnectFailed(_)
        )
    }
}
