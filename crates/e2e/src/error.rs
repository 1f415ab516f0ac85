//! Error types for E2E testing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] testpilot_common::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] axum::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
