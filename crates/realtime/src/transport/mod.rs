//! Push-channel transport abstraction
//!
//! A [`Connector`] opens a transport and hands back the transport handle plus
//! a stream of [`TransportEvent`]s. Opening never blocks: the connection
//! proceeds in the background and its outcome arrives as an event.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use testpilot_common::Result;
use tokio::sync::mpsc;

pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use websocket::WebSocketConnector;

/// Why an established transport went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the socket deliberately
    ServerDisconnect,
    /// This client closed the socket
    ClientDisconnect,
    /// The underlying connection was closed
    TransportClose,
    /// The underlying connection failed
    TransportError(String),
    /// The server stopped answering heartbeats
    PingTimeout,
}

impl DisconnectReason {
    /// Whether the server intentionally ended the session
    pub fn is_server_initiated(&self) -> bool {
        matches!(self, DisconnectReason::ServerDisconnect)
    }

    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::ServerDisconnect => "io server disconnect",
            DisconnectReason::ClientDisconnect => "io client disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError(_) => "transport error",
            DisconnectReason::PingTimeout => "ping timeout",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle and message notifications from a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake acknowledged; `id` is the server-assigned connection id
    Connected { id: String },
    /// Handshake failed; nothing further follows
    ConnectError { message: String },
    /// An established connection went away; nothing further follows
    Disconnected { reason: DisconnectReason },
    /// Named server push
    Message { name: String, payload: Value },
}

/// Parameters for opening a transport
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Server base URL
    pub url: String,
    /// Socket.IO mount path
    pub path: String,
    /// Bearer token sent in the handshake auth object
    pub token: String,
    /// Handshake timeout
    pub timeout: Duration,
}

/// Live connection handle
pub trait Transport: Send + Sync {
    /// Server-assigned id once connected
    fn id(&self) -> Option<String>;

    fn is_connected(&self) -> bool;

    /// Queue a named message for the server; never waits for delivery
    fn emit(&self, event: &str, payload: Value) -> Result<()>;

    /// Close the connection; a client-initiated close is not reported as an event
    fn close(&self);
}

/// Result of opening a transport
pub struct TransportHandle {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory for transports
pub trait Connector: Send + Sync {
    fn open(&self, options: TransportOptions) -> Result<TransportHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_server_disconnect_is_deliberate() {
        assert!(DisconnectReason::ServerDisconnect.is_server_initiated());
        for reason in [
            DisconnectReason::ClientDisconnect,
            DisconnectReason::TransportClose,
            DisconnectReason::TransportError("reset".into()),
            DisconnectReason::PingTimeout,
        ] {
            assert!(!reason.is_server_initiated(), "{}", reason);
        }
    }

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(
            DisconnectReason::ServerDisconnect.to_string(),
            "io server disconnect"
        );
        assert_eq!(DisconnectReason::PingTimeout.to_string(), "ping timeout");
    }
}
