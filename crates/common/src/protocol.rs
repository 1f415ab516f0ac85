//! Socket.IO wire codec
//!
//! Encodes and decodes the two framing layers spoken over the push channel:
//! Engine.IO v4 packets carried as WebSocket text frames, and Socket.IO v5
//! packets carried inside Engine.IO `message` packets. Binary attachments are
//! not supported.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Engine.IO protocol revision
pub const ENGINE_IO_VERSION: u8 = 4;

/// Namespace used when none is given
pub const DEFAULT_NAMESPACE: &str = "/";

/// Default mount path of the Socket.IO endpoint
pub const DEFAULT_PATH: &str = "/socket.io";

/// Handshake sent by the server in the Engine.IO `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: u64,
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    /// Socket.IO payload, still encoded
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Encode as a WebSocket text frame
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            EnginePacket::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Message(payload) => format!("4{}", payload),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        })
    }

    /// Decode a WebSocket text frame
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::Protocol("empty engine.io packet".to_string()))?;
        let rest = chars.as_str();

        match kind {
            '0' => {
                let handshake = serde_json::from_str(rest)
                    .map_err(|e| Error::Protocol(format!("invalid open handshake: {}", e)))?;
                Ok(EnginePacket::Open(handshake))
            }
            '1' => Ok(EnginePacket::Close),
            // Probe payloads only matter for transport upgrades
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(rest.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(Error::Protocol(format!(
                "unknown engine.io packet type '{}'",
                other
            ))),
        }
    }
}

/// Socket.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl SocketPacket {
    /// CONNECT on the default namespace carrying an auth object
    pub fn connect(auth: Option<Value>) -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: auth,
        }
    }

    /// EVENT on the default namespace with a single payload argument
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        SocketPacket::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            name: name.into(),
            args: vec![payload],
        }
    }

    pub fn disconnect() -> Self {
        SocketPacket::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    fn type_code(&self) -> char {
        match self {
            SocketPacket::Connect { .. } => '0',
            SocketPacket::Disconnect { .. } => '1',
            SocketPacket::Event { .. } => '2',
            SocketPacket::Ack { .. } => '3',
            SocketPacket::ConnectError { .. } => '4',
        }
    }

    /// Encode as the body of an Engine.IO message packet
    pub fn encode(&self) -> Result<String> {
        let mut out = String::new();
        out.push(self.type_code());

        let namespace = self.namespace();
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }

        match self {
            SocketPacket::Connect { data, .. } => {
                if let Some(data) = data {
                    out.push_str(&serde_json::to_string(data)?);
                }
            }
            SocketPacket::Disconnect { .. } => {}
            SocketPacket::Event { id, name, args, .. } => {
                if let Some(id) = id {
                    out.push_str(&id.to_string());
                }
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                out.push_str(&serde_json::to_string(&array)?);
            }
            SocketPacket::Ack { id, args, .. } => {
                out.push_str(&id.to_string());
                out.push_str(&serde_json::to_string(args)?);
            }
            SocketPacket::ConnectError { message, .. } => {
                out.push_str(&serde_json::to_string(&serde_json::json!({ "message": message }))?);
            }
        }

        Ok(out)
    }

    /// Encode wrapped in an Engine.IO message packet, ready for the socket
    pub fn to_frame(&self) -> Result<String> {
        EnginePacket::Message(self.encode()?).encode()
    }

    /// Decode the body of an Engine.IO message packet
    pub fn decode(payload: &str) -> Result<Self> {
        let mut chars = payload.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::Protocol("empty socket.io packet".to_string()))?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(Error::Protocol(
                "binary socket.io packets are not supported".to_string(),
            ));
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let ns = &rest[..idx];
                    rest = &rest[idx + 1..];
                    ns.to_string()
                }
                None => {
                    let ns = rest.to_string();
                    rest = "";
                    ns
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let parsed = rest[..digits]
                .parse::<u64>()
                .map_err(|e| Error::Protocol(format!("invalid ack id: {}", e)))?;
            rest = &rest[digits..];
            Some(parsed)
        } else {
            None
        };

        let body = || -> Result<Option<Value>> {
            if rest.is_empty() {
                Ok(None)
            } else {
                serde_json::from_str(rest)
                    .map(Some)
                    .map_err(|e| Error::Protocol(format!("invalid packet body: {}", e)))
            }
        };

        match kind {
            '0' => Ok(SocketPacket::Connect {
                namespace,
                data: body()?,
            }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let args = match body()? {
                    Some(Value::Array(args)) => args,
                    _ => {
                        return Err(Error::Protocol(
                            "event packet body must be an array".to_string(),
                        ))
                    }
                };
                let mut args = args.into_iter();
                let name = match args.next() {
                    Some(Value::String(name)) => name,
                    _ => {
                        return Err(Error::Protocol(
                            "event packet must start with a name".to_string(),
                        ))
                    }
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    args: args.collect(),
                })
            }
            '3' => {
                let id = id.ok_or_else(|| Error::Protocol("ack packet without id".to_string()))?;
                let args = match body()? {
                    Some(Value::Array(args)) => args,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                Ok(SocketPacket::Ack {
                    namespace,
                    id,
                    args,
                })
            }
            '4' => {
                let message = match body()? {
                    Some(Value::String(message)) => message,
                    Some(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("connect error")
                        .to_string(),
                    _ => "connect error".to_string(),
                };
                Ok(SocketPacket::ConnectError { namespace, message })
            }
            other => Err(Error::Protocol(format!(
                "unknown socket.io packet type '{}'",
                other
            ))),
        }
    }
}

/// Build the WebSocket endpoint for a server base URL.
///
/// `http`/`https` map to `ws`/`wss`; the transport is pinned to websocket.
pub fn websocket_endpoint(base: &str, path: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::InvalidConfig(format!(
                "unsupported URL scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::InvalidConfig(format!("cannot use scheme {} for {}", scheme, base)))?;

    let path = format!("/{}/", path.trim_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", &ENGINE_IO_VERSION.to_string())
        .append_pair("transport", "websocket");

    Ok(url)
}
