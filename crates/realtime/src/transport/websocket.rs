//! Socket.IO over WebSocket transport
//!
//! Pinned to the websocket transport: no HTTP long-polling and no upgrade.
//! One background task owns the socket; the handle talks to it over a
//! channel so `emit` never waits on the network.

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use testpilot_common::protocol::{self, EnginePacket, OpenHandshake, SocketPacket};
use testpilot_common::{Error, Result};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::{
    Connector, DisconnectReason, Transport, TransportEvent, TransportHandle, TransportOptions,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

enum Outbound {
    Frame(String),
    Close,
}

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    id: RwLock<Option<String>>,
}

/// Opens Socket.IO connections over WebSocket
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, options: TransportOptions) -> Result<TransportHandle> {
        let endpoint = protocol::websocket_endpoint(&options.url, &options.path)?;
        debug!("Opening websocket transport to {}", endpoint);

        let (event_tx, events) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let task = tokio::spawn(run(
            endpoint.to_string(),
            options,
            shared.clone(),
            outbound_rx,
            event_tx,
        ));

        let transport = Arc::new(WebSocketTransport {
            shared,
            outbound,
            task: Mutex::new(Some(task)),
        });

        Ok(TransportHandle { transport, events })
    }
}

/// Handle to one websocket connection
pub struct WebSocketTransport {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport for WebSocketTransport {
    fn id(&self) -> Option<String> {
        self.shared.id.read().clone()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn emit(&self, event: &str, payload: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let frame = SocketPacket::event(event, payload).to_frame()?;
        trace!("Queueing frame: {}", frame);
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| Error::NotConnected)
    }

    fn close(&self) {
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            // Let the socket task say goodbye
            let _ = self.outbound.send(Outbound::Close);
        } else if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(
    endpoint: String,
    options: TransportOptions,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let established = match timeout(options.timeout, establish(&endpoint, &options.token)).await {
        Ok(Ok(established)) => established,
        Ok(Err(e)) => {
            let message = match e {
                Error::ConnectFailed(message) => message,
                other => other.to_string(),
            };
            debug!("Handshake with {} failed: {}", endpoint, message);
            let _ = events.send(TransportEvent::ConnectError { message });
            return;
        }
        Err(_) => {
            debug!("Handshake with {} timed out", endpoint);
            let _ = events.send(TransportEvent::ConnectError {
                message: "timeout".to_string(),
            });
            return;
        }
    };

    let (ws, handshake, id) = established;
    *shared.id.write() = Some(id.clone());
    shared.connected.store(true, Ordering::Release);
    let _ = events.send(TransportEvent::Connected { id });

    let reason = session(ws, &handshake, outbound, &events).await;
    shared.connected.store(false, Ordering::Release);
    debug!("Websocket session ended: {}", reason);

    if reason != DisconnectReason::ClientDisconnect {
        let _ = events.send(TransportEvent::Disconnected { reason });
    }
}

/// Engine.IO open followed by the Socket.IO CONNECT exchange
async fn establish(endpoint: &str, token: &str) -> Result<(WsStream, OpenHandshake, String)> {
    let (mut ws, _) = connect_async(endpoint)
        .await
        .map_err(|e| Error::ConnectFailed(e.to_string()))?;

    let handshake = loop {
        match next_packet(&mut ws).await? {
            EnginePacket::Open(handshake) => break handshake,
            other => trace!("Ignoring {:?} before open", other),
        }
    };
    trace!(
        "Engine.IO session {} (ping interval {}ms)",
        handshake.sid,
        handshake.ping_interval
    );

    let connect = SocketPacket::connect(Some(json!({ "token": token }))).to_frame()?;
    ws.send(Message::Text(connect)).await.map_err(ws_error)?;

    loop {
        match next_packet(&mut ws).await? {
            EnginePacket::Ping => {
                ws.send(Message::Text(EnginePacket::Pong.encode()?))
                    .await
                    .map_err(ws_error)?;
            }
            EnginePacket::Message(payload) => match SocketPacket::decode(&payload)? {
                SocketPacket::Connect { data, .. } => {
                    let id = data
                        .as_ref()
                        .and_then(|d| d.get("sid"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| handshake.sid.clone());
                    return Ok((ws, handshake, id));
                }
                SocketPacket::ConnectError { message, .. } => {
                    return Err(Error::ConnectFailed(message));
                }
                other => trace!("Ignoring {:?} during handshake", other),
            },
            EnginePacket::Close => {
                return Err(Error::ConnectFailed("transport close".to_string()));
            }
            _ => {}
        }
    }
}

async fn next_packet(ws: &mut WsStream) -> Result<EnginePacket> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return EnginePacket::decode(&text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(Error::ConnectFailed("transport close".to_string()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ws_error(e)),
        }
    }
}

async fn session(
    ws: WsStream,
    handshake: &OpenHandshake,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> DisconnectReason {
    let (mut sink, mut stream) = ws.split();
    let window = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let mut deadline = Instant::now() + window;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text) {
                    Ok(EnginePacket::Ping) => {
                        deadline = Instant::now() + window;
                        if let Err(e) = send_frame(&mut sink, EnginePacket::Pong.encode()).await {
                            return DisconnectReason::TransportError(e.to_string());
                        }
                    }
                    Ok(EnginePacket::Message(payload)) => {
                        if let Some(reason) = deliver(&payload, events) {
                            return reason;
                        }
                    }
                    Ok(EnginePacket::Close) => return DisconnectReason::TransportClose,
                    Ok(other) => trace!("Ignoring {:?}", other),
                    Err(e) => warn!("Dropping malformed frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return DisconnectReason::TransportClose,
                Some(Ok(_)) => {}
                Some(Err(e)) => return DisconnectReason::TransportError(e.to_string()),
            },
            command = outbound.recv() => match command {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = send_frame(&mut sink, Ok(frame)).await {
                        return DisconnectReason::TransportError(e.to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = send_frame(&mut sink, SocketPacket::disconnect().to_frame()).await;
                    let _ = sink.close().await;
                    return DisconnectReason::ClientDisconnect;
                }
            },
            _ = sleep_until(deadline) => return DisconnectReason::PingTimeout,
        }
    }
}

/// Forward one Socket.IO packet; returns a reason when it ends the session
fn deliver(
    payload: &str,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Option<DisconnectReason> {
    match SocketPacket::decode(payload) {
        Ok(SocketPacket::Event { name, args, .. }) => {
            let payload = args.into_iter().next().unwrap_or(Value::Null);
            let _ = events.send(TransportEvent::Message { name, payload });
            None
        }
        Ok(SocketPacket::Disconnect { .. }) => Some(DisconnectReason::ServerDisconnect),
        Ok(other) => {
            trace!("Ignoring {:?}", other);
            None
        }
        Err(e) => {
            warn!("Dropping malformed packet: {}", e);
            None
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: Result<String>) -> Result<()> {
    sink.send(Message::Text(frame?)).await.map_err(ws_error)
}

fn ws_error(e: tungstenite::Error) -> Error {
    Error::WebSocket(e.to_string())
}
