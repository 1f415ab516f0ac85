//! Mock realtime server - an axum WebSocket endpoint speaking Socket.IO

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use testpilot_common::protocol::{EnginePacket, OpenHandshake, SocketPacket, DEFAULT_NAMESPACE};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{E2eError, E2eResult};

/// Configuration for the mock server
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Only this token is accepted; any non-empty token when `None`
    pub accepted_token: Option<String>,

    /// Heartbeat period announced in the open handshake
    pub ping_interval: Duration,

    /// Heartbeat grace announced in the open handshake
    pub ping_timeout: Duration,

    /// Whether the server actually sends heartbeats
    pub send_pings: bool,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            accepted_token: None,
            ping_interval: Duration::from_millis(25_000),
            ping_timeout: Duration::from_millis(20_000),
            send_pings: true,
        }
    }
}

/// An event a client sent to the server
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub sid: String,
    pub name: String,
    pub payload: Value,
}

enum Command {
    Frame(String),
    /// Socket.IO disconnect, then close
    Disconnect,
    /// Vanish without a goodbye
    Drop,
}

struct ServerState {
    config: MockServerConfig,
    sessions: Mutex<HashMap<String, mpsc::UnboundedSender<Command>>>,
    received: Mutex<Vec<Received>>,
    auth: Mutex<Vec<Value>>,
    rejection: Mutex<Option<String>>,
    pongs: AtomicUsize,
    changed: Notify,
}

impl ServerState {
    fn touch(&self) {
        self.changed.notify_waiters();
    }

    /// Why a handshake with this auth object is refused, if it is
    fn refuse(&self, auth: &Value) -> Option<String> {
        if let Some(message) = self.rejection.lock().clone() {
            return Some(message);
        }

        let token = auth.get("token").and_then(Value::as_str).unwrap_or("");
        match &self.config.accepted_token {
            Some(expected) if token != expected => Some("Authentication failed".to_string()),
            None if token.is_empty() => Some("Authentication required".to_string()),
            _ => None,
        }
    }

    fn broadcast(&self, make: impl Fn() -> Command) -> usize {
        let sessions = self.sessions.lock();
        sessions
            .values()
            .filter(|tx| tx.send(make()).is_ok())
            .count()
    }
}

/// In-process Socket.IO server for end-to-end tests
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Bind to a free local port and start serving
    pub async fn start(config: MockServerConfig) -> E2eResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| {
            E2eError::ServerStartup(format!("Failed to bind mock server: {}", e))
        })?;
        let addr = listener.local_addr()?;

        let state = Arc::new(ServerState {
            config,
            sessions: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
            auth: Mutex::new(Vec::new()),
            rejection: Mutex::new(None),
            pongs: AtomicUsize::new(0),
            changed: Notify::new(),
        });

        let app = Router::new()
            .route("/socket.io/", get(upgrade_handler))
            .with_state(state.clone());

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Mock server stopped: {}", e);
            }
        });

        info!("Mock realtime server listening on {}", addr);
        Ok(Self { addr, state, task })
    }

    /// Base URL for client configuration
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Push an event to every connected client; returns how many got it
    pub fn emit(&self, name: &str, payload: Value) -> E2eResult<usize> {
        let frame = SocketPacket::event(name, payload).to_frame()?;
        Ok(self.state.broadcast(|| Command::Frame(frame.clone())))
    }

    /// Server-initiated disconnect of every client
    pub fn disconnect_all(&self) -> usize {
        self.state.broadcast(|| Command::Disconnect)
    }

    /// Drop every connection without a disconnect packet
    pub fn drop_all(&self) -> usize {
        self.state.broadcast(|| Command::Drop)
    }

    /// Refuse every following handshake with `message`; `None` accepts again
    pub fn reject_handshakes(&self, message: Option<&str>) {
        *self.state.rejection.lock() = message.map(str::to_string);
    }

    pub fn connection_count(&self) -> usize {
        self.state.sessions.lock().len()
    }

    /// Auth objects of every handshake attempted so far
    pub fn handshakes(&self) -> Vec<Value> {
        self.state.auth.lock().clone()
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().clone()
    }

    /// Received events with this name, payloads only
    pub fn received_named(&self, name: &str) -> Vec<Value> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|r| r.name == name)
            .map(|r| r.payload.clone())
            .collect()
    }

    pub fn pong_count(&self) -> usize {
        self.state.pongs.load(Ordering::SeqCst)
    }

    /// Wait until `condition` holds, re-checking on every server-side change
    pub async fn wait_for(
        &self,
        what: &str,
        timeout: Duration,
        condition: impl Fn(&Self) -> bool,
    ) -> E2eResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let changed = self.state.changed.notified();
            if condition(self) {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return Err(E2eError::Timeout(what.to_string()));
            }
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn upgrade_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    if query.get("transport").map(String::as_str) != Some("websocket") {
        return (StatusCode::BAD_REQUEST, "Only the websocket transport is supported")
            .into_response();
    }
    if query.get("EIO").map(String::as_str) != Some("4") {
        return (StatusCode::BAD_REQUEST, "Unsupported protocol version").into_response();
    }

    ws.on_upgrade(move |socket| async move {
        if let Err(e) = serve_socket(socket, state).await {
            warn!("Mock session error: {}", e);
        }
    })
}

async fn serve_socket(mut socket: WebSocket, state: Arc<ServerState>) -> E2eResult<()> {
    let open = EnginePacket::Open(OpenHandshake {
        sid: Uuid::new_v4().to_string(),
        upgrades: Vec::new(),
        ping_interval: state.config.ping_interval.as_millis() as u64,
        ping_timeout: state.config.ping_timeout.as_millis() as u64,
        max_payload: 1_000_000,
    });
    socket.send(Message::Text(open.encode()?)).await?;

    let auth = loop {
        match next_packet(&mut socket).await? {
            Some(EnginePacket::Message(payload)) => match SocketPacket::decode(&payload)? {
                SocketPacket::Connect { data, .. } => break data.unwrap_or(Value::Null),
                other => debug!("Ignoring {:?} before connect", other),
            },
            Some(_) => {}
            None => return Ok(()),
        }
    };
    state.auth.lock().push(auth.clone());

    if let Some(message) = state.refuse(&auth) {
        debug!("Refusing handshake: {}", message);
        let refusal = SocketPacket::ConnectError {
            namespace: DEFAULT_NAMESPACE.to_string(),
            message,
        };
        socket.send(Message::Text(refusal.to_frame()?)).await?;
        let _ = socket.send(Message::Close(None)).await;
        state.touch();
        return Ok(());
    }

    let sid = Uuid::new_v4().to_string();
    let accepted = SocketPacket::Connect {
        namespace: DEFAULT_NAMESPACE.to_string(),
        data: Some(json!({ "sid": sid })),
    };
    socket.send(Message::Text(accepted.to_frame()?)).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    state.sessions.lock().insert(sid.clone(), tx);
    state.touch();
    debug!("Client {} connected", sid);

    let result = session_loop(socket, &state, &sid, rx).await;

    state.sessions.lock().remove(&sid);
    state.touch();
    debug!("Client {} gone", sid);
    result
}

async fn session_loop(
    socket: WebSocket,
    state: &ServerState,
    sid: &str,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> E2eResult<()> {
    let (mut sink, mut stream) = socket.split();
    let period = state.config.ping_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = heartbeat.tick(), if state.config.send_pings => {
                sink.send(Message::Text(EnginePacket::Ping.encode()?)).await?;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text)? {
                    EnginePacket::Pong => {
                        state.pongs.fetch_add(1, Ordering::SeqCst);
                        state.touch();
                    }
                    EnginePacket::Message(payload) => match SocketPacket::decode(&payload)? {
                        SocketPacket::Event { name, args, .. } => {
                            let payload = args.into_iter().next().unwrap_or(Value::Null);
                            state.received.lock().push(Received {
                                sid: sid.to_string(),
                                name,
                                payload,
                            });
                            state.touch();
                        }
                        SocketPacket::Disconnect { .. } => return Ok(()),
                        other => debug!("Ignoring {:?}", other),
                    },
                    EnginePacket::Close => return Ok(()),
                    _ => {}
                },
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            command = commands.recv() => match command {
                Some(Command::Frame(frame)) => sink.send(Message::Text(frame)).await?,
                Some(Command::Disconnect) => {
                    sink.send(Message::Text(SocketPacket::disconnect().to_frame()?))
                        .await?;
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(Command::Drop) | None => return Ok(()),
            },
        }
    }
}

async fn next_packet(socket: &mut WebSocket) -> E2eResult<Option<EnginePacket>> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(EnginePacket::decode(&text)?)),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}
