//! Realtime event client
//!
//! Owns at most one push-channel connection, authenticates it, recovers
//! from unsolicited drops with bounded exponential backoff, tracks topic
//! subscriptions and fans inbound events out to listeners.
//!
//! Construct one [`RealtimeClient`] at startup and share clones of it; all
//! clones drive the same connection.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use testpilot_common::{
    BrowserCommand, BrowserCommandMessage, ConnectionState, ConnectionStateUpdate, Error,
    EventKind, InboundEvent, PlaybackAction, RecordingAction, ReplayAction, ReplayControlMessage,
    Result, SessionControlMessage, Topic,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::ReconnectPolicy;
use crate::config::ClientConfig;
use crate::credentials::{CredentialProvider, LocalStorage, StoredSession};
use crate::listeners::{ListenerId, ListenerRegistry};
use crate::subscriptions::{SubscriptionRegistry, SubscriptionSnapshot};
use crate::transport::{
    Connector, DisconnectReason, Transport, TransportEvent, TransportOptions, WebSocketConnector,
};

/// Terminal error once the reconnect budget is spent
pub const MAX_RECONNECT_ERROR: &str = "Max reconnection attempts reached";

/// Shared handle to the realtime connection
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

struct Session {
    generation: u64,
    transport: Arc<dyn Transport>,
    pump: JoinHandle<()>,
}

struct PendingConnect {
    generation: u64,
    reply: oneshot::Sender<Result<String>>,
}

struct Inner {
    config: ClientConfig,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    state: Mutex<ConnectionState>,
    session: Mutex<Option<Session>>,
    pending: Mutex<Option<PendingConnect>>,
    generation: AtomicU64,
    subscriptions: Mutex<SubscriptionRegistry>,
    listeners: ListenerRegistry,
    reconnect_attempts: AtomicU32,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeClient {
    /// Client over the websocket transport, reading tokens from stored sessions
    pub fn from_config(config: ClientConfig) -> Self {
        let storage = LocalStorage::new(config.credentials.storage_path.clone());
        let credentials = StoredSession::with_keys(storage, config.credentials.keys.clone());
        Self::new(config, Arc::new(credentials))
    }

    /// Client over the websocket transport
    pub fn new(config: ClientConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_connector(config, credentials, Arc::new(WebSocketConnector::new()))
    }

    /// Client over an arbitrary transport
    pub fn with_connector(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let policy = ReconnectPolicy::from(&config.reconnect);
        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                connector,
                credentials,
                state: Mutex::new(ConnectionState::default()),
                session: Mutex::new(None),
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
                subscriptions: Mutex::new(SubscriptionRegistry::new()),
                listeners: ListenerRegistry::new(),
                reconnect_attempts: AtomicU32::new(0),
                reconnect_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open and authenticate the connection.
    ///
    /// Returns immediately when already connected. Fails when no token is
    /// available, when the server rejects the handshake, when no outcome
    /// arrives within the connect timeout, or when [`disconnect`] is called
    /// while the attempt is in flight.
    ///
    /// [`disconnect`]: RealtimeClient::disconnect
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            debug!("Already connected, skipping connect");
            return Ok(());
        }

        self.inner.update_state(ConnectionStateUpdate::connecting());

        // Bumped by disconnect() and by any newer connect()
        let started = self.inner.current_generation();
        let mut opened = None;
        let limit = self.inner.config.connect_timeout();

        let attempt = async {
            let Some(token) = self.inner.credentials.token().await else {
                warn!("Cannot connect: no authentication token available");
                self.inner
                    .update_state(ConnectionStateUpdate::failed(Error::MissingToken.to_string()));
                return Err(Error::MissingToken);
            };

            if self.inner.current_generation() != started {
                debug!("Connect superseded while looking up the token");
                return Err(Error::Cancelled);
            }

            let (reply, outcome) = oneshot::channel();
            let generation = match self.inner.open_session(token, reply) {
                Ok(generation) => generation,
                Err(e) => {
                    error!("Failed to open transport: {}", e);
                    self.inner
                        .update_state(ConnectionStateUpdate::failed(e.to_string()));
                    return Err(e);
                }
            };
            opened = Some(generation);

            match outcome.await {
                Ok(Ok(id)) => {
                    debug!("Connect resolved with connection id {}", id);
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::Cancelled),
            }
        };
        let result = tokio::time::timeout(limit, attempt).await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Connection attempt timed out after {:?}", limit);
                if let Some(generation) = opened {
                    self.inner.abandon_session(generation);
                }
                self.inner
                    .update_state(ConnectionStateUpdate::failed("Connection timeout"));
                Err(Error::Timeout {
                    seconds: limit.as_secs(),
                })
            }
        }
    }

    /// Close the connection and forget every subscription.
    ///
    /// Global event listeners and connection-state listeners stay registered.
    pub fn disconnect(&self) {
        if let Some(task) = self.inner.reconnect_task.lock().take() {
            task.abort();
        }
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.teardown_session();

        self.inner.update_state(ConnectionStateUpdate::reset());
        self.inner.subscriptions.lock().clear();
        self.inner.listeners.clear_executions();
        info!("Disconnected from realtime server");
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected && self.inner.connected_transport().is_some()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    pub fn active_subscriptions(&self) -> SubscriptionSnapshot {
        self.inner.subscriptions.lock().snapshot()
    }

    /// Reconnect attempts made since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    // Listener registration

    /// Listen for every inbound event of one kind
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.on(kind, Arc::new(callback))
    }

    pub fn off(&self, listener: ListenerId) -> bool {
        self.inner.listeners.off(listener)
    }

    pub fn on_connection_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.listeners.on_state(Arc::new(callback))
    }

    pub fn off_connection_change(&self, listener: ListenerId) -> bool {
        self.inner.listeners.off_state(listener)
    }

    // Subscriptions

    /// Ask the server to push events for an execution
    pub fn subscribe_to_execution(&self, execution_id: &str) -> bool {
        self.subscribe(Topic::Execution, execution_id)
    }

    /// Subscribe to an execution and receive its events on `callback`.
    ///
    /// Returns `None` without registering anything when not connected.
    pub fn subscribe_to_execution_with<F>(&self, execution_id: &str, callback: F) -> Option<ListenerId>
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        if !self.subscribe(Topic::Execution, execution_id) {
            return None;
        }
        Some(
            self.inner
                .listeners
                .on_execution(execution_id, Arc::new(callback)),
        )
    }

    /// Drop an execution subscription, and optionally one of its listeners
    pub fn unsubscribe_from_execution(&self, execution_id: &str, listener: Option<ListenerId>) {
        if let Some(listener) = listener {
            if !self.inner.listeners.off_execution(execution_id, listener) {
                debug!("{} was not registered for execution {}", listener, execution_id);
            }
        }
        self.unsubscribe(Topic::Execution, execution_id);
    }

    pub fn subscribe_to_browser_session(&self, session_id: &str) -> bool {
        self.subscribe(Topic::BrowserSession, session_id)
    }

    pub fn unsubscribe_from_browser_session(&self, session_id: &str) {
        self.unsubscribe(Topic::BrowserSession, session_id);
    }

    pub fn subscribe_to_recording(&self, session_id: &str) -> bool {
        self.subscribe(Topic::Recording, session_id)
    }

    pub fn unsubscribe_from_recording(&self, session_id: &str) {
        self.unsubscribe(Topic::Recording, session_id);
    }

    pub fn subscribe_to_playback(&self, session_id: &str) -> bool {
        self.subscribe(Topic::Playback, session_id)
    }

    pub fn unsubscribe_from_playback(&self, session_id: &str) {
        self.unsubscribe(Topic::Playback, session_id);
    }

    fn subscribe(&self, topic: Topic, id: &str) -> bool {
        let Some(transport) = self.inner.connected_transport() else {
            warn!("Cannot subscribe to {} {}: not connected", topic, id);
            return false;
        };

        self.inner.subscriptions.lock().insert(topic, id);
        if let Err(e) = transport.emit(topic.subscribe_event(), json!(id)) {
            warn!("Failed to send {} for {}: {}", topic.subscribe_event(), id, e);
        }
        debug!("Subscribed to {} {}", topic, id);
        true
    }

    fn unsubscribe(&self, topic: Topic, id: &str) {
        self.inner.subscriptions.lock().remove(topic, id);

        match self.inner.connected_transport() {
            Some(transport) => {
                if let Err(e) = transport.emit(topic.unsubscribe_event(), json!(id)) {
                    warn!("Failed to send {} for {}: {}", topic.unsubscribe_event(), id, e);
                }
            }
            None => debug!("Not connected, {} for {} kept local", topic.unsubscribe_event(), id),
        }
        debug!("Unsubscribed from {} {}", topic, id);
    }

    // Fire-and-forget commands

    /// Drive a remote browser session; returns whether the command was sent
    pub fn send_browser_command(
        &self,
        session_id: &str,
        command: BrowserCommand,
        parameters: Option<Value>,
    ) -> bool {
        self.send(
            "browser_command",
            &BrowserCommandMessage {
                session_id: session_id.to_string(),
                command,
                parameters,
            },
        )
    }

    pub fn send_recording_control(
        &self,
        session_id: &str,
        action: RecordingAction,
        parameters: Option<Value>,
    ) -> bool {
        self.send(
            "recording_control",
            &SessionControlMessage {
                session_id: session_id.to_string(),
                action,
                parameters,
            },
        )
    }

    pub fn send_playback_control(
        &self,
        session_id: &str,
        action: PlaybackAction,
        parameters: Option<Value>,
    ) -> bool {
        self.send(
            "playback_control",
            &SessionControlMessage {
                session_id: session_id.to_string(),
                action,
                parameters,
            },
        )
    }

    /// Control replay of a finished execution; `timestamp` is the seek target in seconds
    pub fn send_replay_control(
        &self,
        execution_id: &str,
        action: ReplayAction,
        timestamp: Option<f64>,
    ) -> bool {
        self.send(
            "replay_control",
            &ReplayControlMessage {
                execution_id: execution_id.to_string(),
                action,
                timestamp,
            },
        )
    }

    fn send<T: Serialize>(&self, event: &str, message: &T) -> bool {
        let Some(transport) = self.inner.connected_transport() else {
            warn!("Cannot send {}: not connected", event);
            return false;
        };

        let payload = match serde_json::to_value(message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {}: {}", event, e);
                return false;
            }
        };

        match transport.emit(event, payload) {
            Ok(()) => {
                trace!("Sent {}", event);
                true
            }
            Err(e) => {
                warn!("Failed to send {}: {}", event, e);
                false
            }
        }
    }
}

impl Inner {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn connected_transport(&self) -> Option<Arc<dyn Transport>> {
        self.session
            .lock()
            .as_ref()
            .filter(|s| s.transport.is_connected())
            .map(|s| s.transport.clone())
    }

    /// Merge a partial update and notify state listeners with the result
    fn update_state(&self, update: ConnectionStateUpdate) {
        let snapshot = {
            let mut state = self.state.lock();
            state.apply(update);
            state.clone()
        };
        self.listeners.notify_state(&snapshot);
    }

    /// Replace any existing transport with a freshly opened one
    fn open_session(
        self: &Arc<Self>,
        token: String,
        reply: oneshot::Sender<Result<String>>,
    ) -> Result<u64> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.teardown_session();

        let handle = self.connector.open(TransportOptions {
            url: self.config.url.clone(),
            path: self.config.path.clone(),
            token,
            timeout: self.config.transport_timeout(),
        })?;

        *self.pending.lock() = Some(PendingConnect { generation, reply });

        // Hold the slot until the session is stored so state listeners
        // reacting to the first event already see this transport
        let mut slot = self.session.lock();
        let pump = tokio::spawn(pump_events(Arc::downgrade(self), generation, handle.events));
        *slot = Some(Session {
            generation,
            transport: handle.transport,
            pump,
        });
        drop(slot);

        debug!("Opened transport generation {}", generation);
        Ok(generation)
    }

    /// Close the transport and fail any connect still waiting on it
    fn teardown_session(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.transport.close();
            session.pump.abort();
        }

        let pending = self.pending.lock().take();
        if let Some(pending) = pending {
            let _ = pending.reply.send(Err(Error::Cancelled));
        }
    }

    /// Tear down the session only if it still belongs to `generation`
    fn abandon_session(&self, generation: u64) {
        let owned = self
            .session
            .lock()
            .as_ref()
            .map_or(false, |s| s.generation == generation);
        if owned {
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.teardown_session();
        }
    }

    fn resolve_pending(&self, generation: u64, outcome: Result<String>) {
        let pending = {
            let mut slot = self.pending.lock();
            match slot.as_ref() {
                Some(p) if p.generation == generation => slot.take(),
                _ => None,
            }
        };
        if let Some(pending) = pending {
            let _ = pending.reply.send(outcome);
        }
    }

    fn handle_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Connected { id } => {
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                info!("Connected to realtime server ({})", id);
                self.update_state(ConnectionStateUpdate::connected(Some(id.clone())));
                self.resolve_pending(generation, Ok(id));
            }
            TransportEvent::ConnectError { message } => {
                warn!("Realtime connection error: {}", message);
                self.update_state(ConnectionStateUpdate::failed(message.clone()));
                self.resolve_pending(generation, Err(Error::ConnectFailed(message)));
            }
            TransportEvent::Disconnected { reason } => self.handle_disconnect(generation, reason),
            TransportEvent::Message { name, payload } => self.dispatch_message(&name, payload),
        }
    }

    fn handle_disconnect(self: &Arc<Self>, generation: u64, reason: DisconnectReason) {
        warn!("Disconnected from realtime server: {}", reason);
        self.resolve_pending(generation, Err(Error::ConnectFailed(reason.to_string())));
        self.update_state(ConnectionStateUpdate::failed(format!("Disconnected: {}", reason)));
        self.listeners.emit(
            EventKind::Disconnect,
            &InboundEvent::wrap(EventKind::Disconnect, json!({ "reason": reason.as_str() })),
        );

        if reason.is_server_initiated() {
            info!("Server closed the connection, not reconnecting");
            return;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let mut slot = self.reconnect_task.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(reconnect_loop(Arc::downgrade(self))));
    }

    fn dispatch_message(&self, name: &str, payload: Value) {
        let Some(kind) = EventKind::from_name(name) else {
            trace!("Ignoring unbound event {}", name);
            return;
        };

        match kind {
            EventKind::ExecutionEvent => {
                let event = match serde_json::from_value::<InboundEvent>(payload.clone()) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!("execution_event is not an envelope ({}), wrapping it", e);
                        InboundEvent::wrap(kind, payload)
                    }
                };
                self.dispatch_execution_event(&event);
            }
            EventKind::Connected => {
                info!("Realtime server welcome: {}", payload);
                self.emit_wrapped(kind, payload);
            }
            EventKind::Error => {
                warn!("Realtime server reported an error: {}", payload);
                self.emit_wrapped(kind, payload);
            }
            kind if kind.is_subscription_confirmation() => {
                debug!("{}: {}", kind, payload);
                self.emit_wrapped(kind, payload);
            }
            kind => self.emit_wrapped(kind, payload),
        }
    }

    /// Wrap a raw payload in a freshly stamped envelope and fan it out
    fn emit_wrapped(&self, kind: EventKind, payload: Value) {
        let event = InboundEvent::wrap(kind, payload);
        self.listeners.emit(kind, &event);
    }

    fn dispatch_execution_event(&self, event: &InboundEvent) {
        self.listeners.emit(EventKind::ExecutionEvent, event);
        if let Some(execution_id) = event.execution_id.as_deref() {
            self.listeners.emit_execution(execution_id, event);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.reconnect_task.get_mut().take() {
            task.abort();
        }
        if let Some(session) = self.session.get_mut().take() {
            session.transport.close();
            session.pump.abort();
        }
    }
}

async fn pump_events(
    inner: Weak<Inner>,
    generation: u64,
    mut events: tokio::sync::mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.current_generation() != generation {
            trace!("Dropping event from stale transport generation {}", generation);
            break;
        }
        inner.handle_transport_event(generation, event);
    }
}

/// Retry until connected or out of attempts; failed attempts chain into the next
async fn reconnect_loop(inner: Weak<Inner>) {
    loop {
        let Some(strong) = inner.upgrade() else {
            return;
        };

        let made = strong.reconnect_attempts.load(Ordering::SeqCst);
        if strong.policy.is_exhausted(made) {
            error!("Giving up after {} reconnection attempts", made);
            strong.update_state(ConnectionStateUpdate::error(MAX_RECONNECT_ERROR));
            return;
        }

        let attempt = strong.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = strong.policy.delay_for(attempt);
        info!(
            "Reconnecting in {:?} (attempt {}/{})",
            delay,
            attempt,
            strong.policy.max_attempts()
        );
        drop(strong);

        tokio::time::sleep(delay).await;

        let Some(strong) = inner.upgrade() else {
            return;
        };
        let client = RealtimeClient { inner: strong };
        match client.connect().await {
            Ok(()) => {
                info!("Reconnected on attempt {}", attempt);
                return;
            }
            Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
        }
    }
}
