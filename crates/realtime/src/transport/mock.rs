//! Scripted in-memory transport for client tests

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use testpilot_common::{Error, Result};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{
    Connector, DisconnectReason, Transport, TransportEvent, TransportHandle, TransportOptions,
};

/// How the next opened transport behaves
#[derive(Debug, Clone)]
pub enum Script {
    /// Handshake succeeds with this connection id
    Accept(String),
    /// Handshake fails with this message
    Reject(String),
    /// Handshake never completes
    Silent,
}

pub struct MockTransport {
    id: String,
    connected: AtomicBool,
    closed: AtomicBool,
    emitted: Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn id(&self) -> Option<String> {
        self.is_connected().then(|| self.id.clone())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, event: &str, payload: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.emitted.lock().push((event.to_string(), payload));
        Ok(())
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MockSession {
    pub transport: Arc<MockTransport>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub options: TransportOptions,
    pub opened_at: Instant,
}

impl MockSession {
    /// Server pushes a named message
    pub fn push(&self, name: &str, payload: Value) {
        let _ = self.events.send(TransportEvent::Message {
            name: name.to_string(),
            payload,
        });
    }

    /// Connection drops for the given reason
    pub fn drop_connection(&self, reason: DisconnectReason) {
        self.transport.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Disconnected { reason });
    }
}

/// Connector replaying a script, one entry per opened transport
pub struct MockConnector {
    script: Mutex<VecDeque<Script>>,
    fallback: Script,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockConnector {
    /// Every transport accepts
    pub fn accepting() -> Arc<Self> {
        Self::scripted(Vec::new(), Script::Accept("conn-1".to_string()))
    }

    /// Replays `script`, then behaves like `fallback`
    pub fn scripted(script: Vec<Script>, fallback: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn open_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        self.sessions.lock()[index].clone()
    }

    pub fn last(&self) -> Arc<MockSession> {
        self.sessions
            .lock()
            .last()
            .cloned()
            .expect("no transport opened")
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.sessions.lock().iter().map(|s| s.opened_at).collect()
    }
}

impl Connector for MockConnector {
    fn open(&self, options: TransportOptions) -> Result<TransportHandle> {
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let (tx, events) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            id: match &step {
                Script::Accept(id) => id.clone(),
                _ => String::new(),
            },
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            emitted: Mutex::new(Vec::new()),
        });

        match step {
            Script::Accept(id) => {
                transport.connected.store(true, Ordering::SeqCst);
                let _ = tx.send(TransportEvent::Connected { id });
            }
            Script::Reject(message) => {
                let _ = tx.send(TransportEvent::ConnectError { message });
            }
            Script::Silent => {}
        }

        self.sessions.lock().push(Arc::new(MockSession {
            transport: transport.clone(),
            events: tx,
            options,
            opened_at: Instant::now(),
        }));

        Ok(TransportHandle { transport, events })
    }
}
