//! Listener registry
//!
//! Three independent groups: global listeners keyed by event kind,
//! execution-scoped listeners keyed by execution id, and connection-state
//! listeners. Registration hands back a [`ListenerId`]; removal takes it.
//! Dispatch runs callbacks outside the registry locks, in registration order,
//! and isolates each one so a panicking listener cannot starve its siblings.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use testpilot_common::{ConnectionState, EventKind, InboundEvent};
use tracing::error;

/// Callback receiving inbound events
pub type EventCallback = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Callback receiving connection state snapshots
pub type StateCallback = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

type Group<C> = BTreeMap<ListenerId, C>;

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    events: Mutex<HashMap<EventKind, Group<EventCallback>>>,
    executions: Mutex<HashMap<String, Group<EventCallback>>>,
    states: Mutex<Group<StateCallback>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register a global listener for one event kind
    pub fn on(&self, kind: EventKind, callback: EventCallback) -> ListenerId {
        let id = self.next_id();
        self.events.lock().entry(kind).or_default().insert(id, callback);
        id
    }

    /// Remove a global listener
    pub fn off(&self, id: ListenerId) -> bool {
        let mut events = self.events.lock();
        let Some(kind) = events
            .iter()
            .find_map(|(kind, group)| group.contains_key(&id).then_some(*kind))
        else {
            return false;
        };
        if let Some(group) = events.get_mut(&kind) {
            group.remove(&id);
            if group.is_empty() {
                events.remove(&kind);
            }
        }
        true
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.events.lock().get(&kind).map_or(0, BTreeMap::len)
    }

    /// Register a listener scoped to one execution
    pub fn on_execution(&self, execution_id: &str, callback: EventCallback) -> ListenerId {
        let id = self.next_id();
        self.executions
            .lock()
            .entry(execution_id.to_string())
            .or_default()
            .insert(id, callback);
        id
    }

    /// Remove an execution listener, dropping the execution entry once empty
    pub fn off_execution(&self, execution_id: &str, id: ListenerId) -> bool {
        let mut executions = self.executions.lock();
        let Some(group) = executions.get_mut(execution_id) else {
            return false;
        };
        let removed = group.remove(&id).is_some();
        if group.is_empty() {
            executions.remove(execution_id);
        }
        removed
    }

    pub fn execution_listener_count(&self, execution_id: &str) -> usize {
        self.executions
            .lock()
            .get(execution_id)
            .map_or(0, BTreeMap::len)
    }

    /// Number of executions with at least one listener
    pub fn watched_executions(&self) -> usize {
        self.executions.lock().len()
    }

    pub fn clear_executions(&self) {
        self.executions.lock().clear();
    }

    pub fn on_state(&self, callback: StateCallback) -> ListenerId {
        let id = self.next_id();
        self.states.lock().insert(id, callback);
        id
    }

    pub fn off_state(&self, id: ListenerId) -> bool {
        self.states.lock().remove(&id).is_some()
    }

    /// Deliver an event to every global listener of `kind`; returns how many ran
    pub fn emit(&self, kind: EventKind, event: &InboundEvent) -> usize {
        let callbacks = snapshot(self.events.lock().get(&kind));
        for (id, callback) in &callbacks {
            isolate(kind.as_str(), *id, || callback(event));
        }
        callbacks.len()
    }

    /// Deliver an event to the listeners of one execution
    pub fn emit_execution(&self, execution_id: &str, event: &InboundEvent) -> usize {
        let callbacks = snapshot(self.executions.lock().get(execution_id));
        for (id, callback) in &callbacks {
            isolate(execution_id, *id, || callback(event));
        }
        callbacks.len()
    }

    /// Deliver a state snapshot to every connection-state listener
    pub fn notify_state(&self, state: &ConnectionState) {
        let callbacks = snapshot(Some(&*self.states.lock()));
        for (id, callback) in &callbacks {
            isolate("connection state", *id, || callback(state));
        }
    }
}

fn snapshot<C: Clone>(group: Option<&Group<C>>) -> Vec<(ListenerId, C)> {
    group
        .map(|g| g.iter().map(|(id, c)| (*id, c.clone())).collect())
        .unwrap_or_default()
}

fn isolate(scope: &str, id: ListenerId, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Listener {} for {} panicked: {}", id, scope, reason);
    }
}
