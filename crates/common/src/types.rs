//! Core types for TestPilot realtime

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Inbound event kinds pushed by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnect,
    SubscriptionConfirmed,
    BrowserSessionSubscribed,
    RecordingSubscribed,
    PlaybackSubscribed,
    ExecutionEvent,
    BrowserControl,
    Recording,
    Playback,
    LivePreview,
    Screenshot,
    ReplayControl,
    Error,
    SystemMessage,
    UserEvent,
    BroadcastEvent,
}

impl EventKind {
    /// Every event name the client binds a handler for
    pub const ALL: [EventKind; 17] = [
        EventKind::Connected,
        EventKind::Disconnect,
        EventKind::SubscriptionConfirmed,
        EventKind::BrowserSessionSubscribed,
        EventKind::RecordingSubscribed,
        EventKind::PlaybackSubscribed,
        EventKind::ExecutionEvent,
        EventKind::BrowserControl,
        EventKind::Recording,
        EventKind::Playback,
        EventKind::LivePreview,
        EventKind::Screenshot,
        EventKind::ReplayControl,
        EventKind::Error,
        EventKind::SystemMessage,
        EventKind::UserEvent,
        EventKind::BroadcastEvent,
    ];

    /// Wire name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnect => "disconnect",
            EventKind::SubscriptionConfirmed => "subscription_confirmed",
            EventKind::BrowserSessionSubscribed => "browser_session_subscribed",
            EventKind::RecordingSubscribed => "recording_subscribed",
            EventKind::PlaybackSubscribed => "playback_subscribed",
            EventKind::ExecutionEvent => "execution_event",
            EventKind::BrowserControl => "browser_control",
            EventKind::Recording => "recording",
            EventKind::Playback => "playback",
            EventKind::LivePreview => "live_preview",
            EventKind::Screenshot => "screenshot",
            EventKind::ReplayControl => "replay_control",
            EventKind::Error => "error",
            EventKind::SystemMessage => "system_message",
            EventKind::UserEvent => "user_event",
            EventKind::BroadcastEvent => "broadcast_event",
        }
    }

    /// Look up a kind by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }

    /// Whether this kind confirms a subscription request
    pub fn is_subscription_confirmation(&self) -> bool {
        matches!(
            self,
            EventKind::SubscriptionConfirmed
                | EventKind::BrowserSessionSubscribed
                | EventKind::RecordingSubscribed
                | EventKind::PlaybackSubscribed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown event kind: {}", s))
    }
}

/// Standard inbound event envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl InboundEvent {
    /// Wrap a raw payload in an envelope stamped with the current time.
    ///
    /// Identifiers carried by the payload are lifted onto the envelope; a
    /// timestamp inside the payload is left in `data` and not reused.
    pub fn wrap(kind: EventKind, data: Value) -> Self {
        let lift = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            event_type: kind.as_str().to_string(),
            execution_id: lift("execution_id"),
            session_id: lift("session_id"),
            user_id: lift("user_id"),
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    /// Parsed event kind, when the type is one the client knows
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_name(&self.event_type)
    }
}

/// Connection state observed by listeners
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub connecting: bool,
    pub error: Option<String>,
    pub connection_id: Option<String>,
}

impl ConnectionState {
    /// Shallow-merge a partial update into this state
    pub fn apply(&mut self, update: ConnectionStateUpdate) {
        if let Some(connected) = update.connected {
            self.connected = connected;
        }
        if let Some(connecting) = update.connecting {
            self.connecting = connecting;
        }
        if let Some(error) = update.error {
            self.error = error;
        }
        if let Some(connection_id) = update.connection_id {
            self.connection_id = connection_id;
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.connected {
            write!(f, "connected")?;
            if let Some(id) = &self.connection_id {
                write!(f, " ({})", id)?;
            }
            Ok(())
        } else if self.connecting {
            write!(f, "connecting")
        } else if let Some(error) = &self.error {
            write!(f, "disconnected: {}", error)
        } else {
            write!(f, "disconnected")
        }
    }
}

/// Partial connection state; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStateUpdate {
    pub connected: Option<bool>,
    pub connecting: Option<bool>,
    pub error: Option<Option<String>>,
    pub connection_id: Option<Option<String>>,
}

impl ConnectionStateUpdate {
    pub fn connecting() -> Self {
        Self {
            connecting: Some(true),
            error: Some(None),
            ..Default::default()
        }
    }

    pub fn connected(connection_id: Option<String>) -> Self {
        Self {
            connected: Some(true),
            connecting: Some(false),
            error: Some(None),
            connection_id: Some(connection_id),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            connected: Some(false),
            connecting: Some(false),
            error: Some(Some(error.into())),
            ..Default::default()
        }
    }

    pub fn reset() -> Self {
        Self {
            connected: Some(false),
            connecting: Some(false),
            error: Some(None),
            connection_id: Some(None),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(Some(error.into())),
            ..Default::default()
        }
    }
}

/// Server-side scope a client can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Execution,
    BrowserSession,
    Recording,
    Playback,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Execution,
        Topic::BrowserSession,
        Topic::Recording,
        Topic::Playback,
    ];

    /// Upstream message requesting pushes for this topic
    pub fn subscribe_event(&self) -> &'static str {
        match self {
            Topic::Execution => "subscribe_execution",
            Topic::BrowserSession => "subscribe_browser_session",
            Topic::Recording => "subscribe_recording",
            Topic::Playback => "subscribe_playback",
        }
    }

    /// Upstream message cancelling pushes for this topic
    pub fn unsubscribe_event(&self) -> &'static str {
        match self {
            Topic::Execution => "unsubscribe_execution",
            Topic::BrowserSession => "unsubscribe_browser_session",
            Topic::Recording => "unsubscribe_recording",
            Topic::Playback => "unsubscribe_playback",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Execution => write!(f, "execution"),
            Topic::BrowserSession => write!(f, "browser_session"),
            Topic::Recording => write!(f, "recording"),
            Topic::Playback => write!(f, "playback"),
        }
    }
}

/// Declares a wire-named action enum with Display/FromStr in snake_case.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| {
                        let valid: Vec<_> = Self::ALL.iter().map(|v| v.as_str()).collect();
                        format!("invalid value '{}', expected one of: {}", s, valid.join(", "))
                    })
            }
        }
    };
}

wire_enum!(
    /// Commands accepted by a remote browser session
    BrowserCommand {
        Navigate => "navigate",
        Click => "click",
        Type => "type",
        Scroll => "scroll",
        Hover => "hover",
        Screenshot => "screenshot",
        GoBack => "go_back",
        GoForward => "go_forward",
        Reload => "reload",
        Wait => "wait",
    }
);

wire_enum!(
    /// Recording session controls
    RecordingAction {
        Start => "start",
        Stop => "stop",
        Pause => "pause",
        Resume => "resume",
    }
);

wire_enum!(
    /// Playback session controls
    PlaybackAction {
        Start => "start",
        Stop => "stop",
        Pause => "pause",
        Resume => "resume",
        Step => "step",
    }
);

wire_enum!(
    /// Execution replay controls
    ReplayAction {
        Play => "play",
        Pause => "pause",
        Seek => "seek",
        Stop => "stop",
        Restart => "restart",
    }
);

/// `browser_command` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserCommandMessage {
    pub session_id: String,
    pub command: BrowserCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// `recording_control` and `playback_control` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionControlMessage<A> {
    pub session_id: String,
    pub action: A,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// `replay_control` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayControlMessage {
    pub execution_id: String,
    pub action: ReplayAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}
