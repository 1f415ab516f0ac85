//! TestPilot Realtime Client
//!
//! A long-lived push-channel client for the TestPilot backend. It
//! authenticates with the signed-in user's token, reconnects with bounded
//! exponential backoff after unexpected drops, tracks per-topic
//! subscriptions and fans server events out to registered listeners.

pub mod backoff;
pub mod client;
pub mod config;
pub mod credentials;
pub mod listeners;
pub mod subscriptions;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use client::{RealtimeClient, MAX_RECONNECT_ERROR};
pub use config::{ClientConfig, CredentialsConfig, ReconnectConfig};
pub use credentials::{CredentialProvider, LocalStorage, StaticToken, StoredSession};
pub use listeners::ListenerId;
pub use subscriptions::SubscriptionSnapshot;
pub use transport::{Connector, DisconnectReason, Transport, TransportEvent, TransportOptions};
