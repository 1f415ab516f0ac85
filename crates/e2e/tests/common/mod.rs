//! Shared fixtures for end-to-end tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use testpilot_common::{EventKind, InboundEvent};
use testpilot_e2e::{MockServer, MockServerConfig};
use testpilot_realtime::{ClientConfig, RealtimeClient, ReconnectConfig, StaticToken};
use tokio::sync::mpsc;

pub const TOKEN: &str = "e2e-access-token";
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub async fn server(config: MockServerConfig) -> MockServer {
    init_tracing();
    MockServer::start(config).await.expect("start mock server")
}

/// Client config pointed at `server` with fast reconnects
pub fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig {
        url: server.base_url(),
        connect_timeout_ms: 3_000,
        transport_timeout_ms: 3_000,
        reconnect: ReconnectConfig {
            base_delay_ms: 50,
            multiplier: 2,
            max_attempts: 5,
        },
        ..Default::default()
    }
}

pub fn client_for(server: &MockServer) -> RealtimeClient {
    RealtimeClient::new(config_for(server), Arc::new(StaticToken::new(TOKEN)))
}

/// Forward every event of `kind` into a channel
pub fn collect(client: &RealtimeClient, kind: EventKind) -> mpsc::UnboundedReceiver<InboundEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(kind, move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<InboundEvent>) -> InboundEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Poll until `condition` holds
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
