mod common;

use common::*;
use serde_json::json;
use std::time::Duration;
use testpilot_cli::commands::watch::{ExecutionFeed, Update};
use testpilot_common::EventKind;
use testpilot_e2e::MockServerConfig;
use testpilot_realtime::MAX_RECONNECT_ERROR;

/// Heartbeat Test
///
/// The client answers every server ping and stays connected across several
/// ping windows.
#[tokio::test]
async fn answers_server_pings() {
    let server = server(MockServerConfig {
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .await;
    let client = client_for(&server);
    client.connect().await.expect("connect");

    server
        .wait_for("three pongs", WAIT, |s| s.pong_count() >= 3)
        .await
        .unwrap();
    assert!(client.is_connected());
    assert_eq!(server.handshakes().len(), 1);
}

/// Ping Timeout Test
///
/// A silent server is detected through the ping window; the drop is
/// reported as `ping timeout` and the client reconnects on its own.
#[tokio::test]
async fn silent_server_triggers_ping_timeout_and_reconnect() {
    let server = server(MockServerConfig {
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(100),
        send_pings: false,
        ..Default::default()
    })
    .await;
    let client = client_for(&server);
    let mut drops = collect(&client, EventKind::Disconnect);
    client.connect().await.expect("connect");

    let event = next_event(&mut drops).await;
    assert_eq!(event.data["reason"], "ping timeout");

    server
        .wait_for("second handshake", WAIT, |s| s.handshakes().len() >= 2)
        .await
        .unwrap();
    eventually("reconnected", || client.is_connected()).await;
}

/// Dropped Connection Test
///
/// A connection lost without a disconnect packet is re-established with a
/// fresh handshake.
#[tokio::test]
async fn dropped_connection_reconnects() {
    let server = server(MockServerConfig::default()).await;
    let client = client_for(&server);
    client.connect().await.expect("connect");
    let first = client.connection_state().connection_id;

    server
        .wait_for("registered connection", WAIT, |s| s.connection_count() == 1)
        .await
        .unwrap();
    assert_eq!(server.drop_all(), 1);

    server
        .wait_for("second handshake", WAIT, |s| s.handshakes().len() == 2)
        .await
        .unwrap();
    eventually("reconnected", || client.is_connected()).await;

    assert_ne!(client.connection_state().connection_id, first);
    assert_eq!(client.reconnect_attempts(), 0);
}

/// Watch Across Reconnect Test
///
/// A watched execution is subscribed again on the new socket after an
/// automatic reconnect, and its events keep arriving exactly once.
#[tokio::test]
async fn watched_execution_survives_reconnect() {
    let server = server(MockServerConfig::default()).await;
    let client = client_for(&server);
    client.connect().await.expect("connect");

    let mut feed = ExecutionFeed::open(&client, "exec-7").expect("subscribed while connected");
    server
        .wait_for("first subscribe", WAIT, |s| {
            s.received_named("subscribe_execution").len() == 1
        })
        .await
        .unwrap();
    assert_eq!(server.drop_all(), 1);

    let mut dropped = false;
    loop {
        let update = tokio::time::timeout(WAIT, feed.next())
            .await
            .expect("timed out waiting for reconnect")
            .expect("feed closed");
        match update {
            Update::Dropped(_) => dropped = true,
            Update::Restored => break,
            Update::Event(event) => panic!("unexpected event {:?}", event),
        }
    }
    assert!(dropped, "drop reported before the restore");

    server
        .wait_for("subscribe on the new socket", WAIT, |s| {
            s.received_named("subscribe_execution") == vec![json!("exec-7"), json!("exec-7")]
        })
        .await
        .unwrap();

    let envelope = json!({
        "type": "execution_event",
        "execution_id": "exec-7",
        "data": {"status": "completed"},
        "timestamp": "2024-05-01T12:00:00Z",
    });
    server.emit("execution_event", envelope.clone()).unwrap();

    match tokio::time::timeout(WAIT, feed.next()).await {
        Ok(Some(Update::Event(event))) => {
            assert_eq!(event.execution_id.as_deref(), Some("exec-7"));
            assert_eq!(event.data["status"], "completed");
        }
        other => panic!("expected the execution event, got {:?}", other),
    }
    // One local listener despite the second subscription
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        tokio::time::timeout(Duration::from_millis(50), feed.next()).await.is_err(),
        "event delivered twice"
    );

    feed.close();
    server
        .wait_for("unsubscribe", WAIT, |s| {
            s.received_named("unsubscribe_execution") == vec![json!("exec-7")]
        })
        .await
        .unwrap();
}

/// Server Disconnect Test
///
/// A deliberate server-side disconnect is final: no reconnect is attempted.
#[tokio::test]
async fn server_disconnect_is_final() {
    let server = server(MockServerConfig::default()).await;
    let client = client_for(&server);
    let mut drops = collect(&client, EventKind::Disconnect);
    client.connect().await.expect("connect");

    server
        .wait_for("registered connection", WAIT, |s| s.connection_count() == 1)
        .await
        .unwrap();
    assert_eq!(server.disconnect_all(), 1);

    let event = next_event(&mut drops).await;
    assert_eq!(event.data["reason"], "io server disconnect");

    // Longer than the whole fast backoff schedule
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(server.handshakes().len(), 1);
    assert!(!client.is_connected());
    assert_eq!(
        client.connection_state().error.as_deref(),
        Some("Disconnected: io server disconnect")
    );
}

/// Reconnect Exhaustion Test
///
/// While the server refuses every handshake the client makes exactly five
/// attempts, then reports that it gave up.
#[tokio::test]
async fn reconnect_gives_up_after_five_attempts() {
    let server = server(MockServerConfig::default()).await;
    let client = client_for(&server);
    client.connect().await.expect("connect");

    server
        .wait_for("registered connection", WAIT, |s| s.connection_count() == 1)
        .await
        .unwrap();
    server.reject_handshakes(Some("maintenance"));
    server.drop_all();

    eventually("reconnect budget spent", || {
        client.connection_state().error.as_deref() == Some(MAX_RECONNECT_ERROR)
    })
    .await;

    // 50 + 100 + 200 + 400 + 800 ms schedule is long over
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.handshakes().len(), 6, "initial connect plus five attempts");
    assert!(!client.is_connected());
}
