mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use testpilot_common::Error;
use testpilot_e2e::MockServerConfig;
use testpilot_realtime::{CredentialProvider, LocalStorage, RealtimeClient, StoredSession};

/// Handshake Test
///
/// Connects the real WebSocket transport to the mock server and checks that
/// the access token travels in the CONNECT auth object and the server's
/// socket id becomes the connection id.
#[tokio::test]
async fn connect_sends_token_and_adopts_server_sid() {
    let server = server(MockServerConfig::default()).await;
    let client = client_for(&server);

    client.connect().await.expect("connect");

    let state = client.connection_state();
    assert!(state.connected);
    assert!(!state.connecting);
    assert_eq!(state.error, None);
    let sid = state.connection_id.expect("connection id");
    assert!(!sid.is_empty());

    assert_eq!(server.handshakes(), vec![json!({ "token": TOKEN })]);
    server
        .wait_for("registered connection", WAIT, |s| s.connection_count() == 1)
        .await
        .unwrap();
}

/// Rejected Handshake Test
///
/// A CONNECT_ERROR from the server fails `connect` with the server's message
/// and leaves the client disconnected with that error.
#[tokio::test]
async fn rejected_token_fails_connect() {
    let server = server(MockServerConfig {
        accepted_token: Some("someone-else".into()),
        ..Default::default()
    })
    .await;
    let client = client_for(&server);

    let err = client.connect().await.expect_err("connect must fail");
    assert!(
        matches!(err, Error::ConnectFailed(ref m) if m == "Authentication failed"),
        "unexpected error: {err}"
    );

    let state = client.connection_state();
    assert!(!state.connected);
    assert!(!state.connecting);
    assert_eq!(state.error.as_deref(), Some("Authentication failed"));
    assert_eq!(server.connection_count(), 0);
}

/// Stored Session Test
///
/// The token is read from the local session storage file when no static
/// token is configured.
#[tokio::test]
async fn token_from_stored_session() {
    let server = server(MockServerConfig {
        accepted_token: Some("stored-token".into()),
        ..Default::default()
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(dir.path().join("storage.json"));
    storage
        .set(
            "sb-session",
            json!(r#"{"access_token":"stored-token","refresh_token":"r"}"#),
        )
        .await
        .unwrap();

    let credentials: Arc<dyn CredentialProvider> = Arc::new(StoredSession::new(storage));
    let client = RealtimeClient::new(config_for(&server), credentials);

    client.connect().await.expect("connect with stored session");
    assert!(client.is_connected());
    assert_eq!(server.handshakes(), vec![json!({ "token": "stored-token" })]);
}

/// Signed-out Test
///
/// Without a stored session no transport is opened at all.
#[tokio::test]
async fn signed_out_client_never_dials() {
    let server = server(MockServerConfig::default()).await;

    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(dir.path().join("storage.json"));
    let client = RealtimeClient::new(config_for(&server), Arc::new(StoredSession::new(storage)));

    let err = client.connect().await.expect_err("no token");
    assert!(matches!(err, Error::MissingToken));
    assert!(server.handshakes().is_empty());
}

/// Explicit Disconnect Test
///
/// `disconnect` closes the socket, and the server sees the client leave.
#[tokio::test]
async fn disconnect_closes_server_session() {
    let server = server(MockServerConfig::default()).await;
    let client = client_for(&server);
    client.connect().await.expect("connect");
    server
        .wait_for("registered connection", WAIT, |s| s.connection_count() == 1)
        .await
        .unwrap();

    client.disconnect();

    server
        .wait_for("connection closed", WAIT, |s| s.connection_count() == 0)
        .await
        .unwrap();
    assert!(!client.is_connected());
    assert_eq!(client.connection_state().connection_id, None);
}
