// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for relay integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use ecc_chat_relay::build_state;
use ecc_chat_relay::config::RelayConfig;
use ecc_chat_relay::http::{create_router, AppState};
use ecc_chat_relay::kv_store::{KvStore, MemoryKvStore};
use ecc_chat_relay::metrics::RelayMetrics;

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A relay serving on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
}

/// Starts a relay with default configuration and in-memory sessions.
#[allow(dead_code)]
pub async fn start_server() -> TestServer {
    start_server_with(RelayConfig::default(), Arc::new(MemoryKvStore::new())).await
}

/// Starts a relay with the given configuration and session backing store.
pub async fn start_server_with(config: RelayConfig, kv: Arc<dyn KvStore>) -> TestServer {
    let (state, _rate_limiter) = build_state(&config, kv, RelayMetrics::new());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer { addr, state }
}

impl TestServer {
    /// Creates a session for `address` through the auth service.
    #[allow(dead_code)]
    pub fn login(&self, address: &str, expires_at: Option<u64>) -> String {
        let issued = self.state.auth.issue_challenge().unwrap();
        self.state
            .auth
            .verify_proof(&issued.session_id, &issued.challenge, address, expires_at)
            .unwrap();
        issued.session_id
    }

    #[allow(dead_code)]
    pub fn ws_url(&self, session_id: &str) -> String {
        format!("ws://{}/ws?sessionId={}", self.addr, session_id)
    }

    /// Opens a WebSocket for `session_id` and consumes the roster snapshot,
    /// which is returned.
    #[allow(dead_code)]
    pub async fn connect(&self, session_id: &str) -> (WsClient, Value) {
        let (mut ws, _) = connect_async(self.ws_url(session_id))
            .await
            .expect("WebSocket connect failed");
        let roster = recv_json(&mut ws).await;
        assert_eq!(roster["type"], "online_users");
        (ws, roster)
    }

    /// Logs in and connects in one step.
    #[allow(dead_code)]
    pub async fn join(&self, address: &str) -> WsClient {
        let session_id = self.login(address, None);
        self.connect(&session_id).await.0
    }
}

/// Receives the next text frame as JSON.
#[allow(dead_code)]
pub async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        match timeout(Duration::from_secs(3), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).unwrap(),
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            other => panic!("Expected text frame, got {:?}", other),
        }
    }
}

/// Receives frames until one with the given `type` arrives.
#[allow(dead_code)]
pub async fn recv_type(ws: &mut WsClient, event_type: &str) -> Value {
    loop {
        let value = recv_json(ws).await;
        if value["type"] == event_type {
            return value;
        }
    }
}

/// Waits for the server's close frame.
#[allow(dead_code)]
pub async fn recv_close(ws: &mut WsClient) -> CloseFrame<'static> {
    loop {
        match timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Close(Some(frame))))) => return frame.into_owned(),
            Ok(Some(Ok(Message::Text(_)))) => continue,
            other => panic!("Expected close frame, got {:?}", other),
        }
    }
}

/// Asserts that no text frame arrives within `window`.
#[allow(dead_code)]
pub async fn assert_quiet(ws: &mut WsClient, window: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(window, ws.next()).await {
        panic!("Unexpected frame: {}", text);
    }
}

#[allow(dead_code)]
pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}
