//! WebSocket Session Integration Tests
//!
//! Runs the client-facing router on a random port and talks to it with a
//! real WebSocket client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use common::{Harness, is_chain_for, is_error, is_message, open_at, wait_until};
use options_stream::{OriginPolicy, Topic, router};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start the router on a random port.
async fn serve(harness: &Harness, origins: OriginPolicy) -> SocketAddr {
    let app = router(harness.app_state(origins, false));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

async fn open(addr: SocketAddr, path: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, frame: Value) {
    socket.send(Message::text(frame.to_string())).await.unwrap();
}

/// Read frames until one matches, returning everything read.
async fn read_until(socket: &mut Socket, predicate: impl Fn(&Value) -> bool) -> Vec<Value> {
    let mut seen = Vec::new();
    loop {
        let message = timeout(Duration::from_secs(2), socket.next())
            .await
            .unwrap_or_else(|_| panic!("no matching frame, saw {seen:?}"))
            .expect("socket closed")
            .unwrap();
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = serde_json::from_str(&text).unwrap();
        let matched = predicate(&frame);
        seen.push(frame);
        if matched {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_stock_socket_subscribe_receives_chain() {
    let h = Harness::new(open_at());
    let addr = serve(&h, OriginPolicy::default()).await;
    let mut socket = open(addr, "/ws/stock").await;

    read_until(&mut socket, |f| is_message(f, "Connected to single_symbol feed")).await;

    send(
        &mut socket,
        json!({"event": "subscribe", "data": {"symbol": "AAPL", "expirationDate": "2026-10-23"}}),
    )
    .await;

    let frames = read_until(&mut socket, |f| is_chain_for(f, "AAPL")).await;
    assert!(frames.iter().any(|f| is_message(f, "Subscribed to AAPL")));
    assert_eq!(h.registry.len(), 1);
}

#[tokio::test]
async fn test_missing_symbol_is_reported_on_socket() {
    let h = Harness::new(open_at());
    let addr = serve(&h, OriginPolicy::default()).await;
    let mut socket = open(addr, "/ws/stock").await;

    send(&mut socket, json!({"event": "subscribe", "data": {}})).await;

    read_until(&mut socket, |f| is_error(f, "Missing Symbol")).await;
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_malformed_frame_keeps_session_open() {
    let h = Harness::new(open_at());
    let addr = serve(&h, OriginPolicy::default()).await;
    let mut socket = open(addr, "/ws/stock").await;

    socket.send(Message::text("{not json")).await.unwrap();
    read_until(&mut socket, |f| {
        f["event"] == "error" && f["data"]["error"].as_str().unwrap().starts_with("Invalid message")
    })
    .await;

    send(&mut socket, json!({"event": "launch"})).await;
    read_until(&mut socket, |f| is_error(f, "Unknown event: launch")).await;
}

#[tokio::test]
async fn test_indexes_socket_joins_shared_feed() {
    let h = Harness::new(open_at());
    let addr = serve(&h, OriginPolicy::default()).await;
    let mut first = open(addr, "/ws/indexes").await;
    let mut second = open(addr, "/ws/indexes").await;

    for socket in [&mut first, &mut second] {
        send(socket, json!({"event": "subscribe"})).await;
        read_until(socket, |f| is_message(f, "Subscribed to indexes")).await;
    }

    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.hub.room_size(Topic::Indexes), 2);

    let frames = read_until(&mut first, |f| f["event"] == "data").await;
    assert_eq!(frames.last().unwrap()["data"]["QQQ"]["symbol"], "QQQ");
}

#[tokio::test]
async fn test_closing_socket_tears_down_subscription() {
    let h = Harness::new(open_at());
    let addr = serve(&h, OriginPolicy::default()).await;
    let mut socket = open(addr, "/ws/stock").await;

    send(&mut socket, json!({"event": "subscribe", "data": {"symbol": "MSFT"}})).await;
    read_until(&mut socket, |f| is_chain_for(f, "MSFT")).await;

    socket.close(None).await.unwrap();

    assert!(wait_until(|| h.registry.is_empty()).await);
    assert!(wait_until(|| h.hub.connection_count() == 0).await);
}

#[tokio::test]
async fn test_disconnect_event_ends_session() {
    let h = Harness::new(open_at());
    let addr = serve(&h, OriginPolicy::default()).await;
    let mut socket = open(addr, "/ws/stock").await;

    send(&mut socket, json!({"event": "subscribe", "data": {"symbol": "MSFT"}})).await;
    read_until(&mut socket, |f| is_message(f, "Subscribed to MSFT")).await;

    send(&mut socket, json!({"event": "disconnect"})).await;
    read_until(&mut socket, |f| is_message(f, "Disconnected")).await;

    assert!(wait_until(|| h.registry.is_empty()).await);
}

#[tokio::test]
async fn test_disallowed_origin_is_forbidden() {
    let h = Harness::new(open_at());
    let addr = serve(
        &h,
        OriginPolicy::new(["https://app.example.com".to_string()]),
    )
    .await;

    let mut request = format!("ws://{addr}/ws/stock").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://evil.example"));

    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 403),
        Err(e) => panic!("expected 403, got {e}"),
        Ok(_) => panic!("expected 403, connection was accepted"),
    }
    assert_eq!(h.hub.connection_count(), 0);
}

#[tokio::test]
async fn test_allowed_origin_connects() {
    let h = Harness::new(open_at());
    let addr = serve(
        &h,
        OriginPolicy::new(["https://app.example.com".to_string()]),
    )
    .await;

    let mut request = format!("ws://{addr}/ws/indexes").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://app.example.com"));

    let (mut socket, _) = connect_async(request).await.unwrap();
    read_until(&mut socket, |f| is_message(f, "Connected to indexes feed")).await;
}
