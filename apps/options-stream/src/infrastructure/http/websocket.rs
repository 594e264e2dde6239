//! WebSocket session handling.
//!
//! Every frame in either direction is a JSON envelope
//! `{"event": <name>, "data": <payload>}`. Client events are `subscribe`,
//! `update`, `unsubscribe` and `disconnect`; closing the socket is the same
//! as `disconnect`. The namespace path fixes the topic.

use std::ops::ControlFlow;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::AppState;
use crate::application::ports::{ServerEvent, TransportPort};
use crate::domain::subscription::{ConnectionId, SubscriptionParams, Topic};
use crate::infrastructure::metrics;

/// How long a closing session waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Upgrade Handlers
// =============================================================================

pub(super) async fn stock_socket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, &headers, state, Topic::SingleSymbol)
}

pub(super) async fn indexes_socket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, &headers, state, Topic::Indexes)
}

fn upgrade(ws: WebSocketUpgrade, headers: &HeaderMap, state: AppState, topic: Topic) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.origins.allows(origin) {
        warn!(origin = ?origin, topic = %topic, "Rejected socket from disallowed origin");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Origin not allowed" })),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| run_session(socket, topic, state))
}

// =============================================================================
// Client Events
// =============================================================================

#[derive(Debug, Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Parsed client intent.
#[derive(Debug, PartialEq)]
enum ClientEvent {
    Subscribe(SubscriptionParams),
    Update(SubscriptionParams),
    Unsubscribe,
    Disconnect,
}

impl ClientEvent {
    const fn name(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Update(_) => "update",
            Self::Unsubscribe => "unsubscribe",
            Self::Disconnect => "disconnect",
        }
    }
}

fn parse_client_event(text: &str) -> Result<ClientEvent, String> {
    let frame: ClientFrame =
        serde_json::from_str(text).map_err(|e| format!("Invalid message: {e}"))?;

    let params = || -> Result<SubscriptionParams, String> {
        match &frame.data {
            None | Some(serde_json::Value::Null) => Ok(SubscriptionParams::default()),
            Some(data) => serde_json::from_value(data.clone())
                .map_err(|e| format!("Invalid {} data: {e}", frame.event)),
        }
    };

    match frame.event.as_str() {
        "subscribe" => params().map(ClientEvent::Subscribe),
        "update" => params().map(ClientEvent::Update),
        "unsubscribe" => Ok(ClientEvent::Unsubscribe),
        "disconnect" => Ok(ClientEvent::Disconnect),
        other => Err(format!("Unknown event: {other}")),
    }
}

// =============================================================================
// Session
// =============================================================================

async fn run_session(socket: WebSocket, topic: Topic, state: AppState) {
    let connection = ConnectionId::new_v4();
    let mut outbound = state.hub.register(connection);
    metrics::set_connections(state.hub.connection_count());
    info!(connection_id = %connection, topic = %topic, "Client connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    state.dispatcher.connect(connection, topic).await;

    loop {
        let frame = tokio::select! {
            () = state.shutdown.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if handle_text(&state, connection, topic, text.as_str())
                    .await
                    .is_break()
                {
                    break;
                }
            }
            Some(Ok(Message::Close(_)) | Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }

    let stopped = state.dispatcher.disconnect(connection).await;
    state.hub.unregister(connection);
    metrics::set_connections(state.hub.connection_count());

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!(connection_id = %connection, "Writer did not drain before timeout");
    }
    info!(connection_id = %connection, topic = %topic, stopped, "Client disconnected");
}

async fn handle_text(
    state: &AppState,
    connection: ConnectionId,
    topic: Topic,
    text: &str,
) -> ControlFlow<()> {
    let event = match parse_client_event(text) {
        Ok(event) => event,
        Err(message) => {
            debug!(connection_id = %connection, error = %message, "Bad client frame");
            state.hub.emit(connection, ServerEvent::error(message));
            return ControlFlow::Continue(());
        }
    };
    metrics::record_client_event(event.name());

    // Failures are already reported to the client by the dispatcher.
    match event {
        ClientEvent::Subscribe(params) => {
            let _ = state.dispatcher.subscribe(connection, topic, params).await;
        }
        ClientEvent::Update(params) => {
            let _ = state.dispatcher.update(connection, topic, params).await;
        }
        ClientEvent::Unsubscribe => {
            state.dispatcher.unsubscribe(connection, topic).await;
        }
        ClientEvent::Disconnect => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}
