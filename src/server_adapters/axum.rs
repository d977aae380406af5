//! Axum server adapter
//!
//! ## Routes
//!
//! - `GET /channel/{name}`: WebSocket bridged to a relay channel named `name`
//! - `POST /message`: one-shot request, body `{"type": "...", "payload": ...}`
//! - `GET /health`: liveness and number of live operations
//!
//! ## Example
//!
//! ```rust,no_run
//! use siumai_relay::config::RelayConfig;
//! use siumai_relay::router::Relay;
//! use siumai_relay::server_adapters::axum::router;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let relay = Relay::new(RelayConfig::default())?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8787").await?;
//! axum::serve(listener, router(relay)).await?;
//! # Ok(())
//! # }
//! ```

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};

use crate::channel::channel;
use crate::router::{Relay, RequestMessage};
use crate::server_adapters::{decode_frame, encode_frame};

/// Routes for `relay`.
pub fn router(relay: Relay) -> Router {
    Router::new()
        .route("/channel/{name}", get(channel_handler))
        .route("/message", post(message_handler))
        .route("/health", get(health_handler))
        .with_state(relay)
}

async fn channel_handler(
    ws: WebSocketUpgrade,
    Path(name): Path<String>,
    State(relay): State<Relay>,
) -> Response {
    ws.on_upgrade(move |socket| bridge_socket(socket, relay, name))
}

async fn message_handler(
    State(relay): State<Relay>,
    Json(request): Json<RequestMessage>,
) -> Json<Value> {
    Json(relay.request(request).await)
}

async fn health_handler(State(relay): State<Relay>) -> Json<Value> {
    Json(json!({ "status": "ok", "liveOperations": relay.registry().len() }))
}

/// Pump frames between `socket` and a new relay channel until either closes.
pub async fn bridge_socket(socket: WebSocket, relay: Relay, name: String) {
    let (local, mut remote) = channel(name.clone());
    let task = relay.connect(local);
    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::debug!(channel = %name, "websocket channel opened");

    loop {
        tokio::select! {
            outbound = remote.recv() => match outbound {
                Some(message) => {
                    if ws_tx.send(Message::Text(encode_frame(&message).into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Relay closed the channel.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => match decode_frame(text.as_str()) {
                    Ok(message) => {
                        if remote.post_message(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(channel = %name, error = %e, "dropping malformed frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(channel = %name, error = %e, "websocket error");
                    break;
                }
            },
        }
    }

    remote.disconnect();
    drop(remote);
    if let Err(e) = task.await {
        tracing::warn!(channel = %name, error = %e, "channel task failed");
    }
    tracing::debug!(channel = %name, "websocket channel closed");
}
