//! Axum adapter tests over a real listener
#![cfg(feature = "server-adapters")]

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use siumai_relay::prelude::*;
use siumai_relay::server_adapters::axum::router;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve(relay: Relay) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(relay)).await.unwrap();
    });
    format!("http://{addr}")
}

fn relay_for(base_url: &str) -> Relay {
    let config = RelayConfig::builder().base_url(base_url).build().unwrap();
    Relay::builder()
        .config(config)
        .registry(Arc::new(CancellationRegistry::new()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_post_message_answers_one_shot_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&mock_server)
        .await;

    let base = serve(relay_for(&mock_server.uri())).await;
    let reply: serde_json::Value = reqwest::Client::new()
        .post(format!("{base}/message"))
        .json(&json!({"type": "getRunningModels"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(reply, json!({"success": true, "data": {"models": []}}));
}

#[tokio::test]
async fn test_unknown_type_over_http() {
    let base = serve(relay_for("http://127.0.0.1:9")).await;
    let reply: serde_json::Value = reqwest::Client::new()
        .post(format!("{base}/message"))
        .json(&json!({"type": "selfDestruct", "payload": {}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(reply["success"], json!(false));
    assert_eq!(reply["error"]["status"], json!(400));
}

#[tokio::test]
async fn test_health_reports_live_operations() {
    let relay = relay_for("http://127.0.0.1:9");
    let _handle = relay.registry().create(CHAT_KEY);
    let base = serve(relay).await;

    let health: serde_json::Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({"status": "ok", "liveOperations": 1}));
}

fn ws_url(base: &str, name: &str) -> String {
    format!("{}/channel/{name}", base.replacen("http", "ws", 1))
}

#[tokio::test]
async fn test_websocket_chat_cancel_is_acknowledged() {
    let relay = relay_for("http://127.0.0.1:9");
    let handle = relay.registry().create(CHAT_KEY);
    let base = serve(relay).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url(&base, "chat"))
        .await
        .unwrap();

    ws.send(Message::Text(json!({"cancel": true}).to_string().into()))
        .await
        .unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected a text frame, got {frame:?}");
    };
    let event: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(event, json!({"done": true, "aborted": true}));
    assert!(handle.is_cancelled());

    // Closing the socket ends the bridge and the connection
    ws.close(None).await.unwrap();
    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    assert!(drained.is_ok(), "server kept the connection open");
}

#[tokio::test]
async fn test_websocket_unknown_channel_is_closed() {
    let base = serve(relay_for("http://127.0.0.1:9")).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url(&base, "telemetry"))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(frame, Message::Close(_)), "got {frame:?}");
}
