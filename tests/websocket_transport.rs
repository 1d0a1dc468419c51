use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chathub::hub::{HubSession, HubTransport, SessionEvent, WebSocketTransport};
use chathub::shared::{HubEvent, HubEventKind, HubName};
use chathub::{ClientConfig, Delivery, HubClient, HubError};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

const SEPARATOR: char = '\u{1e}';

async fn hub_endpoint(
    Path(_hub): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    if query.get("access_token").map(String::as_str) != Some("good-token") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(serve_hub).into_response()
}

async fn send(socket: &mut WebSocket, frame: Value) {
    let text = format!("{frame}{SEPARATOR}");
    let _ = socket.send(Message::Text(text.into())).await;
}

/// Minimal JSON hub: answers the handshake, completes invocations and pushes
/// a ReceiveMessage for every SendMessage.
async fn serve_hub(mut socket: WebSocket) {
    let mut handshaken = false;
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frames: Vec<Value> = text
            .as_str()
            .split(SEPARATOR)
            .filter(|frame| !frame.is_empty())
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect();

        for frame in frames {
            if !handshaken {
                assert_eq!(frame["protocol"], "json");
                assert_eq!(frame["version"], 1);
                handshaken = true;
                send(&mut socket, json!({})).await;
                continue;
            }
            if frame["type"] != 1 {
                continue;
            }
            let id = frame["invocationId"].clone();
            let args = frame["arguments"].clone();
            match frame["target"].as_str().unwrap_or_default() {
                "SendMessage" => {
                    send(&mut socket, json!({ "type": 3, "invocationId": id })).await;
                    send(
                        &mut socket,
                        json!({
                            "type": 1,
                            "target": "ReceiveMessage",
                            "arguments": [{
                                "chatId": args[0],
                                "content": args[1],
                                "senderFullname": "Echo"
                            }]
                        }),
                    )
                    .await;
                }
                "Add" => {
                    let sum = args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0);
                    send(
                        &mut socket,
                        json!({ "type": 3, "invocationId": id, "result": sum }),
                    )
                    .await;
                }
                _ => {
                    send(
                        &mut socket,
                        json!({ "type": 3, "invocationId": id, "error": "Method does not exist" }),
                    )
                    .await;
                }
            }
        }
    }
}

async fn spawn_hub_server() -> String {
    let app = Router::new().route("/hubs/{hub}", get(hub_endpoint));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/hubs")
}

#[tokio::test]
async fn session_completes_invocations_and_relays_pushes() {
    let base = spawn_hub_server().await;
    let url = Url::parse(&format!("{base}/chat")).unwrap();
    let (inbound, mut events) = mpsc::unbounded_channel();

    let session = WebSocketTransport::default()
        .connect(&url, Some("good-token"), inbound)
        .await
        .unwrap();

    let sum = session.invoke("Add", vec![json!(2), json!(3)]).await.unwrap();
    assert_eq!(sum, json!(5));

    match session.invoke("Unknown", vec![]).await {
        Err(HubError::Remote { method, message }) => {
            assert_eq!(method, "Unknown");
            assert_eq!(message, "Method does not exist");
        }
        other => panic!("expected a remote error, got {other:?}"),
    }

    let result = session
        .invoke("SendMessage", vec![json!("c1"), json!("hi")])
        .await
        .unwrap();
    assert_eq!(result, Value::Null);

    let pushed = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    match pushed {
        SessionEvent::Invocation { target, arguments } => {
            assert_eq!(target, "ReceiveMessage");
            assert_eq!(arguments[0]["content"], "hi");
        }
        other => panic!("expected an invocation, got {other:?}"),
    }

    session.close().await;
    let closed = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(closed, SessionEvent::Closed { .. }));
}

#[tokio::test]
async fn rejected_token_is_reported_as_unauthorized() {
    let base = spawn_hub_server().await;
    let url = Url::parse(&format!("{base}/chat")).unwrap();
    let (inbound, _events) = mpsc::unbounded_channel();

    let result = WebSocketTransport::default()
        .connect(&url, Some("bad-token"), inbound)
        .await;
    assert!(matches!(result, Err(HubError::Unauthorized)));
}

#[tokio::test]
async fn hub_client_sends_and_receives_over_websocket() {
    let config = ClientConfig {
        hub_base_url: spawn_hub_server().await,
        hubs: vec![HubName::Chat],
        ..ClientConfig::default()
    };
    let client = HubClient::new(&config, Arc::new(WebSocketTransport::from_config(&config)))
        .unwrap();
    client.initialize("good-token").unwrap();
    client.start_all().await;
    assert!(client.state(HubName::Chat).is_connected());

    let (tx, mut received) = mpsc::unbounded_channel();
    client
        .subscribe(HubName::Chat, HubEventKind::ReceiveMessage, move |event| {
            if let HubEvent::ReceiveMessage(message) = event {
                let _ = tx.send(message.content.clone());
            }
        })
        .unwrap();

    let delivery = client.send_message("c1", "hello").await.unwrap();
    assert_eq!(delivery, Delivery::Sent(Value::Null));

    let content = tokio::time::timeout(Duration::from_secs(2), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(content, "hello");

    client.stop_all().await;
    assert!(!client.state(HubName::Chat).is_connected());
}
