//! WebSocket session tests over real sockets, including the two-process
//! cache-coherence scenario.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use trove_api::testing::Harness;
use trove_http::{build_router, AppState};
use trove_notify::{Bus, LocalBus};

async fn serve(harness: &Harness) -> std::net::SocketAddr {
    let router = build_router(AppState {
        services: harness.services.clone(),
        registry: harness.registry.clone(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn next_json(
    socket: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
) -> Value {
    loop {
        match socket.next().await.expect("socket open").expect("frame") {
            Message::Text(text) => {
                if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                    return value;
                }
                // Plain text frames are change notifications; skip here.
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn next_text(
    socket: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
) -> String {
    loop {
        match socket.next().await.expect("socket open").expect("frame") {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn method_calls_and_change_pushes() {
    let harness = Harness::new().await;
    let personal = harness.personal_access("alice").await;
    let addr = serve(&harness).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/alice/socket?auth={}",
        personal.token
    ))
    .await
    .expect("ws connect");

    // A method call gets an ack with the callId echoed.
    socket
        .send(Message::Text(
            json!({"callId": 7, "method": "streams.create", "params": {"id": "s", "name": "S"}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let ack = next_json(&mut socket).await;
    assert_eq!(ack["callId"], json!(7));
    assert_eq!(ack["result"]["stream"]["id"], json!("s"));
    assert!(ack["meta"].is_object());

    // The mutation also pushed a streams-changed tag to this socket.
    let tag = next_text(&mut socket).await;
    assert_eq!(tag, "username-based-streams-changed");

    // Unknown methods come back as errors, without killing the session.
    socket
        .send(Message::Text(
            json!({"method": "no.such", "params": {}}).to_string().into(),
        ))
        .await
        .unwrap();
    let ack = next_json(&mut socket).await;
    assert_eq!(ack["callId"], Value::Null);
    assert_eq!(ack["error"]["id"], json!("UnknownResource"));
}

#[tokio::test]
async fn handshake_rejects_bad_tokens() {
    let harness = Harness::new().await;
    let addr = serve(&harness).await;
    let outcome =
        tokio_tungstenite::connect_async(format!("ws://{addr}/alice/socket?auth=bogus")).await;
    assert!(outcome.is_err(), "upgrade should have been refused");
}

#[tokio::test]
async fn sibling_process_revocation_closes_the_door() {
    // Two "processes": separate caches and registries over one storage and
    // one bus (standing in for the brokered bridge).
    let storage = trove_storage::memory::storage();
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let config = {
        let mut config = trove_core::TroveConfig::default();
        config.auth.admin_key = trove_api::testing::TEST_ADMIN_KEY.to_string();
        config
    };
    let p1 = Harness::with_parts(config.clone(), storage.clone(), bus.clone()).await;
    // `alice` already exists in the shared storage; the second harness
    // must not try to create her again.
    let p2 = Harness::with_parts_existing(config, storage, bus).await;

    let personal = p1.personal_access("alice").await;
    let doomed = p1.app_access("alice", vec![]).await;
    let addr2 = serve(&p2).await;

    // Open a socket on P2 with the doomed token and warm P2's cache.
    let (mut socket, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr2}/alice/socket?auth={}",
        doomed.token
    ))
    .await
    .expect("ws connect");
    socket
        .send(Message::Text(
            json!({"callId": 1, "method": "getAccessInfo", "params": {}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let ack = next_json(&mut socket).await;
    assert!(ack["result"].is_object());

    // Delete the access through P1.
    p1.call(
        "alice",
        &personal.token,
        "accesses.delete",
        json!({"id": doomed.id}),
    )
    .await
    .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    // Any further call on the open socket fails to authenticate.
    socket
        .send(Message::Text(
            json!({"callId": 2, "method": "events.get", "params": {}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    loop {
        let ack = next_json(&mut socket).await;
        if ack["callId"] == json!(2) {
            assert_eq!(ack["error"]["id"], json!("InvalidAccessToken"));
            break;
        }
    }
}
