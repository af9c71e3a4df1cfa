//! The WebSocket session adapter.
//!
//! A client connects to `/{username}/socket?auth=<token>`; each message is
//! a JSON call `{callId?, method, params}` answered by an ack envelope
//! `{callId, result|error, meta}`. Data-change tags for the user are
//! pushed as plain text frames. A missing `callId` never crashes the
//! session; the ack simply carries `null`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::Uri;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use trove_access::AuthPayload;
use trove_core::ApiError;
use trove_notify::{change_topic, Bus as _, BusMessage};
use trove_storage::prelude::*;

use crate::compat;
use crate::envelope;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsCall {
    #[serde(default)]
    call_id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

pub async fn upgrade(
    State(state): State<AppState>,
    Path(username): Path<String>,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let query = compat::query_params(uri.query());
    let Some(token) = query.get("auth").and_then(|v| v.as_str()).map(str::to_string) else {
        return envelope::failure(
            &state.services.config,
            &ApiError::invalid_access_token("Missing auth query parameter"),
        );
    };
    // Authenticate during the handshake so bad tokens never upgrade.
    if let Err(err) = validate(&state, &username, &token).await {
        return envelope::failure(&state.services.config, &err);
    }
    ws.on_upgrade(move |socket| session(state, username, token, socket))
}

async fn validate(state: &AppState, username: &str, token: &str) -> Result<(), ApiError> {
    let user = state.services.resolve_user(username).await?;
    let access = state
        .services
        .storage
        .accesses
        .get_by_token(&user.id, token)
        .await
        .map_err(trove_api::helpers::store_error)?
        .ok_or_else(|| ApiError::invalid_access_token("Unknown access token"))?;
    if access.is_expired(trove_model::time::now()) {
        return Err(ApiError::invalid_access_token("Access has expired"));
    }
    Ok(())
}

async fn session(state: AppState, username: String, token: String, socket: WebSocket) {
    let (mut sink, mut source) = socket.split();
    let mut changes = state.services.bus.subscribe(&change_topic(&username));

    loop {
        tokio::select! {
            notification = changes.recv() => {
                match notification {
                    Ok(BusMessage::Change { tag }) => {
                        if sink.send(Message::Text(tag.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            message = source.next() => {
                let Some(Ok(message)) = message else { break };
                match message {
                    Message::Text(text) => {
                        let ack = handle_call(&state, &username, &token, text.as_str()).await;
                        let rendered = ack.to_string();
                        if sink.send(Message::Text(rendered.into())).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    // Ping/pong are handled by the transport; binary is ignored.
                    _ => {}
                }
            }
        }
    }
    tracing::debug!(username, "websocket session closed");
}

async fn handle_call(state: &AppState, username: &str, token: &str, text: &str) -> Value {
    let meta = envelope::meta_for(&state.services.config);
    let call: WsCall = match serde_json::from_str(text) {
        Ok(call) => call,
        Err(e) => {
            let err = ApiError::invalid_request_structure(format!("Unparsable call: {e}"));
            return json!({ "callId": null, "error": err.to_value(), "meta": meta });
        }
    };
    let call_id = call.call_id.unwrap_or(Value::Null);
    let mut ctx = state
        .context(username)
        .with_auth(Some(AuthPayload::token_only(token)));
    match state.registry.call(&call.method, &mut ctx, call.params).await {
        Ok(result) => json!({ "callId": call_id, "result": result, "meta": meta }),
        Err(err) => json!({ "callId": call_id, "error": err.public().to_value(), "meta": meta }),
    }
}
