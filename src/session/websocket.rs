//! `GET /ws/chat` — the single bidirectional socket clients use for sending
//! messages, subscribing to conversations, and marking them read, ported
//! frame-for-frame from the Python router's `_read_loop`/`_handle_*` split.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::TokenVerifier;
use crate::config::WsConfig;
use crate::domain::MessageType;
use crate::services::{message as message_service, read_state as read_state_service};
use crate::storage::Storage;

use super::protocol::{WsInbound, WsOutbound};
use super::registry::SessionRegistry;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

pub async fn handler(
    ws: WebSocketUpgrade,
    State(storage): State<Arc<dyn Storage>>,
    State(registry): State<Arc<SessionRegistry>>,
    State(verifier): State<TokenVerifier>,
    State(ws_config): State<WsConfig>,
    Query(query): Query<WsQuery>,
) -> Response {
    match verifier.verify(&query.token) {
        Ok(principal) => ws.on_upgrade(move |socket| {
            run_connection(socket, storage, registry, ws_config, principal)
        }),
        Err(e) => ws.on_upgrade(move |socket| reject(socket, e.to_string())),
    }
}

async fn reject(mut socket: WebSocket, detail: String) {
    let _ = socket
        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
            code: 4001,
            reason: format!("Authentication failed: {detail}").into(),
        })))
        .await;
}

async fn run_connection(
    socket: WebSocket,
    storage: Arc<dyn Storage>,
    registry: Arc<SessionRegistry>,
    ws_config: WsConfig,
    principal: crate::domain::Principal,
) {
    let principal_key = principal.principal_key();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsOutbound>(64);
    let socket_id = registry.connect(&principal_key, tx.clone());

    let heartbeat_tx = tx.clone();
    let heartbeat_interval = Duration::from_secs(ws_config.heartbeat_seconds);
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            ticker.tick().await;
            if heartbeat_tx.send(WsOutbound::pong()).await.is_err() {
                break;
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else { continue };
        let inbound: WsInbound = match serde_json::from_str(&text) {
            Ok(i) => i,
            Err(_) => {
                let _ = tx
                    .send(WsOutbound::error("invalid_payload", "could not parse frame"))
                    .await;
                continue;
            }
        };

        match inbound.kind.as_str() {
            "ping" => {
                let _ = tx.send(WsOutbound::pong()).await;
            }
            "subscribe" => {
                if let Some(conversation_id) = inbound
                    .data
                    .get("conversation_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                {
                    registry.subscribe(&principal_key, conversation_id);
                }
            }
            "unsubscribe" => {
                if let Some(conversation_id) = inbound
                    .data
                    .get("conversation_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                {
                    registry.unsubscribe(&principal_key, conversation_id);
                }
            }
            "message.send" => {
                handle_send(&storage, &principal, &inbound.data, &tx).await;
            }
            "mark_read" => {
                handle_mark_read(&storage, &principal, &inbound.data).await;
            }
            other => {
                let _ = tx
                    .send(WsOutbound::error("unknown_type", other.to_string()))
                    .await;
            }
        }
    }

    heartbeat.abort();
    writer.abort();
    registry.disconnect(&principal_key, socket_id);
    debug!(principal = %principal_key, "websocket connection closed");
}

async fn handle_send(
    storage: &Arc<dyn Storage>,
    principal: &crate::domain::Principal,
    data: &serde_json::Value,
    tx: &mpsc::Sender<WsOutbound>,
) {
    let parsed = (|| -> Result<(Uuid, Uuid, Option<String>, MessageType), String> {
        let conversation_id = data
            .get("conversation_id")
            .and_then(|v| v.as_str())
            .ok_or("missing conversation_id")?;
        let conversation_id = Uuid::parse_str(conversation_id).map_err(|e| e.to_string())?;
        let client_msg_id = data
            .get("client_msg_id")
            .and_then(|v| v.as_str())
            .ok_or("missing client_msg_id")?;
        let client_msg_id = Uuid::parse_str(client_msg_id).map_err(|e| e.to_string())?;
        let body = data
            .get("body")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let msg_type = data
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("text");
        let msg_type = match msg_type {
            "text" => MessageType::Text,
            "system" => MessageType::System,
            "attachment" => MessageType::Attachment,
            other => return Err(format!("unknown message type '{other}'")),
        };
        Ok((conversation_id, client_msg_id, body, msg_type))
    })();

    let (conversation_id, client_msg_id, body, msg_type) = match parsed {
        Ok(v) => v,
        Err(detail) => {
            let _ = tx.send(WsOutbound::error("invalid_data", detail)).await;
            return;
        }
    };

    let scope = match storage.begin().await {
        Ok(s) => s,
        Err(e) => {
            let _ = tx.send(WsOutbound::error("send_failed", e.to_string())).await;
            return;
        }
    };

    // Delivery to subscribed sockets (including the sender's own, if
    // subscribed) happens exclusively through the outbox dispatcher and the
    // bus bridge, the same path REST-originated sends use — no direct local
    // broadcast here, so there is exactly one fan-out path to reason about.
    match message_service::send_message(conversation_id, principal, client_msg_id, msg_type, body, scope).await {
        Ok(_) => {}
        Err(e) => {
            let _ = tx.send(WsOutbound::error("send_failed", e.to_string())).await;
        }
    }
}

async fn handle_mark_read(
    storage: &Arc<dyn Storage>,
    principal: &crate::domain::Principal,
    data: &serde_json::Value,
) {
    let Some(conversation_id) = data
        .get("conversation_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
    else {
        return;
    };
    let Some(last_message_id) = data
        .get("last_message_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
    else {
        return;
    };

    let scope = match storage.begin().await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "mark_read failed to open storage scope");
            return;
        }
    };
    if let Err(e) = read_state_service::mark_read(conversation_id, principal, last_message_id, scope).await {
        warn!(error = %e, "mark_read failed");
    }
}
