use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::CurrentPrincipal;
use crate::domain::{Message, MessageType};
use crate::error::Error;
use crate::services::message;
use crate::storage::Storage;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub cursor: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub client_msg_id: Uuid,
    #[serde(rename = "type", default = "default_type")]
    pub msg_type: MessageType,
    pub body: Option<String>,
}

fn default_type() -> MessageType {
    MessageType::Text
}

pub async fn list_messages(
    State(storage): State<Arc<dyn Storage>>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Message>>, Error> {
    let scope = storage.begin().await?;
    let messages = message::list_messages(
        conversation_id,
        &principal,
        query.cursor.as_deref(),
        query.limit,
        scope,
    )
    .await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(storage): State<Arc<dyn Storage>>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), Error> {
    let scope = storage.begin().await?;
    let (msg, _created) = message::send_message(
        conversation_id,
        &principal,
        body.client_msg_id,
        body.msg_type,
        body.body,
        scope,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(msg)))
}
