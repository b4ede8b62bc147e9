use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::CurrentAdmin;
use crate::domain::{Conversation, ConversationStatus, Message};
use crate::error::Error;
use crate::services::{admin, conversation, message};
use crate::storage::{ConversationFilter, Storage};

use super::messages::SendMessageRequest;

#[derive(Debug, Deserialize)]
pub struct AdminListQuery {
    status: Option<ConversationStatus>,
    assignee_admin_id: Option<i64>,
    cursor: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

pub async fn list_conversations(
    State(storage): State<Arc<dyn Storage>>,
    CurrentAdmin(_admin): CurrentAdmin,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<Vec<Conversation>>, Error> {
    let filter = ConversationFilter {
        status: query.status,
        assignee_admin_id: query.assignee_admin_id,
        cursor: query.cursor,
        limit: query.limit,
    };
    let scope = storage.begin().await?;
    let convs = conversation::list_admin_conversations(&filter, scope).await?;
    Ok(Json(convs))
}

pub async fn get_conversation(
    State(storage): State<Arc<dyn Storage>>,
    CurrentAdmin(admin): CurrentAdmin,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Conversation>, Error> {
    let scope = storage.begin().await?;
    let conv = conversation::get_conversation(conversation_id, &admin, scope).await?;
    Ok(Json(conv))
}

#[derive(Debug, Deserialize)]
pub struct PatchConversationRequest {
    pub status: Option<ConversationStatus>,
    pub assignee_admin_id: Option<i64>,
}

/// Branches exactly as `admin_conversations.py::patch_conversation`: close
/// wins over assign, and a body with neither is just a fetch.
pub async fn patch_conversation(
    State(storage): State<Arc<dyn Storage>>,
    CurrentAdmin(caller): CurrentAdmin,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<PatchConversationRequest>,
) -> Result<Json<Conversation>, Error> {
    let scope = storage.begin().await?;
    let conv = if body.status == Some(ConversationStatus::Closed) {
        admin::close_conversation(conversation_id, &caller, scope).await?
    } else if let Some(admin_id) = body.assignee_admin_id {
        admin::assign_conversation(conversation_id, admin_id, &caller, scope).await?
    } else {
        conversation::get_conversation(conversation_id, &caller, scope).await?
    };
    Ok(Json(conv))
}

pub async fn list_messages(
    State(storage): State<Arc<dyn Storage>>,
    CurrentAdmin(admin): CurrentAdmin,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<super::messages::ListQuery>,
) -> Result<Json<Vec<Message>>, Error> {
    let scope = storage.begin().await?;
    let messages = message::list_messages(
        conversation_id,
        &admin,
        query.cursor.as_deref(),
        query.limit,
        scope,
    )
    .await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(storage): State<Arc<dyn Storage>>,
    CurrentAdmin(admin): CurrentAdmin,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), Error> {
    let scope = storage.begin().await?;
    let (msg, _created) = message::send_message(
        conversation_id,
        &admin,
        body.client_msg_id,
        body.msg_type,
        body.body,
        scope,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(msg)))
}
