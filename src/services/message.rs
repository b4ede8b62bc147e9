use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::domain::{Message, MessageType, Principal};
use crate::error::Error;
use crate::storage::{OutboxWriter, StorageScope};

use super::assert_conversation_access;

/// Creates a message idempotently under `(conversation_id, sender_kind, sender_id, client_msg_id)`.
///
/// On a fresh insert: touches `conversations.last_message_at`, appends an
/// outbox `chat.message_created` record, and commits. On a repeat submission
/// the existing row is returned with `created=false` and nothing else happens
/// — no touch, no outbox append, no commit (the scope is dropped, which rolls
/// back the empty transaction).
pub async fn send_message(
    conversation_id: Uuid,
    principal: &Principal,
    client_msg_id: Uuid,
    msg_type: MessageType,
    body: Option<String>,
    mut scope: Box<dyn StorageScope>,
) -> Result<(Message, bool), Error> {
    let conversation = scope.get_by_id(conversation_id).await?;
    assert_conversation_access(principal, conversation, &mut *scope).await?;

    let now = Utc::now();
    let message = Message {
        id: Uuid::new_v4(),
        conversation_id,
        sender_kind: principal.kind,
        sender_id: principal.subject_id,
        r#type: msg_type,
        body,
        payload: None,
        client_msg_id,
        created_at: now,
    };

    let (message, created) = scope.create_if_not_exists(message).await?;

    if created {
        scope
            .touch_last_message_at(conversation_id, message.created_at)
            .await?;
        scope
            .add(
                "chat.message_created",
                json!({
                    "message_id": message.id,
                    "conversation_id": message.conversation_id,
                    "sender_kind": message.sender_kind.to_string(),
                    "sender_id": message.sender_id,
                    "type": message.r#type.to_string(),
                    "body": message.body,
                }),
            )
            .await?;
        scope.commit().await?;
    }

    Ok((message, created))
}

pub async fn list_messages(
    conversation_id: Uuid,
    principal: &Principal,
    cursor: Option<&str>,
    limit: i64,
    mut scope: Box<dyn StorageScope>,
) -> Result<Vec<Message>, Error> {
    let conversation = scope.get_by_id(conversation_id).await?;
    assert_conversation_access(principal, conversation, &mut *scope).await?;
    scope.list_messages(conversation_id, cursor, limit).await
}
