use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::domain::{Conversation, Message, MessageType, Participant, ParticipantKind, Principal};
use crate::error::Error;
use crate::storage::{
    ConversationWriter, MessageWriter, OutboxWriter, ParticipantReader, ParticipantWriter,
    StorageScope,
};

use super::assert_admin;

/// Assigns an admin to a conversation, creating the admin's participant row
/// if it doesn't already exist, and posts a system message recording the
/// assignment.
pub async fn assign_conversation(
    conversation_id: Uuid,
    admin_id: i64,
    caller: &Principal,
    mut scope: Box<dyn StorageScope>,
) -> Result<Conversation, Error> {
    assert_admin(caller)?;
    scope
        .get_by_id(conversation_id)
        .await?
        .ok_or_else(|| Error::NotFound("conversation not found".to_string()))?;

    scope.assign(conversation_id, admin_id).await?;

    let already_participant = scope
        .is_participant(conversation_id, ParticipantKind::Admin, admin_id)
        .await?;
    if !already_participant {
        ParticipantWriter::add(
            &mut *scope,
            Participant {
                conversation_id,
                kind: ParticipantKind::Admin,
                subject_id: admin_id,
                joined_at: Utc::now(),
            },
        )
        .await?;
    }

    let now = Utc::now();
    let system_msg = Message {
        id: Uuid::new_v4(),
        conversation_id,
        sender_kind: ParticipantKind::Admin,
        sender_id: admin_id,
        r#type: MessageType::System,
        body: Some(format!("Admin {admin_id} assigned")),
        payload: Some(json!({ "action": "assigned", "admin_id": admin_id })),
        client_msg_id: Uuid::new_v4(),
        created_at: now,
    };
    scope.create_if_not_exists(system_msg).await?;
    scope.touch_last_message_at(conversation_id, now).await?;

    OutboxWriter::add(
        &mut *scope,
        "chat.conversation_updated",
        json!({
            "conversation_id": conversation_id,
            "action": "assigned",
            "assignee_admin_id": admin_id,
        }),
    )
    .await?;

    let updated = scope
        .get_by_id(conversation_id)
        .await?
        .ok_or_else(|| Error::NotFound("conversation not found".to_string()))?;
    scope.commit().await?;
    Ok(updated)
}

/// Closes a conversation and posts a system message recording the closure.
pub async fn close_conversation(
    conversation_id: Uuid,
    caller: &Principal,
    mut scope: Box<dyn StorageScope>,
) -> Result<Conversation, Error> {
    assert_admin(caller)?;
    scope
        .get_by_id(conversation_id)
        .await?
        .ok_or_else(|| Error::NotFound("conversation not found".to_string()))?;

    scope.close(conversation_id).await?;

    let now = Utc::now();
    let system_msg = Message {
        id: Uuid::new_v4(),
        conversation_id,
        sender_kind: ParticipantKind::Admin,
        sender_id: caller.subject_id,
        r#type: MessageType::System,
        body: Some("Conversation closed".to_string()),
        payload: Some(json!({ "action": "closed" })),
        client_msg_id: Uuid::new_v4(),
        created_at: now,
    };
    scope.create_if_not_exists(system_msg).await?;
    scope.touch_last_message_at(conversation_id, now).await?;

    OutboxWriter::add(
        &mut *scope,
        "chat.conversation_updated",
        json!({
            "conversation_id": conversation_id,
            "action": "closed",
            "status": "closed",
        }),
    )
    .await?;

    let updated = scope
        .get_by_id(conversation_id)
        .await?
        .ok_or_else(|| Error::NotFound("conversation not found".to_string()))?;
    scope.commit().await?;
    Ok(updated)
}
