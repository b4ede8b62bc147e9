use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::domain::{Conversation, ConversationStatus, Participant, ParticipantKind, Principal};
use crate::error::Error;
use crate::storage::{ConversationFilter, OutboxWriter, ParticipantWriter, StorageScope};

use super::assert_conversation_access;

/// Returns the caller's existing open support conversation, or opens a new one.
pub async fn open_support_conversation(
    user_id: i64,
    mut scope: Box<dyn StorageScope>,
) -> Result<Conversation, Error> {
    if let Some(existing) = scope.get_support_for_user(user_id).await? {
        return Ok(existing);
    }

    let now = Utc::now();
    let conversation = Conversation {
        id: Uuid::new_v4(),
        topic_type: "support".to_string(),
        topic_id: None,
        status: ConversationStatus::Open,
        assignee_admin_id: None,
        last_message_at: None,
        created_at: now,
        updated_at: now,
    };
    let conversation = scope.create(conversation).await?;
    ParticipantWriter::add(
        &mut *scope,
        Participant {
            conversation_id: conversation.id,
            kind: ParticipantKind::User,
            subject_id: user_id,
            joined_at: now,
        },
    )
    .await?;
    OutboxWriter::add(
        &mut *scope,
        "chat.conversation_created",
        json!({
            "conversation_id": conversation.id,
            "user_id": user_id,
            "topic_type": "support",
        }),
    )
    .await?;
    scope.commit().await?;
    Ok(conversation)
}

/// Returns `(conversation, created)` for the open conversation keyed by
/// `(topic_type, topic_id)`, creating one if none is open.
pub async fn open_topic_conversation(
    topic_type: &str,
    topic_id: i64,
    user_id: i64,
    mut scope: Box<dyn StorageScope>,
) -> Result<(Conversation, bool), Error> {
    if let Some(existing) = scope
        .get_by_topic(topic_type, topic_id, Some(ConversationStatus::Open))
        .await?
    {
        return Ok((existing, false));
    }

    let now = Utc::now();
    let conversation = Conversation {
        id: Uuid::new_v4(),
        topic_type: topic_type.to_string(),
        topic_id: Some(topic_id),
        status: ConversationStatus::Open,
        assignee_admin_id: None,
        last_message_at: None,
        created_at: now,
        updated_at: now,
    };
    let conversation = scope.create(conversation).await?;
    ParticipantWriter::add(
        &mut *scope,
        Participant {
            conversation_id: conversation.id,
            kind: ParticipantKind::User,
            subject_id: user_id,
            joined_at: now,
        },
    )
    .await?;
    OutboxWriter::add(
        &mut *scope,
        "chat.conversation_created",
        json!({
            "conversation_id": conversation.id,
            "user_id": user_id,
            "topic_type": topic_type,
            "topic_id": topic_id,
        }),
    )
    .await?;
    scope.commit().await?;
    Ok((conversation, true))
}

pub async fn list_user_conversations(
    principal: &Principal,
    cursor: Option<&str>,
    limit: i64,
    mut scope: Box<dyn StorageScope>,
) -> Result<Vec<Conversation>, Error> {
    scope
        .list_for_user(principal.subject_id, cursor, limit)
        .await
}

pub async fn list_admin_conversations(
    filter: &ConversationFilter,
    mut scope: Box<dyn StorageScope>,
) -> Result<Vec<Conversation>, Error> {
    scope.list_for_admin(filter).await
}

pub async fn get_conversation(
    conversation_id: Uuid,
    principal: &Principal,
    mut scope: Box<dyn StorageScope>,
) -> Result<Conversation, Error> {
    let conversation = scope.get_by_id(conversation_id).await?;
    assert_conversation_access(principal, conversation, &mut *scope).await
}
