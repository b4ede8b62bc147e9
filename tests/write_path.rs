//! End-to-end write-path scenarios against the in-memory storage fake,
//! mirroring the literal scenarios in spec.md §8 (S1-S4) plus the message
//! ordering/cursor invariants (1, 5, 6).

use chrono::Utc;
use uuid::Uuid;

use leafchat_server::domain::{Conversation, ConversationStatus, MessageType, Participant, ParticipantKind, Principal};
use leafchat_server::error::Error;
use leafchat_server::services::{admin, message};
use leafchat_server::storage::{ConversationWriter, ParticipantWriter, Storage, StorageScope};
use leafchat_server::storage::memory::MemoryStorage;

const CONVO: &str = "11111111-1111-1111-1111-111111111111";
const CLIENT_MSG: &str = "22222222-2222-2222-2222-222222222222";

async fn seed_conversation_with_user(storage: &MemoryStorage, user_id: i64) -> Uuid {
    let id = Uuid::parse_str(CONVO).unwrap();
    let now = Utc::now();
    let mut scope = storage.begin().await.unwrap();
    ConversationWriter::create(
        &mut *scope,
        Conversation {
            id,
            topic_type: "support".to_string(),
            topic_id: None,
            status: ConversationStatus::Open,
            assignee_admin_id: None,
            last_message_at: None,
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .unwrap();
    ParticipantWriter::add(
        &mut *scope,
        Participant {
            conversation_id: id,
            kind: ParticipantKind::User,
            subject_id: user_id,
            joined_at: now,
        },
    )
    .await
    .unwrap();
    scope.commit().await.unwrap();
    id
}

fn user(id: i64) -> Principal {
    Principal {
        kind: ParticipantKind::User,
        subject_id: id,
        roles: vec![],
    }
}

fn admin_principal(id: i64) -> Principal {
    Principal {
        kind: ParticipantKind::Admin,
        subject_id: id,
        roles: vec!["admin".to_string()],
    }
}

/// S1 — idempotent send: the same (conversation, sender, client_msg_id)
/// tuple submitted twice produces exactly one message and one outbox row,
/// and `last_message_at` reflects only the first send.
#[tokio::test]
async fn s1_idempotent_send_is_exactly_once() {
    let storage = MemoryStorage::new();
    let convo_id = seed_conversation_with_user(&storage, 42).await;
    let client_msg_id = Uuid::parse_str(CLIENT_MSG).unwrap();

    let scope1 = storage.begin().await.unwrap();
    let (first, created1) = message::send_message(
        convo_id,
        &user(42),
        client_msg_id,
        MessageType::Text,
        Some("hi".to_string()),
        scope1,
    )
    .await
    .unwrap();
    assert!(created1);

    let scope2 = storage.begin().await.unwrap();
    let (second, created2) = message::send_message(
        convo_id,
        &user(42),
        client_msg_id,
        MessageType::Text,
        Some("hi".to_string()),
        scope2,
    )
    .await
    .unwrap();
    assert!(!created2);
    assert_eq!(first.id, second.id);

    let mut check_scope = storage.begin().await.unwrap();
    let conv = leafchat_server::storage::ConversationReader::get_by_id(&mut *check_scope, convo_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conv.last_message_at, Some(first.created_at));

    let messages = leafchat_server::storage::MessageReader::list_messages(&mut *check_scope, convo_id, None, 100)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);

    // Invariant 2: exactly one outbox record for this message, regardless of
    // the repeat submission.
    let outbox_rows = leafchat_server::storage::OutboxWriter::fetch_pending(&mut *check_scope, 100)
        .await
        .unwrap();
    let matching: Vec<_> = outbox_rows
        .iter()
        .filter(|r| r.event_type == "chat.message_created")
        .collect();
    assert_eq!(matching.len(), 1);
    assert_eq!(
        matching[0].payload.get("message_id").and_then(|v| v.as_str()),
        Some(first.id.to_string()).as_deref()
    );
}

/// S2 — a principal with no participant row and no admin role is rejected
/// before any message or outbox row is written.
#[tokio::test]
async fn s2_non_participant_rejected() {
    let storage = MemoryStorage::new();
    let convo_id = seed_conversation_with_user(&storage, 42).await;

    let scope = storage.begin().await.unwrap();
    let result = message::send_message(
        convo_id,
        &user(999),
        Uuid::new_v4(),
        MessageType::Text,
        Some("hi".to_string()),
        scope,
    )
    .await;

    assert!(matches!(result, Err(Error::Forbidden(_))));

    let mut check_scope = storage.begin().await.unwrap();
    let messages = leafchat_server::storage::MessageReader::list_messages(&mut *check_scope, convo_id, None, 100)
        .await
        .unwrap();
    assert!(messages.is_empty());
}

/// S3 — an admin with no participant row on the conversation can still send.
#[tokio::test]
async fn s3_admin_has_global_access() {
    let storage = MemoryStorage::new();
    let convo_id = seed_conversation_with_user(&storage, 42).await;

    let scope = storage.begin().await.unwrap();
    let (msg, created) = message::send_message(
        convo_id,
        &admin_principal(1),
        Uuid::new_v4(),
        MessageType::Text,
        Some("how can we help?".to_string()),
        scope,
    )
    .await
    .unwrap();

    assert!(created);
    assert_eq!(msg.sender_kind, ParticipantKind::Admin);
}

/// S4 — assigning an admin creates their participant row (if missing) and
/// posts a system message recording the assignment.
#[tokio::test]
async fn s4_assign_creates_participant_and_system_message() {
    let storage = MemoryStorage::new();
    let convo_id = seed_conversation_with_user(&storage, 42).await;

    let scope = storage.begin().await.unwrap();
    let updated = admin::assign_conversation(convo_id, 7, &admin_principal(1), scope)
        .await
        .unwrap();
    assert_eq!(updated.assignee_admin_id, Some(7));

    let mut check_scope = storage.begin().await.unwrap();
    let is_participant = leafchat_server::storage::ParticipantReader::is_participant(
        &mut *check_scope,
        convo_id,
        ParticipantKind::Admin,
        7,
    )
    .await
    .unwrap();
    assert!(is_participant);

    let messages = leafchat_server::storage::MessageReader::list_messages(&mut *check_scope, convo_id, None, 100)
        .await
        .unwrap();
    let system_msg = messages
        .iter()
        .find(|m| m.r#type == MessageType::System)
        .expect("expected a system message recording the assignment");
    assert_eq!(
        system_msg.payload,
        Some(serde_json::json!({ "action": "assigned", "admin_id": 7 }))
    );
}

/// Invariant 5/6 — `ListMessages` returns messages in non-decreasing
/// `(created_at, id)` order, and paginating with the returned cursor yields
/// disjoint, contiguous pages.
#[tokio::test]
async fn list_messages_paginates_in_order_with_no_gaps_or_overlap() {
    let storage = MemoryStorage::new();
    let convo_id = seed_conversation_with_user(&storage, 42).await;

    for i in 0..5 {
        let scope = storage.begin().await.unwrap();
        message::send_message(
            convo_id,
            &user(42),
            Uuid::new_v4(),
            MessageType::Text,
            Some(format!("message {i}")),
            scope,
        )
        .await
        .unwrap();
    }

    let mut scope = storage.begin().await.unwrap();
    let page1 = leafchat_server::storage::MessageReader::list_messages(&mut *scope, convo_id, None, 2)
        .await
        .unwrap();
    assert_eq!(page1.len(), 2);

    let cursor = leafchat_server::cursor::encode(page1[1].created_at, page1[1].id);
    let page2 = leafchat_server::storage::MessageReader::list_messages(&mut *scope, convo_id, Some(&cursor), 2)
        .await
        .unwrap();
    assert_eq!(page2.len(), 2);

    let page3 = leafchat_server::storage::MessageReader::list_messages(
        &mut *scope,
        convo_id,
        Some(&leafchat_server::cursor::encode(page2[1].created_at, page2[1].id)),
        2,
    )
    .await
    .unwrap();
    assert_eq!(page3.len(), 1);

    let mut all_ids: Vec<Uuid> = page1.iter().chain(&page2).chain(&page3).map(|m| m.id).collect();
    let unique_count = {
        all_ids.sort();
        all_ids.dedup();
        all_ids.len()
    };
    assert_eq!(unique_count, 5, "pages must be disjoint and cover every message exactly once");
}
