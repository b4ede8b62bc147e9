//! In-process storage fake. Used by service/outbox/bridge unit tests so the
//! whole core is testable without a live Postgres — the design note in
//! spec.md §9 asks implementers to "prefer one concrete adapter and
//! unit-test against in-memory fakes for the services."
//!
//! Mutations apply directly to the shared tables rather than buffering in a
//! real transaction log: every write-path service only writes after its
//! authorisation checks pass, so there is nothing left to roll back on the
//! error paths the services actually take.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::domain::{
    Conversation, ConversationStatus, Message, OutboxRecord, OutboxStatus, Participant,
    ParticipantKind, ReadState,
};
use crate::error::Error;

use super::{
    ConversationFilter, ConversationReader, ConversationWriter, MessageReader, MessageWriter,
    OutboxWriter, ParticipantReader, ParticipantWriter, ReadStateWriter, Storage, StorageScope,
};

#[derive(Default)]
struct Tables {
    conversations: HashMap<Uuid, Conversation>,
    participants: Vec<Participant>,
    messages: Vec<Message>,
    read_states: HashMap<(Uuid, ParticipantKind, i64), ReadState>,
    outbox: Vec<OutboxRecord>,
    next_outbox_id: i64,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StorageScope>, Error> {
        Ok(Box::new(MemoryScope {
            tables: self.tables.clone(),
        }))
    }
}

pub struct MemoryScope {
    tables: Arc<Mutex<Tables>>,
}

#[async_trait]
impl ConversationReader for MemoryScope {
    async fn get_by_id(&mut self, id: Uuid) -> Result<Option<Conversation>, Error> {
        Ok(self.tables.lock().conversations.get(&id).cloned())
    }

    async fn get_support_for_user(&mut self, user_id: i64) -> Result<Option<Conversation>, Error> {
        let tables = self.tables.lock();
        let hit = tables
            .participants
            .iter()
            .filter(|p| p.kind == ParticipantKind::User && p.subject_id == user_id)
            .filter_map(|p| tables.conversations.get(&p.conversation_id))
            .filter(|c| c.topic_type == "support" && c.status == ConversationStatus::Open)
            .max_by_key(|c| c.created_at)
            .cloned();
        Ok(hit)
    }

    async fn get_by_topic(
        &mut self,
        topic_type: &str,
        topic_id: i64,
        status: Option<ConversationStatus>,
    ) -> Result<Option<Conversation>, Error> {
        let tables = self.tables.lock();
        let hit = tables
            .conversations
            .values()
            .filter(|c| c.topic_type == topic_type && c.topic_id == Some(topic_id))
            .filter(|c| status.map(|s| c.status == s).unwrap_or(true))
            .max_by_key(|c| c.created_at)
            .cloned();
        Ok(hit)
    }

    async fn list_for_user(
        &mut self,
        user_id: i64,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Conversation>, Error> {
        let tables = self.tables.lock();
        let mut rows: Vec<Conversation> = tables
            .participants
            .iter()
            .filter(|p| p.kind == ParticipantKind::User && p.subject_id == user_id)
            .filter_map(|p| tables.conversations.get(&p.conversation_id))
            .cloned()
            .collect();
        sort_and_paginate_conversations(&mut rows, cursor, limit)
    }

    async fn list_for_admin(
        &mut self,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, Error> {
        let tables = self.tables.lock();
        let mut rows: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| filter.status.map(|s| c.status == s).unwrap_or(true))
            .filter(|c| {
                filter
                    .assignee_admin_id
                    .map(|a| c.assignee_admin_id == Some(a))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        sort_and_paginate_conversations(&mut rows, filter.cursor.as_deref(), filter.limit)
    }
}

fn sort_and_paginate_conversations(
    rows: &mut Vec<Conversation>,
    cursor: Option<&str>,
    limit: i64,
) -> Result<Vec<Conversation>, Error> {
    rows.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then(a.id.cmp(&b.id))
    });
    if let Some(cursor) = cursor {
        let (ts, id) = crate::cursor::decode(cursor)?;
        rows.retain(|c| {
            c.last_message_at.map(|t| t < ts).unwrap_or(false)
                || (c.last_message_at == Some(ts) && c.id > id)
        });
    }
    rows.truncate(limit.max(0) as usize);
    Ok(rows.clone())
}

#[async_trait]
impl ConversationWriter for MemoryScope {
    async fn create(&mut self, conversation: Conversation) -> Result<Conversation, Error> {
        let mut tables = self.tables.lock();
        tables.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn assign(&mut self, id: Uuid, admin_id: i64) -> Result<(), Error> {
        let mut tables = self.tables.lock();
        let conv = tables
            .conversations
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))?;
        conv.assignee_admin_id = Some(admin_id);
        Ok(())
    }

    async fn close(&mut self, id: Uuid) -> Result<(), Error> {
        let mut tables = self.tables.lock();
        let conv = tables
            .conversations
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))?;
        conv.status = ConversationStatus::Closed;
        Ok(())
    }

    async fn touch_last_message_at(&mut self, id: Uuid, ts: DateTime<Utc>) -> Result<(), Error> {
        let mut tables = self.tables.lock();
        let conv = tables
            .conversations
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))?;
        conv.last_message_at = Some(ts);
        Ok(())
    }
}

#[async_trait]
impl ParticipantReader for MemoryScope {
    async fn is_participant(
        &mut self,
        conversation_id: Uuid,
        kind: ParticipantKind,
        subject_id: i64,
    ) -> Result<bool, Error> {
        Ok(self.tables.lock().participants.iter().any(|p| {
            p.conversation_id == conversation_id && p.kind == kind && p.subject_id == subject_id
        }))
    }

    async fn list_participants(&mut self, conversation_id: Uuid) -> Result<Vec<Participant>, Error> {
        Ok(self
            .tables
            .lock()
            .participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ParticipantWriter for MemoryScope {
    async fn add(&mut self, participant: Participant) -> Result<(), Error> {
        let mut tables = self.tables.lock();
        let dup = tables.participants.iter().any(|p| {
            p.conversation_id == participant.conversation_id
                && p.kind == participant.kind
                && p.subject_id == participant.subject_id
        });
        if dup {
            return Err(Error::Conflict("participant already exists".to_string()));
        }
        tables.participants.push(participant);
        Ok(())
    }
}

#[async_trait]
impl MessageReader for MemoryScope {
    async fn list_messages(
        &mut self,
        conversation_id: Uuid,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Message>, Error> {
        let tables = self.tables.lock();
        let mut rows: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(cursor) = cursor {
            let (ts, id) = crate::cursor::decode(cursor)?;
            rows.retain(|m| m.created_at > ts || (m.created_at == ts && m.id > id));
        }
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn get_by_client_msg_id(
        &mut self,
        conversation_id: Uuid,
        sender_kind: ParticipantKind,
        sender_id: i64,
        client_msg_id: Uuid,
    ) -> Result<Option<Message>, Error> {
        Ok(self
            .tables
            .lock()
            .messages
            .iter()
            .find(|m| {
                m.conversation_id == conversation_id
                    && m.sender_kind == sender_kind
                    && m.sender_id == sender_id
                    && m.client_msg_id == client_msg_id
            })
            .cloned())
    }
}

#[async_trait]
impl MessageWriter for MemoryScope {
    async fn create_if_not_exists(&mut self, message: Message) -> Result<(Message, bool), Error> {
        let mut tables = self.tables.lock();
        let existing = tables
            .messages
            .iter()
            .find(|m| {
                m.conversation_id == message.conversation_id
                    && m.sender_kind == message.sender_kind
                    && m.sender_id == message.sender_id
                    && m.client_msg_id == message.client_msg_id
            })
            .cloned();
        if let Some(existing) = existing {
            return Ok((existing, false));
        }
        tables.messages.push(message.clone());
        Ok((message, true))
    }
}

#[async_trait]
impl ReadStateWriter for MemoryScope {
    async fn upsert_last_read(
        &mut self,
        conversation_id: Uuid,
        kind: ParticipantKind,
        subject_id: i64,
        last_message_id: Uuid,
    ) -> Result<(), Error> {
        let mut tables = self.tables.lock();
        tables.read_states.insert(
            (conversation_id, kind, subject_id),
            ReadState {
                conversation_id,
                kind,
                subject_id,
                last_read_message_id: Some(last_message_id),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl OutboxWriter for MemoryScope {
    async fn add(&mut self, event_type: &str, payload: Json) -> Result<(), Error> {
        let mut tables = self.tables.lock();
        let id = tables.next_outbox_id;
        tables.next_outbox_id += 1;
        let now = Utc::now();
        tables.outbox.push(OutboxRecord {
            id,
            event_type: event_type.to_string(),
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn fetch_pending(&mut self, batch_size: i64) -> Result<Vec<OutboxRecord>, Error> {
        let mut tables = self.tables.lock();
        let now = Utc::now();
        let mut claimed = Vec::new();
        let mut rows: Vec<&mut OutboxRecord> = tables
            .outbox
            .iter_mut()
            .filter(|r| {
                matches!(r.status, OutboxStatus::Pending | OutboxStatus::Failed)
                    && r.next_retry_at.map(|t| t <= now).unwrap_or(true)
            })
            .collect();
        rows.sort_by_key(|r| r.created_at);
        for row in rows.into_iter().take(batch_size.max(0) as usize) {
            row.status = OutboxStatus::Processing;
            claimed.push(row.clone());
        }
        Ok(claimed)
    }

    async fn mark_sent(&mut self, ids: &[i64]) -> Result<(), Error> {
        let mut tables = self.tables.lock();
        for row in tables.outbox.iter_mut() {
            if ids.contains(&row.id) {
                row.status = OutboxStatus::Sent;
                row.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn mark_failed(&mut self, id: i64, next_retry_at: DateTime<Utc>) -> Result<(), Error> {
        let mut tables = self.tables.lock();
        if let Some(row) = tables.outbox.iter_mut().find(|r| r.id == id) {
            row.status = OutboxStatus::Failed;
            row.attempts += 1;
            row.next_retry_at = Some(next_retry_at);
            row.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl StorageScope for MemoryScope {
    async fn commit(self: Box<Self>) -> Result<(), Error> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        Ok(())
    }
}
