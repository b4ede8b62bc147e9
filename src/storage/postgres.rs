//! Postgres-backed storage adapter. Idempotent insert uses
//! `INSERT ... ON CONFLICT DO NOTHING RETURNING` exactly as spec.md §9
//! mandates — no read-then-write emulation. `fetch_pending` claims rows
//! under `FOR UPDATE SKIP LOCKED` so multiple dispatcher replicas can run
//! concurrently without double-claiming a row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::{
    Conversation, ConversationStatus, Message, OutboxRecord, Participant, ParticipantKind,
};
use crate::error::Error;

use super::{
    ConversationFilter, ConversationReader, ConversationWriter, MessageReader, MessageWriter,
    OutboxWriter, ParticipantReader, ParticipantWriter, ReadStateWriter, Storage, StorageScope,
};

#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn begin(&self) -> Result<Box<dyn StorageScope>, Error> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgScope { tx: Some(tx) }))
    }
}

pub struct PgScope {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgScope {
    fn tx(&mut self) -> &mut Transaction<'static, Postgres> {
        self.tx.as_mut().expect("storage scope used after commit/rollback")
    }
}

#[async_trait]
impl ConversationReader for PgScope {
    async fn get_by_id(&mut self, id: Uuid) -> Result<Option<Conversation>, Error> {
        let row = sqlx::query_as::<_, Conversation>(
            "SELECT id, topic_type, topic_id, status, assignee_admin_id, last_message_at, created_at, updated_at
             FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.tx())
        .await?;
        Ok(row)
    }

    async fn get_support_for_user(&mut self, user_id: i64) -> Result<Option<Conversation>, Error> {
        let row = sqlx::query_as::<_, Conversation>(
            "SELECT c.id, c.topic_type, c.topic_id, c.status, c.assignee_admin_id, c.last_message_at, c.created_at, c.updated_at
             FROM conversations c
             JOIN participants p ON p.conversation_id = c.id
             WHERE p.kind = 'user' AND p.subject_id = $1
               AND c.topic_type = 'support' AND c.status = 'open'
             ORDER BY c.created_at DESC
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.tx())
        .await?;
        Ok(row)
    }

    async fn get_by_topic(
        &mut self,
        topic_type: &str,
        topic_id: i64,
        status: Option<ConversationStatus>,
    ) -> Result<Option<Conversation>, Error> {
        let row = sqlx::query_as::<_, Conversation>(
            "SELECT id, topic_type, topic_id, status, assignee_admin_id, last_message_at, created_at, updated_at
             FROM conversations
             WHERE topic_type = $1 AND topic_id = $2
               AND ($3::text IS NULL OR status = $3)
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(topic_type)
        .bind(topic_id)
        .bind(status.map(|s| match s {
            ConversationStatus::Open => "open",
            ConversationStatus::Closed => "closed",
        }))
        .fetch_optional(self.tx())
        .await?;
        Ok(row)
    }

    async fn list_for_user(
        &mut self,
        user_id: i64,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Conversation>, Error> {
        let (ts, id) = match cursor {
            Some(c) => {
                let (ts, id) = crate::cursor::decode(c)?;
                (Some(ts), Some(id))
            }
            None => (None, None),
        };
        let rows = sqlx::query_as::<_, Conversation>(
            "SELECT c.id, c.topic_type, c.topic_id, c.status, c.assignee_admin_id, c.last_message_at, c.created_at, c.updated_at
             FROM conversations c
             JOIN participants p ON p.conversation_id = c.id
             WHERE p.kind = 'user' AND p.subject_id = $1
               AND ($2::timestamptz IS NULL OR c.last_message_at < $2
                    OR (c.last_message_at = $2 AND c.id > $3))
             ORDER BY c.last_message_at DESC NULLS LAST, c.id ASC
             LIMIT $4",
        )
        .bind(user_id)
        .bind(ts)
        .bind(id)
        .bind(limit)
        .fetch_all(self.tx())
        .await?;
        Ok(rows)
    }

    async fn list_for_admin(
        &mut self,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, Error> {
        let (ts, id) = match filter.cursor.as_deref() {
            Some(c) => {
                let (ts, id) = crate::cursor::decode(c)?;
                (Some(ts), Some(id))
            }
            None => (None, None),
        };
        let status = filter.status.map(|s| match s {
            ConversationStatus::Open => "open",
            ConversationStatus::Closed => "closed",
        });
        let rows = sqlx::query_as::<_, Conversation>(
            "SELECT id, topic_type, topic_id, status, assignee_admin_id, last_message_at, created_at, updated_at
             FROM conversations
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::bigint IS NULL OR assignee_admin_id = $2)
               AND ($3::timestamptz IS NULL OR last_message_at < $3
                    OR (last_message_at = $3 AND id > $4))
             ORDER BY last_message_at DESC NULLS LAST, id ASC
             LIMIT $5",
        )
        .bind(status)
        .bind(filter.assignee_admin_id)
        .bind(ts)
        .bind(id)
        .bind(filter.limit)
        .fetch_all(self.tx())
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ConversationWriter for PgScope {
    async fn create(&mut self, conversation: Conversation) -> Result<Conversation, Error> {
        let row = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (id, topic_type, topic_id, status, assignee_admin_id, last_message_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id, topic_type, topic_id, status, assignee_admin_id, last_message_at, created_at, updated_at",
        )
        .bind(conversation.id)
        .bind(&conversation.topic_type)
        .bind(conversation.topic_id)
        .bind(conversation.status)
        .bind(conversation.assignee_admin_id)
        .bind(conversation.last_message_at)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .fetch_one(self.tx())
        .await?;
        Ok(row)
    }

    async fn assign(&mut self, id: Uuid, admin_id: i64) -> Result<(), Error> {
        sqlx::query("UPDATE conversations SET assignee_admin_id = $1, updated_at = now() WHERE id = $2")
            .bind(admin_id)
            .bind(id)
            .execute(self.tx())
            .await?;
        Ok(())
    }

    async fn close(&mut self, id: Uuid) -> Result<(), Error> {
        sqlx::query("UPDATE conversations SET status = 'closed', updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(self.tx())
            .await?;
        Ok(())
    }

    async fn touch_last_message_at(&mut self, id: Uuid, ts: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query("UPDATE conversations SET last_message_at = $1, updated_at = now() WHERE id = $2")
            .bind(ts)
            .bind(id)
            .execute(self.tx())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ParticipantReader for PgScope {
    async fn is_participant(
        &mut self,
        conversation_id: Uuid,
        kind: ParticipantKind,
        subject_id: i64,
    ) -> Result<bool, Error> {
        let row = sqlx::query(
            "SELECT 1 FROM participants WHERE conversation_id = $1 AND kind = $2 AND subject_id = $3",
        )
        .bind(conversation_id)
        .bind(kind)
        .bind(subject_id)
        .fetch_optional(self.tx())
        .await?;
        Ok(row.is_some())
    }

    async fn list_participants(&mut self, conversation_id: Uuid) -> Result<Vec<Participant>, Error> {
        let rows = sqlx::query_as::<_, Participant>(
            "SELECT conversation_id, kind, subject_id, joined_at FROM participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(self.tx())
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ParticipantWriter for PgScope {
    async fn add(&mut self, participant: Participant) -> Result<(), Error> {
        let result = sqlx::query(
            "INSERT INTO participants (conversation_id, kind, subject_id, joined_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT ON CONSTRAINT uq_participant DO NOTHING",
        )
        .bind(participant.conversation_id)
        .bind(participant.kind)
        .bind(participant.subject_id)
        .bind(participant.joined_at)
        .execute(self.tx())
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::Conflict("participant already exists".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageReader for PgScope {
    async fn list_messages(
        &mut self,
        conversation_id: Uuid,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Message>, Error> {
        let (ts, id) = match cursor {
            Some(c) => {
                let (ts, id) = crate::cursor::decode(c)?;
                (Some(ts), Some(id))
            }
            None => (None, None),
        };
        let rows = sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, sender_kind, sender_id, type, body, payload, client_msg_id, created_at
             FROM messages
             WHERE conversation_id = $1
               AND ($2::timestamptz IS NULL OR created_at > $2
                    OR (created_at = $2 AND id > $3))
             ORDER BY created_at ASC, id ASC
             LIMIT $4",
        )
        .bind(conversation_id)
        .bind(ts)
        .bind(id)
        .bind(limit)
        .fetch_all(self.tx())
        .await?;
        Ok(rows)
    }

    async fn get_by_client_msg_id(
        &mut self,
        conversation_id: Uuid,
        sender_kind: ParticipantKind,
        sender_id: i64,
        client_msg_id: Uuid,
    ) -> Result<Option<Message>, Error> {
        let row = sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, sender_kind, sender_id, type, body, payload, client_msg_id, created_at
             FROM messages
             WHERE conversation_id = $1 AND sender_kind = $2 AND sender_id = $3 AND client_msg_id = $4",
        )
        .bind(conversation_id)
        .bind(sender_kind)
        .bind(sender_id)
        .bind(client_msg_id)
        .fetch_optional(self.tx())
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl MessageWriter for PgScope {
    async fn create_if_not_exists(&mut self, message: Message) -> Result<(Message, bool), Error> {
        let inserted = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (id, conversation_id, sender_kind, sender_id, type, body, payload, client_msg_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT ON CONSTRAINT uq_message_idempotency DO NOTHING
             RETURNING id, conversation_id, sender_kind, sender_id, type, body, payload, client_msg_id, created_at",
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_kind)
        .bind(message.sender_id)
        .bind(message.r#type)
        .bind(&message.body)
        .bind(&message.payload)
        .bind(message.client_msg_id)
        .bind(message.created_at)
        .fetch_optional(self.tx())
        .await?;

        if let Some(row) = inserted {
            return Ok((row, true));
        }

        let existing = self
            .get_by_client_msg_id(
                message.conversation_id,
                message.sender_kind,
                message.sender_id,
                message.client_msg_id,
            )
            .await?
            .expect("unique constraint hit implies a matching row exists");
        Ok((existing, false))
    }
}

#[async_trait]
impl ReadStateWriter for PgScope {
    async fn upsert_last_read(
        &mut self,
        conversation_id: Uuid,
        kind: ParticipantKind,
        subject_id: i64,
        last_message_id: Uuid,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO read_state (conversation_id, kind, subject_id, last_read_message_id, updated_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT ON CONSTRAINT uq_read_state
             DO UPDATE SET last_read_message_id = EXCLUDED.last_read_message_id, updated_at = EXCLUDED.updated_at",
        )
        .bind(conversation_id)
        .bind(kind)
        .bind(subject_id)
        .bind(last_message_id)
        .execute(self.tx())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxWriter for PgScope {
    async fn add(&mut self, event_type: &str, payload: Json) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO outbox_messages (event_type, payload, status, attempts, created_at, updated_at)
             VALUES ($1, $2, 'pending', 0, now(), now())",
        )
        .bind(event_type)
        .bind(payload)
        .execute(self.tx())
        .await?;
        Ok(())
    }

    async fn fetch_pending(&mut self, batch_size: i64) -> Result<Vec<OutboxRecord>, Error> {
        let claimed_ids: Vec<i64> = sqlx::query(
            "SELECT id FROM outbox_messages
             WHERE status IN ('pending', 'failed')
               AND (next_retry_at IS NULL OR next_retry_at <= now())
             ORDER BY created_at ASC
             LIMIT $1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(batch_size)
        .fetch_all(self.tx())
        .await?
        .iter()
        .map(|row| row.get::<i64, _>("id"))
        .collect();

        if claimed_ids.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query_as::<_, OutboxRecord>(
            "UPDATE outbox_messages SET status = 'processing', updated_at = now()
             WHERE id = ANY($1)
             RETURNING id, event_type, payload, status, attempts, next_retry_at, created_at, updated_at",
        )
        .bind(&claimed_ids)
        .fetch_all(self.tx())
        .await?;
        Ok(rows)
    }

    async fn mark_sent(&mut self, ids: &[i64]) -> Result<(), Error> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE outbox_messages SET status = 'sent', updated_at = now() WHERE id = ANY($1)")
            .bind(ids)
            .execute(self.tx())
            .await?;
        Ok(())
    }

    async fn mark_failed(&mut self, id: i64, next_retry_at: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query(
            "UPDATE outbox_messages
             SET status = 'failed', attempts = attempts + 1, next_retry_at = $1, updated_at = now()
             WHERE id = $2",
        )
        .bind(next_retry_at)
        .bind(id)
        .execute(self.tx())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StorageScope for PgScope {
    async fn commit(mut self: Box<Self>) -> Result<(), Error> {
        self.tx.take().expect("scope used after commit/rollback").commit().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), Error> {
        self.tx.take().expect("scope used after commit/rollback").rollback().await?;
        Ok(())
    }
}
