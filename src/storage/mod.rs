//! Storage adapter (ports): transactional reader/writer facets per entity.
//!
//! Every write-path service runs inside one `StorageScope`, which commits or
//! rolls back as a unit. Two implementations exist: `postgres` (the real
//! adapter, `sqlx::Transaction`-backed) and `memory` (an in-process fake used
//! by service unit tests), matching the teacher's own preference for
//! in-module `#[cfg(test)]` fakes over mocking a live database.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::domain::{
    Conversation, ConversationStatus, Message, OutboxRecord, Participant, ParticipantKind,
};
use crate::error::Error;

#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub status: Option<ConversationStatus>,
    pub assignee_admin_id: Option<i64>,
    pub cursor: Option<String>,
    pub limit: i64,
}

#[async_trait]
pub trait ConversationReader {
    async fn get_by_id(&mut self, id: Uuid) -> Result<Option<Conversation>, Error>;
    async fn get_support_for_user(&mut self, user_id: i64) -> Result<Option<Conversation>, Error>;
    async fn get_by_topic(
        &mut self,
        topic_type: &str,
        topic_id: i64,
        status: Option<ConversationStatus>,
    ) -> Result<Option<Conversation>, Error>;
    async fn list_for_user(
        &mut self,
        user_id: i64,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Conversation>, Error>;
    async fn list_for_admin(
        &mut self,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, Error>;
}

#[async_trait]
pub trait ConversationWriter {
    async fn create(&mut self, conversation: Conversation) -> Result<Conversation, Error>;
    async fn assign(&mut self, id: Uuid, admin_id: i64) -> Result<(), Error>;
    async fn close(&mut self, id: Uuid) -> Result<(), Error>;
    async fn touch_last_message_at(&mut self, id: Uuid, ts: DateTime<Utc>) -> Result<(), Error>;
}

#[async_trait]
pub trait ParticipantReader {
    async fn is_participant(
        &mut self,
        conversation_id: Uuid,
        kind: ParticipantKind,
        subject_id: i64,
    ) -> Result<bool, Error>;
    async fn list_participants(&mut self, conversation_id: Uuid) -> Result<Vec<Participant>, Error>;
}

#[async_trait]
pub trait ParticipantWriter {
    /// Fails cleanly (`Conflict`) on a duplicate `(conversation_id, kind, subject_id)` triple.
    async fn add(&mut self, participant: Participant) -> Result<(), Error>;
}

#[async_trait]
pub trait MessageReader {
    async fn list_messages(
        &mut self,
        conversation_id: Uuid,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Message>, Error>;
    async fn get_by_client_msg_id(
        &mut self,
        conversation_id: Uuid,
        sender_kind: ParticipantKind,
        sender_id: i64,
        client_msg_id: Uuid,
    ) -> Result<Option<Message>, Error>;
}

#[async_trait]
pub trait MessageWriter {
    /// Insert-or-return-existing, race-safe under the idempotency tuple.
    async fn create_if_not_exists(&mut self, message: Message) -> Result<(Message, bool), Error>;
}

#[async_trait]
pub trait ReadStateWriter {
    async fn upsert_last_read(
        &mut self,
        conversation_id: Uuid,
        kind: ParticipantKind,
        subject_id: i64,
        last_message_id: Uuid,
    ) -> Result<(), Error>;
}

#[async_trait]
pub trait OutboxWriter {
    async fn add(&mut self, event_type: &str, payload: Json) -> Result<(), Error>;
    /// Atomic claim: transitions up to `batch_size` pending/failed, due rows to
    /// `processing` under a skip-locked row lock and returns them.
    async fn fetch_pending(&mut self, batch_size: i64) -> Result<Vec<OutboxRecord>, Error>;
    async fn mark_sent(&mut self, ids: &[i64]) -> Result<(), Error>;
    async fn mark_failed(&mut self, id: i64, next_retry_at: DateTime<Utc>) -> Result<(), Error>;
}

/// A transactional scope bundling every facet. Implementers commit or roll
/// back as a unit; services never see the underlying transaction type.
#[async_trait]
pub trait StorageScope:
    ConversationReader
    + ConversationWriter
    + ParticipantReader
    + ParticipantWriter
    + MessageReader
    + MessageWriter
    + ReadStateWriter
    + OutboxWriter
    + Send
{
    async fn commit(self: Box<Self>) -> Result<(), Error>;
    async fn rollback(self: Box<Self>) -> Result<(), Error>;
}

/// Opens a new transactional scope. Implemented by the Postgres pool and the
/// in-memory fake store.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StorageScope>, Error>;
}
