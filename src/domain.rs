//! Core entities and value objects: Conversation, Participant, Message,
//! ReadState, OutboxRecord, and the authenticated caller identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    User,
    Admin,
}

impl std::fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantKind::User => write!(f, "user"),
            ParticipantKind::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    System,
    Attachment,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Text => write!(f, "text"),
            MessageType::System => write!(f, "system"),
            MessageType::Attachment => write!(f, "attachment"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub topic_type: String,
    pub topic_id: Option<i64>,
    pub status: ConversationStatus,
    pub assignee_admin_id: Option<i64>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub kind: ParticipantKind,
    pub subject_id: i64,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_kind: ParticipantKind,
    pub sender_id: i64,
    #[sqlx(rename = "type")]
    pub r#type: MessageType,
    pub body: Option<String>,
    pub payload: Option<Json>,
    pub client_msg_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReadState {
    pub conversation_id: Uuid,
    pub kind: ParticipantKind,
    pub subject_id: i64,
    pub last_read_message_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxRecord {
    pub id: i64,
    pub event_type: String,
    pub payload: Json,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Authenticated caller identity, resolved by the token verifier (§1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub kind: ParticipantKind,
    pub subject_id: i64,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.kind == ParticipantKind::Admin || self.roles.iter().any(|r| r == "admin")
    }

    /// Connection-registry key, e.g. `"user:42"`.
    pub fn principal_key(&self) -> String {
        format!("{}:{}", self.kind, self.subject_id)
    }

    /// Synthetic caller used by the ingress consumer for system-originated messages.
    pub fn system() -> Self {
        Principal {
            kind: ParticipantKind::Admin,
            subject_id: 0,
            roles: vec!["admin".to_string()],
        }
    }
}
