//! Write-path services: `SendMessage`, `OpenSupportConversation`,
//! `OpenTopicConversation`, `AssignConversation`, `CloseConversation`,
//! `MarkRead`, `ListMessages`, `ListConversations`. One module per verb
//! group, mirroring the Python `services/*.py` layout, implemented as free
//! async functions that take ownership of a `Box<dyn StorageScope>` and
//! decide for themselves whether to call `commit()` — mirroring the Python
//! services' explicit `uow.commit()` rather than committing implicitly.

pub mod admin;
pub mod conversation;
pub mod message;
pub mod read_state;

use crate::domain::{Conversation, Principal};
use crate::error::Error;
use crate::storage::{ParticipantReader, StorageScope};

/// Shared authorisation rule used by every service that touches a conversation:
/// admins have global access; everyone else must hold a matching participant row.
async fn assert_conversation_access(
    principal: &Principal,
    conversation: Option<Conversation>,
    scope: &mut dyn StorageScope,
) -> Result<Conversation, Error> {
    let conversation =
        conversation.ok_or_else(|| Error::NotFound("conversation not found".to_string()))?;

    if principal.is_admin() {
        return Ok(conversation);
    }

    let is_member = scope
        .is_participant(conversation.id, principal.kind, principal.subject_id)
        .await?;
    if !is_member {
        return Err(Error::Forbidden(
            "not a participant of this conversation".to_string(),
        ));
    }
    Ok(conversation)
}

fn assert_admin(principal: &Principal) -> Result<(), Error> {
    if !principal.is_admin() {
        return Err(Error::Forbidden("admin access required".to_string()));
    }
    Ok(())
}
