use uuid::Uuid;

use crate::domain::Principal;
use crate::error::Error;
use crate::storage::{ReadStateWriter, StorageScope};

use super::assert_conversation_access;

/// Records the caller's last-read message for a conversation.
pub async fn mark_read(
    conversation_id: Uuid,
    principal: &Principal,
    last_message_id: Uuid,
    mut scope: Box<dyn StorageScope>,
) -> Result<(), Error> {
    let conversation = scope.get_by_id(conversation_id).await?;
    assert_conversation_access(principal, conversation, &mut *scope).await?;

    scope
        .upsert_last_read(
            conversation_id,
            principal.kind,
            principal.subject_id,
            last_message_id,
        )
        .await?;
    scope.commit().await?;
    Ok(())
}
