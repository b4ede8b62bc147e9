//! Bridges the bus's fanout stream into the session registry: every event
//! published through the outbox dispatcher eventually arrives here and gets
//! routed to whichever sockets are subscribed to its conversation.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use super::protocol::WsOutbound;
use super::registry::SessionRegistry;
use crate::bus::InboundEvent;

/// Consumes `events` forever, extracting `conversation_id` from each
/// payload and broadcasting the event to that conversation's subscribers.
/// Events without a `conversation_id` field are dropped with a warning —
/// every fanout event this service emits carries one.
pub async fn run(
    registry: Arc<SessionRegistry>,
    mut events: tokio::sync::mpsc::Receiver<InboundEvent>,
) {
    while let Some((event_type, data)) = events.recv().await {
        let Some(conversation_id) = data
            .get("conversation_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            warn!(event_type = %event_type, "fanout event missing conversation_id, dropping");
            continue;
        };
        registry
            .broadcast_to_conversation(conversation_id, WsOutbound::event(&event_type, data))
            .await;
    }
}
