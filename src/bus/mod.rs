//! Fan-out bus: outbox records become published events once committed.
//! `redis` is the live Pub/Sub adapter; `memory` is an in-process broadcast
//! fake used by tests, matching the storage module's real/fake split.

pub mod memory;
pub mod redis;

pub use redis::InboundEvent;

use async_trait::async_trait;
use serde_json::{json, Value as Json};

use crate::error::Error;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, channel: &str, event_type: &str, payload: Json) -> Result<(), Error>;

    /// Side-effect-free connectivity check, for readiness probes — must not
    /// publish anything onto the fanout channel.
    async fn ping(&self) -> Result<(), Error>;
}

/// Wire envelope shared by the Pub/Sub fanout and the in-memory fake:
/// `{"event": <type>, "data": <payload>}`.
pub fn serialize_event(event_type: &str, payload: Json) -> String {
    json!({ "event": event_type, "data": payload }).to_string()
}

pub fn deserialize_event(raw: &str) -> Result<(String, Json), Error> {
    let value: Json = serde_json::from_str(raw)
        .map_err(|e| Error::Bus(format!("invalid event envelope: {e}")))?;
    let event = value
        .get("event")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Bus("event envelope missing 'event' field".to_string()))?
        .to_string();
    let data = value
        .get("data")
        .cloned()
        .ok_or_else(|| Error::Bus("event envelope missing 'data' field".to_string()))?;
    Ok((event, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_event() {
        let raw = serialize_event("chat.message_created", json!({"a": 1}));
        let (event, data) = deserialize_event(&raw).unwrap();
        assert_eq!(event, "chat.message_created");
        assert_eq!(data, json!({"a": 1}));
    }
}
