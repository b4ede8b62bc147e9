//! In-process fan-out fake used by service and session tests: publishing
//! writes straight into a broadcast channel instead of round-tripping
//! through Redis.

use async_trait::async_trait;
use serde_json::Value as Json;
use tokio::sync::broadcast;

use crate::error::Error;

use super::EventPublisher;

#[derive(Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<(String, String, Json)>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, String, Json)> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for MemoryBus {
    async fn publish(&self, channel: &str, event_type: &str, payload: Json) -> Result<(), Error> {
        let _ = self.sender.send((channel.to_string(), event_type.to_string(), payload));
        Ok(())
    }

    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_published_events_to_subscribers() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe();
        bus.publish("chat.fanout", "chat.message_created", json!({"a": 1}))
            .await
            .unwrap();
        let (channel, event_type, payload) = rx.recv().await.unwrap();
        assert_eq!(channel, "chat.fanout");
        assert_eq!(event_type, "chat.message_created");
        assert_eq!(payload, json!({"a": 1}));
    }
}
