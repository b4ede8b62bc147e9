//! Redis Pub/Sub fanout: the outbox dispatcher publishes onto a single
//! broadcast channel; the WebSocket layer runs one dedicated subscriber
//! connection and forwards frames into the session bridge.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use futures::StreamExt;
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Error;

use super::{deserialize_event, serialize_event, EventPublisher};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct RedisPublisher {
    pool: Pool,
}

impl RedisPublisher {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, channel: &str, event_type: &str, payload: Json) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        let body = serialize_event(event_type, payload);
        deadpool_redis::redis::cmd("PUBLISH")
            .arg(channel)
            .arg(body)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;
        Ok(())
    }
}

/// A received fanout event: the envelope's event type plus its data payload.
pub type InboundEvent = (String, Json);

/// Subscribes to `channel` on a dedicated connection (not pulled from the
/// shared pool, matching the teacher's bridge connection) and forwards
/// decoded events to the returned receiver. Reconnects with a fixed delay on
/// any connection error; malformed envelopes are logged and skipped.
pub fn subscribe(redis_url: String, channel: String) -> mpsc::Receiver<InboundEvent> {
    let (tx, rx) = mpsc::channel(1024);
    tokio::spawn(async move {
        loop {
            if tx.is_closed() {
                return;
            }
            let client = match deadpool_redis::redis::Client::open(redis_url.as_str()) {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "failed to build redis client for pub/sub, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "failed to open redis pub/sub connection, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            if let Err(e) = pubsub.subscribe(&channel).await {
                warn!(error = %e, channel = %channel, "failed to subscribe, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
            debug!(channel = %channel, "subscribed to fanout channel");

            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let raw: String = match msg.get_payload() {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to read pub/sub payload");
                        continue;
                    }
                };
                match deserialize_event(&raw) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping malformed fanout event"),
                }
            }
            warn!("fanout subscription stream ended, reconnecting");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    });
    rx
}
