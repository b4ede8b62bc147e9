//! Outbox dispatcher: polls committed outbox records and publishes them onto
//! the fanout bus, retrying with exponential backoff and giving up once a
//! record has exhausted its attempt budget.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::bus::EventPublisher;
use crate::config::{BusConfig, OutboxConfig};
use crate::storage::Storage;

const BASE_DELAY: Duration = Duration::from_secs(5);
const MAX_DELAY: Duration = Duration::from_secs(300);

fn backoff_for(attempts: i32) -> Duration {
    let scaled = BASE_DELAY.saturating_mul(1u32.checked_shl(attempts as u32).unwrap_or(u32::MAX));
    scaled.min(MAX_DELAY)
}

/// Runs forever, polling for pending outbox rows on a fixed interval and
/// publishing each batch to the bus. Errors within a tick are logged and
/// swallowed so one bad record can't wedge the loop.
pub async fn run(
    storage: Arc<dyn Storage>,
    bus: Arc<dyn EventPublisher>,
    outbox_cfg: OutboxConfig,
    bus_cfg: BusConfig,
) {
    let mut ticker = interval(outbox_cfg.poll_interval);
    info!(
        interval_ms = outbox_cfg.poll_interval.as_millis(),
        batch_size = outbox_cfg.batch_size,
        "starting outbox dispatcher"
    );

    loop {
        ticker.tick().await;
        if let Err(e) = process_batch(&*storage, &*bus, &outbox_cfg, &bus_cfg).await {
            error!(error = %e, "outbox dispatch tick failed");
        }
    }
}

async fn process_batch(
    storage: &dyn Storage,
    bus: &dyn EventPublisher,
    outbox_cfg: &OutboxConfig,
    bus_cfg: &BusConfig,
) -> Result<(), crate::error::Error> {
    let mut scope = storage.begin().await?;
    let batch = scope.fetch_pending(outbox_cfg.batch_size).await?;
    if batch.is_empty() {
        scope.rollback().await?;
        return Ok(());
    }

    let mut sent_ids = Vec::new();
    for record in &batch {
        if record.attempts >= outbox_cfg.max_attempts {
            warn!(
                outbox_id = record.id,
                attempts = record.attempts,
                "outbox record exceeded max attempts, skipping"
            );
            continue;
        }

        let mut payload = record.payload.clone();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("event_type".to_string(), json!(record.event_type));
        }

        match bus
            .publish(&bus_cfg.pubsub_channel, &record.event_type, payload)
            .await
        {
            Ok(()) => sent_ids.push(record.id),
            Err(e) => {
                warn!(outbox_id = record.id, error = %e, "failed to publish outbox record");
                let next_retry_at = Utc::now() + backoff_for(record.attempts);
                scope.mark_failed(record.id, next_retry_at).await?;
            }
        }
    }

    if !sent_ids.is_empty() {
        scope.mark_sent(&sent_ids).await?;
    }
    scope.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_geometrically_and_caps() {
        assert_eq!(backoff_for(0), Duration::from_secs(5));
        assert_eq!(backoff_for(1), Duration::from_secs(10));
        assert_eq!(backoff_for(2), Duration::from_secs(20));
        assert_eq!(backoff_for(6), Duration::from_secs(300));
        assert_eq!(backoff_for(20), Duration::from_secs(300));
    }
}
