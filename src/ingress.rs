//! Consumes external LeafFlow events off a Redis Streams consumer group and
//! turns a subset of them into conversation state: new orders get a topic
//! conversation, status changes get a system message posted into it.

use std::collections::HashMap;
use std::sync::Arc;

use deadpool_redis::redis::Value as RedisValue;
use deadpool_redis::Pool;
use once_cell::sync::Lazy;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BusConfig;
use crate::domain::{MessageType, Principal};
use crate::error::Error;
use crate::services::{conversation, message};
use crate::storage::Storage;

static ORDER_STATUS_LABELS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("confirmed", "Заказ подтверждён"),
        ("processing", "Заказ в обработке"),
        ("shipped", "Заказ отправлен"),
        ("delivered", "Заказ доставлен"),
        ("completed", "Заказ завершён"),
        ("cancelled", "Заказ отменён"),
        ("refunded", "Возврат оформлен"),
    ])
});

/// Runs the consumer group loop forever: ensures the group exists, then
/// XREADGROUPs in a loop, dispatching each entry and XACKing on success.
/// A per-message handler failure is logged and the message is left
/// unacked for redelivery; a connection-level failure sleeps 5s and retries.
pub async fn run(storage: Arc<dyn Storage>, redis_pool: Pool, bus_cfg: BusConfig) {
    let consumer_name = format!("consumer-{}", Uuid::new_v4().simple());
    if let Err(e) = ensure_group(&redis_pool, &bus_cfg.events_stream, &bus_cfg.events_group).await {
        error!(error = %e, "failed to create leaf events consumer group");
        return;
    }
    info!(consumer = %consumer_name, stream = %bus_cfg.events_stream, "leaf events consumer started");

    loop {
        match read_batch(&redis_pool, &bus_cfg, &consumer_name).await {
            Ok(entries) => {
                for (id, fields) in entries {
                    let event_type = fields
                        .get("event_type")
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string());
                    match handle_event(&storage, &event_type, &fields).await {
                        Ok(()) => {
                            if let Err(e) = ack(&redis_pool, &bus_cfg, &id).await {
                                warn!(error = %e, id = %id, "failed to ack leaf event");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, id = %id, event_type = %event_type, "leaf event handler failed");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "leaf events consumer error, retrying in 5s");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

async fn ensure_group(pool: &Pool, stream: &str, group: &str) -> Result<(), Error> {
    let mut conn = pool.get().await?;
    let result: Result<String, _> = deadpool_redis::redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(stream)
        .arg(group)
        .arg("$")
        .arg("MKSTREAM")
        .query_async(&mut conn)
        .await;
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains("BUSYGROUP") => {
            debug!(group, "consumer group already exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn read_batch(
    pool: &Pool,
    bus_cfg: &BusConfig,
    consumer_name: &str,
) -> Result<Vec<(String, HashMap<String, String>)>, Error> {
    let mut conn = pool.get().await?;
    let value: RedisValue = deadpool_redis::redis::cmd("XREADGROUP")
        .arg("GROUP")
        .arg(&bus_cfg.events_group)
        .arg(consumer_name)
        .arg("BLOCK")
        .arg(5000)
        .arg("COUNT")
        .arg(10)
        .arg("STREAMS")
        .arg(&bus_cfg.events_stream)
        .arg(">")
        .query_async(&mut conn)
        .await?;
    Ok(parse_xreadgroup(value))
}

async fn ack(pool: &Pool, bus_cfg: &BusConfig, id: &str) -> Result<(), Error> {
    let mut conn = pool.get().await?;
    deadpool_redis::redis::cmd("XACK")
        .arg(&bus_cfg.events_stream)
        .arg(&bus_cfg.events_group)
        .arg(id)
        .query_async::<i64>(&mut conn)
        .await?;
    Ok(())
}

fn parse_xreadgroup(value: RedisValue) -> Vec<(String, HashMap<String, String>)> {
    let RedisValue::Array(streams) = value else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for stream_entry in streams {
        let RedisValue::Array(parts) = stream_entry else {
            continue;
        };
        let Some(RedisValue::Array(entries)) = parts.into_iter().nth(1) else {
            continue;
        };
        for entry in entries {
            let RedisValue::Array(entry_parts) = entry else {
                continue;
            };
            if entry_parts.len() != 2 {
                continue;
            }
            let id = match &entry_parts[0] {
                RedisValue::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
                RedisValue::SimpleString(s) => s.clone(),
                _ => continue,
            };
            let RedisValue::Array(field_list) = &entry_parts[1] else {
                continue;
            };
            let mut fields = HashMap::new();
            let mut iter = field_list.iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                if let (Some(k), Some(v)) = (redis_value_to_string(k), redis_value_to_string(v)) {
                    fields.insert(k, v);
                }
            }
            out.push((id, fields));
        }
    }
    out
}

fn redis_value_to_string(value: &RedisValue) -> Option<String> {
    match value {
        RedisValue::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        RedisValue::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

async fn handle_event(
    storage: &Arc<dyn Storage>,
    event_type: &str,
    fields: &HashMap<String, String>,
) -> Result<(), Error> {
    match event_type {
        "user.blocked" => {
            let user_id = fields.get("user_id").cloned().unwrap_or_default();
            info!(user_id = %user_id, "user blocked — future send_message calls will be rejected");
            // TODO: persist blocked state, check in send_message
            Ok(())
        }
        "user.updated" => {
            debug!(user_id = ?fields.get("user_id"), "user updated (no-op)");
            Ok(())
        }
        "order.created" => handle_order_created(storage, fields).await,
        "order.status_changed" => handle_order_status_changed(storage, fields).await,
        other => {
            debug!(event_type = %other, "ignoring unknown event");
            Ok(())
        }
    }
}

async fn handle_order_created(
    storage: &Arc<dyn Storage>,
    fields: &HashMap<String, String>,
) -> Result<(), Error> {
    let user_id = parse_field(fields, "user_id")?;
    let order_id = parse_field(fields, "order_id")?;

    let scope = storage.begin().await?;
    let (conv, created) = conversation::open_topic_conversation("order", order_id, user_id, scope).await?;

    if created {
        info!(conversation_id = %conv.id, order_id, user_id, "created conversation for order");
    } else {
        debug!(conversation_id = %conv.id, order_id, "conversation already exists for order");
    }
    Ok(())
}

async fn handle_order_status_changed(
    storage: &Arc<dyn Storage>,
    fields: &HashMap<String, String>,
) -> Result<(), Error> {
    let order_id = parse_field(fields, "order_id")?;
    let new_status = fields
        .get("status")
        .ok_or_else(|| Error::Validation("order.status_changed missing 'status'".to_string()))?;
    let old_status = fields.get("old_status").cloned().unwrap_or_else(|| "?".to_string());

    let mut scope = storage.begin().await?;
    let conv = match crate::storage::ConversationReader::get_by_topic(
        &mut *scope,
        "order",
        order_id,
        Some(crate::domain::ConversationStatus::Open),
    )
    .await?
    {
        Some(c) => c,
        None => {
            warn!(order_id, status = %new_status, "no conversation for order, cannot notify");
            scope.rollback().await?;
            return Ok(());
        }
    };

    let label = ORDER_STATUS_LABELS
        .get(new_status.as_str())
        .copied()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("Статус заказа: {new_status}"));
    let body = format!("{label} (#{order_id})");

    message::send_message(
        conv.id,
        &Principal::system(),
        Uuid::new_v4(),
        MessageType::System,
        Some(body),
        scope,
    )
    .await?;

    info!(order_id, old_status = %old_status, new_status = %new_status, conversation_id = %conv.id, "notified order status change");
    Ok(())
}

fn parse_field(fields: &HashMap<String, String>, key: &str) -> Result<i64, Error> {
    fields
        .get(key)
        .ok_or_else(|| Error::Validation(format!("missing field '{key}'")))?
        .parse::<i64>()
        .map_err(|e| Error::Validation(format!("invalid field '{key}': {e}")))
}
