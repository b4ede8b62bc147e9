//! S6 — live fan-out: two sockets subscribed to the same conversation both
//! receive exactly one `message.created` frame when a third party sends a
//! message, routed end-to-end through the outbox, the bus, and the
//! bus-to-session bridge (invariant 3 and 7 of spec.md §8).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use leafchat_server::bus::memory::MemoryBus;
use leafchat_server::bus::EventPublisher;
use leafchat_server::config::{BusConfig, OutboxConfig};
use leafchat_server::domain::{MessageType, ParticipantKind, Principal};
use leafchat_server::services::{conversation, message};
use leafchat_server::session::{bridge, protocol::WsOutbound, SessionRegistry};
use leafchat_server::storage::memory::MemoryStorage;
use leafchat_server::storage::{ParticipantWriter, Storage, StorageScope};
use leafchat_server::outbox;

fn user(id: i64) -> Principal {
    Principal { kind: ParticipantKind::User, subject_id: id, roles: vec![] }
}

#[tokio::test]
async fn both_subscribers_receive_one_frame_for_a_new_message() {
    let storage = MemoryStorage::new();

    // Open the conversation and add an admin participant so both `A` and
    // `B` are subscribable principals (user:42 is added automatically).
    let conv = {
        let scope = storage.begin().await.unwrap();
        conversation::open_support_conversation(42, scope).await.unwrap()
    };
    {
        let mut scope = storage.begin().await.unwrap();
        ParticipantWriter::add(
            &mut *scope,
            leafchat_server::domain::Participant {
                conversation_id: conv.id,
                kind: ParticipantKind::Admin,
                subject_id: 1,
                joined_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();
        scope.commit().await.unwrap();
    }

    let storage: Arc<dyn Storage> = Arc::new(storage);
    let bus = Arc::new(MemoryBus::new());
    let bus_publisher: Arc<dyn EventPublisher> = bus.clone();

    let registry = Arc::new(SessionRegistry::new());
    let (tx_a, mut rx_a) = mpsc::channel::<WsOutbound>(8);
    let (tx_b, mut rx_b) = mpsc::channel::<WsOutbound>(8);
    registry.connect("user:42", tx_a);
    registry.connect("admin:1", tx_b);
    registry.subscribe("user:42", conv.id);
    registry.subscribe("admin:1", conv.id);

    // Wire the fanout: MemoryBus -> mpsc channel shaped like the Redis
    // subscriber's output -> bridge -> registry.
    let (bridge_tx, bridge_rx) = mpsc::channel(64);
    let mut bus_rx = bus.subscribe();
    let forward = tokio::spawn(async move {
        while let Ok((_channel, event_type, payload)) = bus_rx.recv().await {
            if bridge_tx.send((event_type, payload)).await.is_err() {
                break;
            }
        }
    });
    let bridge_task = tokio::spawn(bridge::run(registry.clone(), bridge_rx));

    let dispatcher = tokio::spawn(outbox::run(
        storage.clone(),
        bus_publisher,
        OutboxConfig { poll_interval: Duration::from_millis(15), batch_size: 10, max_attempts: 5 },
        BusConfig {
            redis_url: String::new(),
            pubsub_channel: "chat.fanout".to_string(),
            events_stream: String::new(),
            events_group: String::new(),
        },
    ));

    // (user, 42) sends a message "via REST" (the same path the HTTP handler
    // uses: open a scope, call the service, let it commit and append the
    // outbox row).
    let scope = storage.begin().await.unwrap();
    let (sent, created) = message::send_message(
        conv.id,
        &user(42),
        uuid::Uuid::new_v4(),
        MessageType::Text,
        Some("need help with my order".to_string()),
        scope,
    )
    .await
    .unwrap();
    assert!(created);

    let frame_a = tokio::time::timeout(Duration::from_secs(2), rx_a.recv())
        .await
        .expect("socket A should receive a frame")
        .expect("channel should stay open");
    let frame_b = tokio::time::timeout(Duration::from_secs(2), rx_b.recv())
        .await
        .expect("socket B should receive a frame")
        .expect("channel should stay open");

    dispatcher.abort();
    bridge_task.abort();
    forward.abort();

    for frame in [&frame_a, &frame_b] {
        assert_eq!(frame.kind, "chat.message_created");
        assert_eq!(
            frame.data.get("message_id").and_then(|v| v.as_str()),
            Some(sent.id.to_string()).as_deref()
        );
    }

    // Exactly one frame each — a second recv within a short window finds
    // nothing queued.
    assert!(tokio::time::timeout(Duration::from_millis(100), rx_a.recv()).await.is_err());
    assert!(tokio::time::timeout(Duration::from_millis(100), rx_b.recv()).await.is_err());
}

/// An unparseable or missing `conversation_id` in a fanout payload is
/// dropped rather than panicking or broadcasting to every conversation.
#[tokio::test]
async fn bridge_drops_events_without_a_conversation_id() {
    let registry = Arc::new(SessionRegistry::new());
    let (tx, mut rx) = mpsc::channel::<WsOutbound>(4);
    registry.connect("user:1", tx);
    let convo = uuid::Uuid::new_v4();
    registry.subscribe("user:1", convo);

    let (bridge_tx, bridge_rx) = mpsc::channel(8);
    let bridge_task = tokio::spawn(bridge::run(registry.clone(), bridge_rx));

    bridge_tx
        .send(("chat.message_created".to_string(), serde_json::json!({"no_conversation_id": true})))
        .await
        .unwrap();
    // Give the bridge a beat to (not) process it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    bridge_task.abort();

    assert!(rx.try_recv().is_err());
}
