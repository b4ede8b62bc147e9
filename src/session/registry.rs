//! Tracks which sockets belong to which principal and which conversations
//! each principal is currently subscribed to, mirroring the teacher's
//! `ConnectionTracker` DashMap-per-key style rather than one global lock.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::protocol::WsOutbound;

type Outbox = mpsc::Sender<WsOutbound>;

#[derive(Default)]
pub struct SessionRegistry {
    connections: DashMap<String, Vec<(u64, Outbox)>>,
    subscriptions: DashMap<Uuid, HashSet<String>>,
    next_socket_id: std::sync::atomic::AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly connected socket for `principal_key`, returning a
    /// handle used to unregister it on disconnect.
    pub fn connect(&self, principal_key: &str, sender: Outbox) -> u64 {
        let socket_id = self
            .next_socket_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.connections
            .entry(principal_key.to_string())
            .or_default()
            .push((socket_id, sender));
        socket_id
    }

    /// Removes a socket and, if it was the principal's last one, drops the
    /// principal from every conversation it was subscribed to.
    pub fn disconnect(&self, principal_key: &str, socket_id: u64) {
        let mut now_empty = false;
        if let Some(mut sockets) = self.connections.get_mut(principal_key) {
            sockets.retain(|(id, _)| *id != socket_id);
            now_empty = sockets.is_empty();
        }
        if now_empty {
            self.connections.remove(principal_key);
            for mut entry in self.subscriptions.iter_mut() {
                entry.remove(principal_key);
            }
        }
    }

    pub fn subscribe(&self, principal_key: &str, conversation_id: Uuid) {
        self.subscriptions
            .entry(conversation_id)
            .or_default()
            .insert(principal_key.to_string());
    }

    pub fn unsubscribe(&self, principal_key: &str, conversation_id: Uuid) {
        if let Some(mut subs) = self.subscriptions.get_mut(&conversation_id) {
            subs.remove(principal_key);
        }
    }

    /// Sends `message` to every socket subscribed to `conversation_id`.
    /// Sockets whose receiver has dropped are collected and disconnected
    /// after the full fan-out pass, never mutated mid-iteration.
    pub async fn broadcast_to_conversation(&self, conversation_id: Uuid, message: WsOutbound) {
        let Some(subscribers) = self
            .subscriptions
            .get(&conversation_id)
            .map(|s| s.clone())
        else {
            return;
        };

        let mut dead = Vec::new();
        for principal_key in subscribers {
            if let Some(sockets) = self.connections.get(&principal_key) {
                for (socket_id, sender) in sockets.iter() {
                    if sender.send(message.clone()).await.is_err() {
                        dead.push((principal_key.clone(), *socket_id));
                    }
                }
            }
        }
        for (principal_key, socket_id) in dead {
            self.disconnect(&principal_key, socket_id);
        }
    }

    pub async fn send_to_principal(&self, principal_key: &str, message: WsOutbound) {
        let Some(sockets) = self
            .connections
            .get(principal_key)
            .map(|s| s.clone())
        else {
            return;
        };

        let mut dead = Vec::new();
        for (socket_id, sender) in sockets {
            if sender.send(message.clone()).await.is_err() {
                dead.push(socket_id);
            }
        }
        for socket_id in dead {
            self.disconnect(principal_key, socket_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcasts_only_to_subscribed_principals() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.connect("user:1", tx_a);
        registry.connect("user:2", tx_b);

        let convo = Uuid::new_v4();
        registry.subscribe("user:1", convo);

        registry
            .broadcast_to_conversation(convo, WsOutbound::event("message.created", serde_json::json!({})))
            .await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_drops_last_socket_subscriptions() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let socket_id = registry.connect("user:1", tx);
        let convo = Uuid::new_v4();
        registry.subscribe("user:1", convo);

        registry.disconnect("user:1", socket_id);

        let (tx2, mut rx2) = mpsc::channel(4);
        registry.connect("user:1", tx2);
        registry
            .broadcast_to_conversation(convo, WsOutbound::event("message.created", serde_json::json!({})))
            .await;
        assert!(rx2.try_recv().is_err());
    }
}
