//! Environment-driven configuration, following the teacher's `DbConfig`
//! pattern of one `Default` impl reading `env::var` with sane fallbacks.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/leafchat".to_string()),
            max_connections: env_parse("DB_POOL_SIZE", 10),
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_attempts: i32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(env_parse("OUTBOX_POLL_INTERVAL", 1)),
            batch_size: env_parse("OUTBOX_BATCH_SIZE", 50),
            max_attempts: env_parse("OUTBOX_MAX_ATTEMPTS", 5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub redis_url: String,
    pub pubsub_channel: String,
    pub events_stream: String,
    pub events_group: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379/0".to_string()),
            pubsub_channel: std::env::var("REDIS_PUBSUB_CHANNEL")
                .unwrap_or_else(|_| "chat.fanout".to_string()),
            events_stream: std::env::var("LEAF_EVENTS_STREAM")
                .unwrap_or_else(|_| "leaf.events".to_string()),
            events_group: std::env::var("LEAF_EVENTS_GROUP")
                .unwrap_or_else(|_| "chat-service".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub heartbeat_seconds: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            heartbeat_seconds: env_parse("WS_HEARTBEAT_SECONDS", 30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
