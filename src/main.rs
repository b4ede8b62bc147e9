use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leafchat_server::auth::TokenVerifier;
use leafchat_server::bus::memory::MemoryBus;
use leafchat_server::bus::redis::{self as bus_redis, RedisPublisher};
use leafchat_server::bus::EventPublisher;
use leafchat_server::config::{AuthConfig, BusConfig, DbConfig, OutboxConfig, WsConfig};
use leafchat_server::session::{bridge, SessionRegistry};
use leafchat_server::state::AppState;
use leafchat_server::storage::postgres::PgStorage;
use leafchat_server::storage::Storage;
use leafchat_server::{http, ingress, outbox};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }
        #[cfg(not(debug_assertions))]
        {
            "warn".to_string()
        }
    });
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting LeafChat server");

    let db_cfg = DbConfig::default();
    let outbox_cfg = OutboxConfig::default();
    let bus_cfg = BusConfig::default();
    let ws_cfg = WsConfig::default();
    let auth_cfg = AuthConfig::default();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(db_cfg.max_connections)
        .min_connections(db_cfg.min_connections)
        .acquire_timeout(db_cfg.acquire_timeout)
        .idle_timeout(db_cfg.idle_timeout)
        .connect(&db_cfg.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database initialized");

    let storage: Arc<dyn Storage> = Arc::new(PgStorage::new(pool));

    let redis_cfg = deadpool_redis::Config::from_url(&bus_cfg.redis_url);
    let redis_pool = redis_cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
    let bus: Arc<dyn EventPublisher> = if std::env::var("LEAFCHAT_BUS_BACKEND").as_deref() == Ok("memory") {
        Arc::new(MemoryBus::new())
    } else {
        Arc::new(RedisPublisher::new(redis_pool.clone()))
    };

    let registry = Arc::new(SessionRegistry::new());

    let fanout_rx = bus_redis::subscribe(bus_cfg.redis_url.clone(), bus_cfg.pubsub_channel.clone());
    tokio::spawn(bridge::run(registry.clone(), fanout_rx));
    tracing::info!("bus-to-session bridge started");

    tokio::spawn(outbox::run(
        storage.clone(),
        bus.clone(),
        outbox_cfg,
        bus_cfg.clone(),
    ));
    tracing::info!("outbox dispatcher started");

    tokio::spawn(ingress::run(storage.clone(), redis_pool, bus_cfg.clone()));
    tracing::info!("leaf events consumer started");

    let state = AppState {
        storage,
        bus,
        registry,
        verifier: TokenVerifier::new(&auth_cfg.jwt_secret),
        ws: ws_cfg,
    };

    let app = http::router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let port = std::env::var("SERVER_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
