//! HTTP surface: one module per router, mirroring the Python
//! `api/v1/routers/*.py` split, assembled into a single `Router<AppState>`.

pub mod admin_conversations;
pub mod conversations;
pub mod health;
pub mod messages;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route(
            "/api/v1/chat/conversations/support",
            post(conversations::create_support_conversation),
        )
        .route(
            "/api/v1/chat/conversations",
            get(conversations::list_conversations),
        )
        .route(
            "/api/v1/chat/conversations/{conversation_id}",
            get(conversations::get_conversation),
        )
        .route(
            "/api/v1/chat/conversations/{conversation_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route(
            "/api/v1/chat/admin/conversations",
            get(admin_conversations::list_conversations),
        )
        .route(
            "/api/v1/chat/admin/conversations/{conversation_id}",
            get(admin_conversations::get_conversation)
                .patch(admin_conversations::patch_conversation),
        )
        .route(
            "/api/v1/chat/admin/conversations/{conversation_id}/messages",
            get(admin_conversations::list_messages).post(admin_conversations::send_message),
        )
        .route("/ws/chat", get(crate::session::websocket::handler))
}
