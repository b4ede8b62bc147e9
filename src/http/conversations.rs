use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::CurrentPrincipal;
use crate::domain::Conversation;
use crate::error::Error;
use crate::services::conversation;
use crate::storage::Storage;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    cursor: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

pub async fn create_support_conversation(
    State(storage): State<Arc<dyn Storage>>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> Result<Json<Conversation>, Error> {
    let scope = storage.begin().await?;
    let conv = conversation::open_support_conversation(principal.subject_id, scope).await?;
    Ok(Json(conv))
}

pub async fn list_conversations(
    State(storage): State<Arc<dyn Storage>>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Conversation>>, Error> {
    let scope = storage.begin().await?;
    let convs = conversation::list_user_conversations(
        &principal,
        query.cursor.as_deref(),
        query.limit,
        scope,
    )
    .await?;
    Ok(Json(convs))
}

pub async fn get_conversation(
    State(storage): State<Arc<dyn Storage>>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Conversation>, Error> {
    let scope = storage.begin().await?;
    let conv = conversation::get_conversation(conversation_id, &principal, scope).await?;
    Ok(Json(conv))
}
