use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::bus::EventPublisher;
use crate::storage::Storage;

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Checks Postgres and the bus the way the Python readiness probe does,
/// returning 503 with the specific failures instead of a bare boolean.
pub async fn readyz(
    State(storage): State<Arc<dyn Storage>>,
    State(bus): State<Arc<dyn EventPublisher>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let mut errors = Vec::new();

    match storage.begin().await {
        Ok(scope) => {
            let _ = scope.rollback().await;
        }
        Err(e) => errors.push(format!("storage: {e}")),
    }

    if let Err(e) = bus.ping().await {
        errors.push(format!("bus: {e}"));
    }

    if errors.is_empty() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "errors": errors })),
        )
    }
}
