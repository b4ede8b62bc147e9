//! Wire types for the `/ws/chat` socket: a tagged inbound frame and an
//! outbound envelope, mirroring the Python `WsInbound`/`WsOutbound` pair.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

#[derive(Debug, Clone, Deserialize)]
pub struct WsInbound {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_data")]
    pub data: Json,
}

fn default_data() -> Json {
    json!({})
}

#[derive(Debug, Clone, Serialize)]
pub struct WsOutbound {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Json,
}

impl WsOutbound {
    pub fn event(kind: &str, data: Json) -> Self {
        Self {
            kind: kind.to_string(),
            data,
        }
    }

    pub fn error(code: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            data: json!({ "code": code, "detail": detail.into() }),
        }
    }

    pub fn pong() -> Self {
        Self {
            kind: "pong".to_string(),
            data: json!({}),
        }
    }
}
