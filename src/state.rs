//! Composite Axum state, following the teacher's `#[derive(Clone, FromRef)]`
//! pattern of one struct gluing every shared dependency together instead of
//! threading them through individual extractors.

use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::TokenVerifier;
use crate::bus::EventPublisher;
use crate::config::WsConfig;
use crate::session::SessionRegistry;
use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub bus: Arc<dyn EventPublisher>,
    pub registry: Arc<SessionRegistry>,
    pub verifier: TokenVerifier,
    pub ws: WsConfig,
}

impl FromRef<AppState> for Arc<dyn Storage> {
    fn from_ref(state: &AppState) -> Self {
        state.storage.clone()
    }
}

impl FromRef<AppState> for Arc<dyn EventPublisher> {
    fn from_ref(state: &AppState) -> Self {
        state.bus.clone()
    }
}

impl FromRef<AppState> for Arc<SessionRegistry> {
    fn from_ref(state: &AppState) -> Self {
        state.registry.clone()
    }
}

impl FromRef<AppState> for TokenVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

impl FromRef<AppState> for WsConfig {
    fn from_ref(state: &AppState) -> Self {
        state.ws.clone()
    }
}
