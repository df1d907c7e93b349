//! Shared application state injected into every axum handler.

use std::sync::Arc;
use std::time::Instant;

use crate::db::PromptStore;
use crate::relay::Relay;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    /// Used directly for the history listing.
    pub store: Arc<dyn PromptStore>,
    /// Bearer token required on chat routes, when set.
    pub auth_token: Option<String>,
    /// Comma-separated CORS origins; wildcard when unset.
    pub cors_origins: Option<String>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(relay: Arc<Relay>, store: Arc<dyn PromptStore>) -> Self {
        AppState {
            relay,
            store,
            auth_token: None,
            cors_origins: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn with_cors_origins(mut self, origins: Option<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}
