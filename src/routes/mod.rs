//! Axum router construction.
//!
//! Chat routes sit behind the bearer-token check; health and the OpenAPI
//! document stay open.

mod chat;
pub mod doc;
mod health;

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::middleware::{cors_layer, require_bearer};
use crate::state::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    let chat_routes = chat::router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        require_bearer,
    ));

    Router::new()
        .merge(chat_routes)
        .merge(health::router())
        .merge(doc::router())
        .layer(cors_layer(state.cors_origins.as_deref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
