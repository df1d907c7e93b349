//! Liveness probe.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Health {
    pub status: String,
    /// Seconds since the server started.
    pub uptime: f64,
    pub timestamp: DateTime<Utc>,
}

/// Heartbeat endpoint; always 200 while the process is serving.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = Health)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "OK".to_string(),
        uptime: state.started_at.elapsed().as_secs_f64(),
        timestamp: Utc::now(),
    })
}
