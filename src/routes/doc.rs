//! OpenAPI document for the public routes.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use super::{chat, health};
use crate::schemas::answer_source::AnswerSource;
use crate::schemas::chat_record::ChatRecord;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "chat_relay",
        description = "Streaming LLM relay with exact and similarity caching"
    ),
    paths(chat::post_chat, chat::get_history, health::get_health),
    components(schemas(
        chat::ChatRequest,
        chat::ChatAnswer,
        chat::HistoryPage,
        chat::OutputMode,
        health::Health,
        AnswerSource,
        ChatRecord,
    )),
    tags(
        (name = "chat", description = "Prompt relay and stored answers"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/docs/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
