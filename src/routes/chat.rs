//! Chat relay and history routes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use utoipa::{IntoParams, ToSchema};

use crate::error::RelayError;
use crate::relay::{FreshAnswer, Resolution};
use crate::schemas::answer_source::AnswerSource;
use crate::schemas::chat_record::ChatRecord;
use crate::state::AppState;
use crate::stream::{normalize_line_endings, DONE_SENTINEL};

const STREAM_ERROR_MESSAGE: &str = "Error occurred";
const DEFAULT_PAGE_SIZE: u64 = 10;
const MAX_PAGE_SIZE: u64 = 100;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", post(post_chat))
        .route("/chat/history", get(get_history))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One final JSON object.
    Json,
    /// Server-sent events, one per delta, closed by `[DONE]`.
    #[default]
    Stream,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChatQuery {
    #[serde(default)]
    pub mode: OutputMode,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    #[schema(example = "Explain Kubernetes in simple words")]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatAnswer {
    pub source: AnswerSource,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub page: u64,
    pub total_pages: u64,
    pub total_records: u64,
    pub data: Vec<ChatRecord>,
}

/// Answer a prompt from cache or by relaying the upstream LLM.
#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    params(ChatQuery),
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Answer as SSE (mode=stream) or JSON (mode=json)", body = ChatAnswer),
        (status = 400, description = "Prompt required"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 500, description = "Internal server error"),
    )
)]
pub async fn post_chat(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatQuery>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, RelayError> {
    let request = match payload {
        Ok(Json(request)) => Some(request),
        Err(rejection) => {
            debug!(error = %rejection, "unreadable chat body");
            None
        }
    };
    let prompt = request.as_ref().and_then(|r| r.prompt.as_deref());

    info!(mode = ?query.mode, "incoming chat request");

    match query.mode {
        OutputMode::Json => json_answer(&state, prompt).await,
        OutputMode::Stream => stream_answer(&state, prompt).await,
    }
}

async fn json_answer(state: &AppState, prompt: Option<&str>) -> Result<Response, RelayError> {
    let answer = match state.relay.resolve(prompt).await? {
        Resolution::Cached(hit) => {
            debug!(source = hit.source.as_str(), "answering from cache");
            ChatAnswer {
                source: hit.source,
                response: hit.response,
                similarity: hit.similarity,
            }
        }
        Resolution::Fresh(fresh) => ChatAnswer {
            source: AnswerSource::Groq,
            response: fresh.collect().await?,
            similarity: None,
        },
    };
    Ok(Json(answer).into_response())
}

async fn stream_answer(state: &AppState, prompt: Option<&str>) -> Result<Response, RelayError> {
    let resolution = match state.relay.resolve(prompt).await {
        Ok(resolution) => resolution,
        Err(e @ RelayError::Validation(_)) => return Err(e),
        Err(e) => {
            error!(error = %e, "chat relay failed before streaming");
            let events = stream::iter([error_event(), done_event()]);
            return Ok(sse(events));
        }
    };

    match resolution {
        Resolution::Cached(hit) => {
            debug!(source = hit.source.as_str(), "streaming cached answer");
            let events = stream::iter([data_event(&hit.response), done_event()]);
            Ok(sse(events))
        }
        Resolution::Fresh(fresh) => Ok(sse(relay_events(fresh))),
    }
}

enum Phase {
    Streaming(FreshAnswer),
    Closing,
    Finished,
}

/// Forward deltas as they arrive, persist on clean completion, and always
/// close with the sentinel.
///
/// The upstream body lives inside this stream, so a client disconnect drops
/// it and the answer is not stored.
fn relay_events(fresh: FreshAnswer) -> impl Stream<Item = Event> + Send {
    stream::unfold(Phase::Streaming(fresh), |phase| async move {
        match phase {
            Phase::Streaming(mut fresh) => match fresh.next_delta().await {
                Some(Ok(delta)) => Some((data_event(&delta), Phase::Streaming(fresh))),
                Some(Err(e)) => {
                    error!(
                        error = %e,
                        delivered = fresh.text().len(),
                        "upstream stream failed midway"
                    );
                    Some((error_event(), Phase::Closing))
                }
                None => {
                    fresh.finish().await;
                    Some((done_event(), Phase::Finished))
                }
            },
            Phase::Closing => Some((done_event(), Phase::Finished)),
            Phase::Finished => None,
        }
    })
}

fn sse<S>(events: S) -> Response
where
    S: Stream<Item = Event> + Send + 'static,
{
    Sse::new(events.map(Ok::<Event, Infallible>)).into_response()
}

// Stored answers may predate delta cleaning.
fn data_event(text: &str) -> Event {
    Event::default().data(normalize_line_endings(text))
}

fn done_event() -> Event {
    Event::default().data(DONE_SENTINEL)
}

fn error_event() -> Event {
    Event::default().event("error").data(STREAM_ERROR_MESSAGE)
}

/// Stored answers, newest first.
#[utoipa::path(
    get,
    path = "/chat/history",
    tag = "chat",
    params(HistoryQuery),
    responses(
        (status = 200, description = "One page of stored answers", body = HistoryPage),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 500, description = "Internal server error"),
    )
)]
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, RelayError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let total_records = state.store.count().await?;
    let offset = (page - 1).saturating_mul(limit);
    let data = if offset >= total_records {
        Vec::new()
    } else {
        state.store.list(offset, limit).await?
    };

    Ok(Json(HistoryPage {
        page,
        total_pages: total_records.div_ceil(limit),
        total_records,
        data,
    }))
}
