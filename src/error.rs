//! Request-level error type.
//!
//! Component errors fold into [`RelayError`], which maps onto an HTTP
//! response. Internal failures are logged in full but reach the caller only
//! as a generic message.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::db::StoreError;
use crate::llm_wrapper::UpstreamError;

pub const PROMPT_REQUIRED: &str = "Prompt required";

#[derive(Debug, Error)]
pub enum RelayError {
    /// The caller sent an unusable request. Never retried.
    #[error("{0}")]
    Validation(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RelayError {
    pub fn prompt_required() -> Self {
        RelayError::Validation(PROMPT_REQUIRED.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            RelayError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            RelayError::Upstream(e) => {
                error!(error = %e, "upstream failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
            RelayError::Store(e) => {
                error!(error = %e, "store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
