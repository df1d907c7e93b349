use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A stored prompt/response pair. `prompt` is always normalized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub prompt: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

impl ChatRecord {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        ChatRecord {
            prompt: prompt.into(),
            response: response.into(),
            created_at: Utc::now(),
        }
    }
}

/// A full-text search hit together with the store's relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: ChatRecord,
    pub relevance: f64,
}
