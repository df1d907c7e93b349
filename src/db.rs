use crate::matching::prompt_digest;
use crate::schemas::chat_record::{ChatRecord, ScoredRecord};
use crate::settings::DatabaseSettings;
use async_trait::async_trait;
use elasticsearch::{
    http::transport::Transport,
    indices::{IndicesCreateParts, IndicesExistsParts},
    params::Refresh,
    CountParts, Elasticsearch, IndexParts, SearchParts,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("elasticsearch error: {0}")]
    Backend(#[from] elasticsearch::Error),

    #[error("store rejected request: {0}")]
    Rejected(String),

    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Persistence for prompt/response pairs.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Record whose normalized prompt equals `prompt` exactly.
    async fn find_exact(&self, prompt: &str) -> Result<Option<ChatRecord>, StoreError>;

    /// Up to `limit` full-text candidates, best relevance first.
    async fn search(&self, text: &str, limit: usize) -> Result<Vec<ScoredRecord>, StoreError>;

    async fn insert(&self, record: &ChatRecord) -> Result<(), StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    /// Records ordered by `createdAt` descending.
    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<ChatRecord>, StoreError>;
}

pub struct DatabaseClient {
    client: Elasticsearch,
    index: String,
}

impl DatabaseClient {
    pub async fn new(db_settings: &DatabaseSettings) -> Result<Self, StoreError> {
        let transport = Transport::single_node(&format!(
            "http://{}:{}@{}:{}",
            db_settings.user, db_settings.password, db_settings.host, db_settings.port
        ))?;

        let client = Elasticsearch::new(transport);

        Ok(DatabaseClient {
            client,
            index: db_settings.index.clone(),
        })
    }

    /// Create the chat index with its full-text mapping unless it exists.
    pub async fn ensure_index(&self) -> Result<(), StoreError> {
        let exists = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[self.index.as_str()]))
            .send()
            .await?;

        if exists.status_code().is_success() {
            debug!(index = %self.index, "chat index already present");
            return Ok(());
        }

        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(&self.index))
            .body(index_mapping())
            .send()
            .await?;

        if let Some(exception) = response.exception().await? {
            return Err(StoreError::Rejected(format!(
                "Failed to create index: {:?}",
                exception
            )));
        }
        info!(index = %self.index, "created chat index");
        Ok(())
    }

    async fn run_search(&self, query: Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .search(SearchParts::Index(&[self.index.as_str()]))
            .body(query)
            .send()
            .await?
            .error_for_status_code()?;

        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl PromptStore for DatabaseClient {
    async fn find_exact(&self, prompt: &str) -> Result<Option<ChatRecord>, StoreError> {
        let body = self.run_search(exact_query(prompt)).await?;
        Ok(parse_hits(&body)?.into_iter().next().map(|hit| hit.record))
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        let body = self.run_search(match_query(text, limit)).await?;
        parse_hits(&body)
    }

    async fn insert(&self, record: &ChatRecord) -> Result<(), StoreError> {
        let id = Uuid::new_v4().to_string();
        let response = self
            .client
            .index(IndexParts::IndexId(&self.index, &id))
            .body(indexed_document(record)?)
            .refresh(Refresh::WaitFor)
            .send()
            .await?;

        if let Some(exception) = response.exception().await? {
            return Err(StoreError::Rejected(format!(
                "Failed to index document: {:?}",
                exception
            )));
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let response = self
            .client
            .count(CountParts::Index(&[self.index.as_str()]))
            .send()
            .await?
            .error_for_status_code()?;

        let body = response.json::<Value>().await?;
        body["count"]
            .as_u64()
            .ok_or_else(|| StoreError::Rejected("count response without a count".to_string()))
    }

    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<ChatRecord>, StoreError> {
        let Some((from, size)) = history_window(offset, limit) else {
            debug!(offset, "history page beyond the result window");
            return Ok(Vec::new());
        };
        let body = self.run_search(history_query(from, size)).await?;
        Ok(parse_hits(&body)?
            .into_iter()
            .map(|hit| hit.record)
            .collect())
    }
}

fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "prompt": { "type": "text" },
                "promptHash": { "type": "keyword" },
                "response": { "type": "text", "index": false },
                "createdAt": { "type": "date" }
            }
        }
    })
}

// Exact lookups go through the digest so prompts of any length stay indexed.
fn exact_query(prompt: &str) -> Value {
    json!({
        "query": { "term": { "promptHash": prompt_digest(prompt) } },
        "size": 1,
    })
}

fn indexed_document(record: &ChatRecord) -> Result<Value, StoreError> {
    let mut doc = serde_json::to_value(record)?;
    doc["promptHash"] = Value::String(prompt_digest(&record.prompt));
    Ok(doc)
}

fn match_query(text: &str, limit: usize) -> Value {
    json!({
        "query": { "match": { "prompt": text } },
        "size": limit,
    })
}

/// Elasticsearch refuses searches where `from + size` exceeds this.
const MAX_RESULT_WINDOW: u64 = 10_000;

/// Clip a page to the result window, or `None` when it starts past it.
fn history_window(offset: u64, limit: u64) -> Option<(u64, u64)> {
    if offset >= MAX_RESULT_WINDOW || limit == 0 {
        return None;
    }
    Some((offset, limit.min(MAX_RESULT_WINDOW - offset)))
}

fn history_query(offset: u64, limit: u64) -> Value {
    json!({
        "query": { "match_all": {} },
        "sort": [ { "createdAt": { "order": "desc" } } ],
        "from": offset,
        "size": limit,
    })
}

fn parse_hits(body: &Value) -> Result<Vec<ScoredRecord>, StoreError> {
    let Some(hits) = body["hits"]["hits"].as_array() else {
        return Ok(Vec::new());
    };

    hits.iter()
        .map(|hit| {
            let record = serde_json::from_value::<ChatRecord>(hit["_source"].clone())?;
            Ok(ScoredRecord {
                record,
                relevance: hit["_score"].as_f64().unwrap_or(0.0),
            })
        })
        .collect()
}
