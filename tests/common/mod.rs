//! In-memory collaborators for driving the relay without Elasticsearch,
//! Redis or the LLM API.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};

use chat_relay::db::{PromptStore, StoreError};
use chat_relay::hot_cache::{HotCache, HotCacheError};
use chat_relay::llm_wrapper::{Upstream, UpstreamError};
use chat_relay::matching;
use chat_relay::relay::Relay;
use chat_relay::schemas::chat_record::{ChatRecord, ScoredRecord};
use chat_relay::settings::MatchSettings;
use chat_relay::stream::{byte_stream_from_chunks, DeltaStream};

/// Vec-backed store that mimics a full-text index by token overlap.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<ChatRecord>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub exact_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub insert_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub last_search_limit: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ChatRecord>) -> Self {
        let store = Self::new();
        *store.records.lock().unwrap() = records;
        store
    }

    pub fn records(&self) -> Vec<ChatRecord> {
        self.records.lock().unwrap().clone()
    }

    fn read_guard(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PromptStore for MemoryStore {
    async fn find_exact(&self, prompt: &str) -> Result<Option<ChatRecord>, StoreError> {
        self.exact_calls.fetch_add(1, Ordering::SeqCst);
        self.read_guard()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.prompt == prompt)
            .cloned())
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.last_search_limit.store(limit, Ordering::SeqCst);
        self.read_guard()?;

        let query = matching::tokenize(text);
        let mut hits: Vec<ScoredRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter_map(|record| {
                let overlap = matching::tokenize(&record.prompt)
                    .iter()
                    .filter(|t| query.contains(t))
                    .count();
                (overlap > 0).then(|| ScoredRecord {
                    record: record.clone(),
                    relevance: overlap as f64,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn insert(&self, record: &ChatRecord) -> Result<(), StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("disk full".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.read_guard()?;
        Ok(self.records.lock().unwrap().len() as u64)
    }

    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<ChatRecord>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.read_guard()?;
        let mut records = self.records();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

/// One step of a scripted upstream body.
#[derive(Clone)]
pub enum Chunk {
    Bytes(&'static [u8]),
    Owned(String),
    Fail,
}

/// Upstream that replays a fixed body and records how it was called.
pub struct ScriptedUpstream {
    script: Vec<Chunk>,
    refuse: bool,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    pub fn new(script: Vec<Chunk>) -> Self {
        ScriptedUpstream {
            script,
            refuse: false,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// An upstream whose deltas are `parts`, followed by `[DONE]`.
    pub fn answering(parts: &[&str]) -> Self {
        let mut script: Vec<Chunk> = parts.iter().map(|p| Chunk::Owned(frame(p))).collect();
        script.push(Chunk::Bytes(b"data: [DONE]\n\n"));
        Self::new(script)
    }

    /// An upstream that rejects the request outright.
    pub fn refusing() -> Self {
        ScriptedUpstream {
            refuse: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn open(&self, prompt: &str) -> Result<DeltaStream, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.refuse {
            return Err(UpstreamError::Stream("connection refused".to_string()));
        }

        let chunks: Vec<Result<Bytes, UpstreamError>> = self
            .script
            .iter()
            .map(|chunk| match chunk {
                Chunk::Bytes(b) => Ok(Bytes::from_static(*b)),
                Chunk::Owned(s) => Ok(Bytes::from(s.clone())),
                Chunk::Fail => Err(UpstreamError::Stream("connection reset".to_string())),
            })
            .collect();
        Ok(DeltaStream::new(byte_stream_from_chunks(chunks)))
    }
}

#[derive(Default)]
pub struct MemoryHotCache {
    entries: Mutex<Vec<(String, String)>>,
    pub gets: AtomicUsize,
}

impl MemoryHotCache {
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn seed(&self, prompt: &str, response: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((prompt.to_string(), response.to_string()));
    }
}

#[async_trait]
impl HotCache for MemoryHotCache {
    async fn get(&self, normalized_prompt: &str) -> Result<Option<String>, HotCacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == normalized_prompt)
            .map(|(_, v)| v.clone()))
    }

    async fn set(&self, normalized_prompt: &str, response: &str) -> Result<(), HotCacheError> {
        self.seed(normalized_prompt, response);
        Ok(())
    }
}

pub fn frame(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "choices": [ { "delta": { "content": content }, "finish_reason": null } ] })
    )
}

pub fn record(prompt: &str, response: &str) -> ChatRecord {
    ChatRecord::new(prompt, response)
}

/// A record created `minutes_ago` minutes in the past.
pub fn aged_record(prompt: &str, response: &str, minutes_ago: i64) -> ChatRecord {
    ChatRecord {
        created_at: Utc::now() - Duration::minutes(minutes_ago),
        ..ChatRecord::new(prompt, response)
    }
}

pub fn relay(store: Arc<MemoryStore>, upstream: Arc<ScriptedUpstream>) -> Relay {
    Relay::new(store, upstream, MatchSettings::default())
}
