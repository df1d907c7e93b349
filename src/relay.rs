//! Per-request answer resolution: exact cache, smart cache, then upstream.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::db::PromptStore;
use crate::error::RelayError;
use crate::hot_cache::HotCache;
use crate::llm_wrapper::{Upstream, UpstreamError};
use crate::matching;
use crate::schemas::answer_source::AnswerSource;
use crate::schemas::chat_record::ChatRecord;
use crate::settings::MatchSettings;
use crate::stream::DeltaStream;

/// An answer served from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAnswer {
    pub source: AnswerSource,
    pub response: String,
    /// Similarity score, for smart matches only.
    pub similarity: Option<f64>,
}

pub enum Resolution {
    Cached(CachedAnswer),
    Fresh(FreshAnswer),
}

pub struct Relay {
    store: Arc<dyn PromptStore>,
    upstream: Arc<dyn Upstream>,
    hot_cache: Option<Arc<dyn HotCache>>,
    matching: MatchSettings,
}

impl Relay {
    pub fn new(
        store: Arc<dyn PromptStore>,
        upstream: Arc<dyn Upstream>,
        matching: MatchSettings,
    ) -> Self {
        Relay {
            store,
            upstream,
            hot_cache: None,
            matching,
        }
    }

    pub fn with_hot_cache(mut self, hot_cache: Arc<dyn HotCache>) -> Self {
        self.hot_cache = Some(hot_cache);
        self
    }

    /// Find a stored answer for `prompt` or open a fresh upstream stream.
    ///
    /// Store lookups that fail are logged and count as misses. Only a missing
    /// prompt or a failure to open the upstream stream is an error.
    pub async fn resolve(&self, prompt: Option<&str>) -> Result<Resolution, RelayError> {
        let prompt = validate_prompt(prompt)?;
        let normalized = matching::normalize(prompt);
        debug!(prompt = %normalized, "resolving prompt");

        if let Some(hit) = self.exact_lookup(&normalized).await {
            info!("serving exact match from cache");
            return Ok(Resolution::Cached(hit));
        }

        if let Some(hit) = self.smart_search(&normalized).await {
            info!(similarity = ?hit.similarity, "serving smart match from cache");
            return Ok(Resolution::Cached(hit));
        }

        info!("calling upstream LLM");
        let deltas = self.upstream.open(prompt).await?;

        Ok(Resolution::Fresh(FreshAnswer {
            normalized,
            deltas,
            text: String::new(),
            store: self.store.clone(),
            hot_cache: self.hot_cache.clone(),
        }))
    }

    async fn exact_lookup(&self, normalized: &str) -> Option<CachedAnswer> {
        if let Some(cache) = &self.hot_cache {
            match cache.get(normalized).await {
                Ok(Some(response)) => {
                    return Some(CachedAnswer {
                        source: AnswerSource::CacheExact,
                        response,
                        similarity: None,
                    })
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "hot cache lookup failed"),
            }
        }

        match self.store.find_exact(normalized).await {
            Ok(record) => record.map(|record| CachedAnswer {
                source: AnswerSource::CacheExact,
                response: record.response,
                similarity: None,
            }),
            Err(e) => {
                warn!(error = %e, "exact lookup failed, treating as miss");
                None
            }
        }
    }

    async fn smart_search(&self, normalized: &str) -> Option<CachedAnswer> {
        let candidates = match self
            .store
            .search(normalized, self.matching.candidate_limit)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "smart search failed, treating as miss");
                return None;
            }
        };

        // Ties keep the store's relevance order.
        let mut best: Option<(f64, ChatRecord)> = None;
        for candidate in candidates {
            let similarity = matching::score(&candidate.record.prompt, normalized);
            debug!(
                candidate = %candidate.record.prompt,
                relevance = candidate.relevance,
                similarity,
                "scored candidate"
            );
            if best.as_ref().map_or(true, |(top, _)| similarity > *top) {
                best = Some((similarity, candidate.record));
            }
        }

        let (similarity, record) = best?;
        if similarity >= self.matching.similarity_threshold {
            Some(CachedAnswer {
                source: AnswerSource::CacheSmart,
                response: record.response,
                similarity: Some(similarity),
            })
        } else {
            None
        }
    }
}

fn validate_prompt(prompt: Option<&str>) -> Result<&str, RelayError> {
    match prompt {
        Some(p) if !p.trim().is_empty() => Ok(p),
        _ => Err(RelayError::prompt_required()),
    }
}

/// A freshly generated answer being streamed from upstream.
///
/// Deltas are pulled with [`FreshAnswer::next_delta`]; once the stream has
/// ended cleanly, [`FreshAnswer::finish`] stores the full text. An answer that
/// fails midway is never stored.
pub struct FreshAnswer {
    normalized: String,
    deltas: DeltaStream,
    text: String,
    store: Arc<dyn PromptStore>,
    hot_cache: Option<Arc<dyn HotCache>>,
}

impl FreshAnswer {
    pub async fn next_delta(&mut self) -> Option<Result<String, UpstreamError>> {
        let next = self.deltas.next().await;
        if let Some(Ok(delta)) = &next {
            self.text.push_str(delta);
        }
        next
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Persist the completed answer and return it.
    pub async fn finish(self) -> String {
        if self.text.is_empty() {
            warn!("upstream produced no content, nothing stored");
            return self.text;
        }

        let record = ChatRecord::new(self.normalized.as_str(), self.text.as_str());
        match self.store.insert(&record).await {
            Ok(()) => info!("stored fresh answer"),
            Err(e) => error!(error = %e, "failed to store fresh answer"),
        }

        if let Some(cache) = &self.hot_cache {
            if let Err(e) = cache.set(&self.normalized, &self.text).await {
                warn!(error = %e, "failed to populate hot cache");
            }
        }

        self.text
    }

    /// Drain the stream without forwarding, then persist.
    pub async fn collect(mut self) -> Result<String, UpstreamError> {
        while let Some(delta) = self.next_delta().await {
            delta?;
        }
        Ok(self.finish().await)
    }
}
