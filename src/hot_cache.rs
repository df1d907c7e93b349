//! Optional Redis (Upstash REST) cache in front of the prompt store.
//!
//! Keys are derived from the normalized prompt, so the cache only ever serves
//! exact matches. Every failure here is reported to the caller, which logs it
//! and carries on as if the cache had missed.

use crate::matching::prompt_digest;
use crate::settings::HotCacheSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HotCacheError {
    #[error("redis request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait HotCache: Send + Sync {
    async fn get(&self, normalized_prompt: &str) -> Result<Option<String>, HotCacheError>;

    async fn set(&self, normalized_prompt: &str, response: &str) -> Result<(), HotCacheError>;
}

#[derive(Debug, Deserialize)]
struct GetReply {
    result: Option<String>,
}

/// Upstash REST client.
pub struct RedisRestCache {
    client: Client,
    settings: HotCacheSettings,
}

impl RedisRestCache {
    pub fn new(settings: &HotCacheSettings) -> Self {
        RedisRestCache {
            client: Client::new(),
            settings: settings.clone(),
        }
    }
}

#[async_trait]
impl HotCache for RedisRestCache {
    async fn get(&self, normalized_prompt: &str) -> Result<Option<String>, HotCacheError> {
        let url = format!("{}/get/{}", self.settings.url, cache_key(normalized_prompt));
        let reply = self
            .client
            .get(url)
            .bearer_auth(&self.settings.token)
            .send()
            .await?
            .error_for_status()?
            .json::<GetReply>()
            .await?;

        Ok(reply.result.map(|raw| decode_value(&raw)))
    }

    async fn set(&self, normalized_prompt: &str, response: &str) -> Result<(), HotCacheError> {
        let url = format!(
            "{}/set/{}?EX={}",
            self.settings.url,
            cache_key(normalized_prompt),
            self.settings.ttl_secs
        );
        self.client
            .post(url)
            .bearer_auth(&self.settings.token)
            .body(encode_value(response))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub fn cache_key(normalized_prompt: &str) -> String {
    format!("chat:{}", prompt_digest(normalized_prompt))
}

// Values travel as JSON string literals so quotes and newlines survive.
fn encode_value(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn decode_value(raw: &str) -> String {
    serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string())
}
