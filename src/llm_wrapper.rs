use crate::schemas::llm_frame::{ChatCompletionRequest, ChatMessage};
use crate::settings::LlmSettings;
use crate::stream::DeltaStream;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Raw upstream response body, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request error ({kind}): {source}")]
    Transport {
        kind: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("stream read error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connection"
        } else {
            "other"
        };
        UpstreamError::Transport { kind, source: e }
    }
}

/// Something that can turn a prompt into a streamed completion.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Open a streaming completion for `prompt`.
    ///
    /// Fails before any delta is produced when the request cannot be sent or
    /// the upstream answers with a non-success status.
    async fn open(&self, prompt: &str) -> Result<DeltaStream, UpstreamError>;
}

pub struct LLMClient {
    inner: Arc<Client>,
    settings: LlmSettings,
}

impl LLMClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(settings.timeout()).build()?;
        Ok(Self {
            inner: Arc::new(client),
            settings: settings.clone(),
        })
    }
}

#[async_trait]
impl Upstream for LLMClient {
    async fn open(&self, prompt: &str) -> Result<DeltaStream, UpstreamError> {
        let body = ChatCompletionRequest {
            model: &self.settings.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: true,
        };

        tracing::debug!(model = %self.settings.model, "opening completion stream");

        let response = self
            .inner
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP error: {}", status));
            return Err(UpstreamError::Status {
                status,
                body: error_body,
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| UpstreamError::Stream(e.to_string())));

        Ok(DeltaStream::new(Box::pin(bytes)))
    }
}
