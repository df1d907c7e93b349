//! Wire shapes for the OpenAI-compatible chat completions API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

/// One `data:` frame of a streamed completion.
///
/// Every field is optional on the wire; a payload that does not fit this
/// shape is treated as noise by the stream parser.
#[derive(Debug, Default, Deserialize)]
pub struct StreamFrame {
    #[serde(default)]
    pub choices: Vec<FrameChoice>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FrameChoice {
    #[serde(default)]
    pub delta: Option<FrameDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FrameDelta {
    #[serde(default)]
    pub content: Option<String>,
}
