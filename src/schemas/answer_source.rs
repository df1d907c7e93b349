use serde::Serialize;
use utoipa::ToSchema;

/// Where the answer returned to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum AnswerSource {
    #[serde(rename = "cache-exact")]
    CacheExact,
    #[serde(rename = "cache-smart")]
    CacheSmart,
    #[serde(rename = "groq")]
    Groq,
}

impl AnswerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerSource::CacheExact => "cache-exact",
            AnswerSource::CacheSmart => "cache-smart",
            AnswerSource::Groq => "groq",
        }
    }
}
