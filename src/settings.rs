use config::ConfigError;
use serde::Deserialize;
use std::env;
use std::time::Duration;

const DEFAULT_GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_GROQ_MODEL: &str = "llama-3.1-8b-instant";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub port: u16,
    pub llm: LlmSettings,
    pub database: DatabaseSettings,
    pub matching: MatchSettings,
    pub hot_cache: Option<HotCacheSettings>,
    pub auth_token: Option<String>,
    pub cors_origins: Option<String>,
    pub log_json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub index: String,
}

/// Knobs for the smart (similarity) match.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MatchSettings {
    /// Minimum similarity score for a stored answer to be reused.
    pub similarity_threshold: f64,
    /// How many full-text candidates are fetched for re-ranking.
    pub candidate_limit: usize,
}

impl Default for MatchSettings {
    fn default() -> Self {
        MatchSettings {
            similarity_threshold: 0.5,
            candidate_limit: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HotCacheSettings {
    pub url: String,
    pub token: String,
    pub ttl_secs: u64,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();

        let api_key = env::var("GROQ_API_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::NotFound("GROQ_API_KEY".to_string()))?;

        let defaults = MatchSettings::default();
        let similarity_threshold = parse_env("SIMILARITY_THRESHOLD", defaults.similarity_threshold);
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(ConfigError::Message(format!(
                "SIMILARITY_THRESHOLD must be within [0, 1], got {}",
                similarity_threshold
            )));
        }

        let hot_cache = match (
            env::var("UPSTASH_REDIS_REST_URL").ok(),
            env::var("UPSTASH_REDIS_REST_TOKEN").ok(),
        ) {
            (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => {
                Some(HotCacheSettings {
                    url: url.trim_end_matches('/').to_string(),
                    token,
                    ttl_secs: parse_env("CACHE_TTL_SECS", 3600),
                })
            }
            _ => None,
        };

        Ok(Settings {
            port: parse_env("PORT", 8000),
            llm: LlmSettings {
                api_url: env_or("GROQ_API_URL", DEFAULT_GROQ_API_URL),
                api_key,
                model: env_or("GROQ_MODEL", DEFAULT_GROQ_MODEL),
                timeout_secs: parse_env("UPSTREAM_TIMEOUT_SECS", 60),
            },
            database: DatabaseSettings {
                host: env_or("ELASTICSEARCH_HOST", "localhost"),
                port: parse_env("ELASTICSEARCH_PORT", 9200),
                user: env_or("ELASTICSEARCH_USER", "elastic"),
                password: env_or("ELASTICSEARCH_PASSWORD", "elastic"),
                index: env_or("ELASTICSEARCH_INDEX", "chats"),
            },
            matching: MatchSettings {
                similarity_threshold,
                candidate_limit: parse_env("SMART_CANDIDATE_LIMIT", defaults.candidate_limit),
            },
            hot_cache,
            auth_token: env::var("AUTH_TOKEN").ok().filter(|v| !v.is_empty()),
            cors_origins: env::var("CORS_ORIGINS").ok().filter(|v| !v.is_empty()),
            log_json: env::var("LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
