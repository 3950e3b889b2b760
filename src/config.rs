use crate::error::RagError;
use crate::retry::RetryPolicy;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which entry point is asking; decides which settings are mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Setup,
    Indexer,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    Pinecone,
    Sqlite,
}

impl FromStr for VectorBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pinecone" => Ok(VectorBackend::Pinecone),
            "sqlite" => Ok(VectorBackend::Sqlite),
            other => Err(RagError::Config(format!(
                "VECTOR_BACKEND must be 'pinecone' or 'sqlite', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub slack_bot_token: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_api_url: String,
    /// Host used when building message deep-links.
    pub slack_host: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub vector_backend: VectorBackend,
    pub pinecone_api_key: Option<String>,
    pub index_name: String,
    pub pinecone_control_url: String,
    pub pinecone_cloud: String,
    pub pinecone_region: String,
    pub sqlite_vector_path: String,
    pub system_prompt: String,

    // Indexing
    pub index_batch_size: usize,
    pub history_page_size: usize,
    pub rate_limit_delay_ms: u64,

    // Answering
    pub retrieval_top_k: usize,
    pub max_citations: usize,
    pub llm_temperature: f32,
    pub memory_max_conversations: usize,

    // Timeouts & retries
    pub request_timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for this Slack workspace. \
Answer the user's question using the workspace messages provided below as context. \
If the messages do not contain the answer, say so plainly instead of guessing. \
Be concise, and mention the channel when it helps the reader find the discussion.";

impl Config {
    /// Read the environment (and `.env`) and check the settings `mode` needs.
    pub fn from_env(mode: Mode) -> Result<Self, RagError> {
        dotenv().ok();
        let config = Self::build()?;
        config.validate(mode)?;
        Ok(config)
    }

    fn build() -> Result<Self, RagError> {
        Ok(Config {
            slack_bot_token: non_empty("SLACK_BOT_TOKEN"),
            slack_app_token: non_empty("SLACK_APP_TOKEN"),
            slack_api_url: env::var("SLACK_API_URL")
                .unwrap_or_else(|_| "https://slack.com/api".to_string()),
            slack_host: env::var("SLACK_HOST").unwrap_or_else(|_| "slack.com".to_string()),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            chat_model: env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-ada-002".to_string()),
            embedding_dimension: match env::var("EMBEDDING_DIMENSION") {
                Ok(raw) => raw
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|d| *d > 0)
                    .ok_or_else(|| {
                        RagError::Config(format!(
                            "EMBEDDING_DIMENSION must be a positive integer, got '{}'",
                            raw
                        ))
                    })?,
                Err(_) => 1536,
            },
            vector_backend: env::var("VECTOR_BACKEND")
                .unwrap_or_else(|_| "pinecone".to_string())
                .parse()?,
            pinecone_api_key: non_empty("PINECONE_API_KEY"),
            index_name: env::var("PINECONE_INDEX_NAME").unwrap_or_default(),
            pinecone_control_url: env::var("PINECONE_CONTROL_URL")
                .unwrap_or_else(|_| "https://api.pinecone.io".to_string()),
            pinecone_cloud: env::var("PINECONE_CLOUD").unwrap_or_else(|_| "aws".to_string()),
            pinecone_region: env::var("PINECONE_REGION")
                .unwrap_or_else(|_| "us-east-1".to_string()),
            sqlite_vector_path: env::var("SQLITE_VECTOR_PATH")
                .unwrap_or_else(|_| "data/hindsight.db".to_string()),
            system_prompt: env::var("SYSTEM_PROMPT")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string()),
            index_batch_size: parse_or("INDEX_BATCH_SIZE", 100),
            history_page_size: parse_or("HISTORY_PAGE_SIZE", 1000),
            rate_limit_delay_ms: parse_or("RATE_LIMIT_DELAY_MS", 1000),
            retrieval_top_k: parse_or("RETRIEVAL_TOP_K", 5),
            max_citations: parse_or("MAX_CITATIONS", 3),
            llm_temperature: parse_or("LLM_TEMPERATURE", 0.7),
            memory_max_conversations: parse_or("MEMORY_MAX_CONVERSATIONS", 1000),
            request_timeout_secs: parse_or("REQUEST_TIMEOUT_SECS", 30),
            retry_max_attempts: parse_or("RETRY_MAX_ATTEMPTS", 3),
            retry_base_delay_ms: parse_or("RETRY_BASE_DELAY_MS", 500),
            retry_max_delay_ms: parse_or("RETRY_MAX_DELAY_MS", 8000),
        })
    }

    pub fn validate(&self, mode: Mode) -> Result<(), RagError> {
        let mut missing = Vec::new();

        if self.index_name.trim().is_empty() {
            missing.push("PINECONE_INDEX_NAME");
        }
        if self.vector_backend == VectorBackend::Pinecone && self.pinecone_api_key.is_none() {
            missing.push("PINECONE_API_KEY");
        }
        if matches!(mode, Mode::Indexer | Mode::Bot) {
            if self.slack_bot_token.is_none() {
                missing.push("SLACK_BOT_TOKEN");
            }
            if self.openai_api_key.is_none() {
                missing.push("OPENAI_API_KEY");
            }
        }
        if mode == Mode::Bot && self.slack_app_token.is_none() {
            missing.push("SLACK_APP_TOKEN");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RagError::Config(format!("{} must be set", missing.join(", "))))
        }
    }

    /// Fetch a setting that `validate` already guaranteed for this mode.
    pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, RagError> {
        value
            .as_deref()
            .ok_or_else(|| RagError::Config(format!("{} must be set", name)))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn redact(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "[REDACTED]")
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("slack_bot_token", &redact(&self.slack_bot_token))
            .field("slack_app_token", &redact(&self.slack_app_token))
            .field("slack_api_url", &self.slack_api_url)
            .field("slack_host", &self.slack_host)
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dimension", &self.embedding_dimension)
            .field("vector_backend", &self.vector_backend)
            .field("pinecone_api_key", &redact(&self.pinecone_api_key))
            .field("index_name", &self.index_name)
            .field("pinecone_control_url", &self.pinecone_control_url)
            .field("pinecone_cloud", &self.pinecone_cloud)
            .field("pinecone_region", &self.pinecone_region)
            .field("sqlite_vector_path", &self.sqlite_vector_path)
            .field("system_prompt", &self.system_prompt)
            .field("index_batch_size", &self.index_batch_size)
            .field("history_page_size", &self.history_page_size)
            .field("rate_limit_delay_ms", &self.rate_limit_delay_ms)
            .field("retrieval_top_k", &self.retrieval_top_k)
            .field("max_citations", &self.max_citations)
            .field("llm_temperature", &self.llm_temperature)
            .field("memory_max_conversations", &self.memory_max_conversations)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .finish()
    }
}

/// Slack rejects `chat.postMessage` text above this many characters.
pub const SLACK_MESSAGE_LIMIT: usize = 40_000;

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        slack_bot_token: Some("xoxb-test".to_string()),
        slack_app_token: Some("xapp-test".to_string()),
        slack_api_url: "http://localhost/api".to_string(),
        slack_host: "slack.com".to_string(),
        openai_api_key: Some("sk-test".to_string()),
        openai_base_url: "http://localhost/v1".to_string(),
        chat_model: "test".to_string(),
        embedding_model: "test".to_string(),
        embedding_dimension: 4,
        vector_backend: VectorBackend::Sqlite,
        pinecone_api_key: None,
        index_name: "test-index".to_string(),
        pinecone_control_url: "http://localhost".to_string(),
        pinecone_cloud: "aws".to_string(),
        pinecone_region: "us-east-1".to_string(),
        sqlite_vector_path: ":memory:".to_string(),
        system_prompt: "test".to_string(),
        index_batch_size: 100,
        history_page_size: 1000,
        rate_limit_delay_ms: 0,
        retrieval_top_k: 5,
        max_citations: 3,
        llm_temperature: 0.7,
        memory_max_conversations: 10,
        request_timeout_secs: 5,
        retry_max_attempts: 1,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 1,
    }
}
