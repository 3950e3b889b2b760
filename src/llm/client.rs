use super::{ChatModel, Embedder, PromptMessage, Role};
use crate::config::Config;
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;
use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;

const SERVICE: &str = "openai";

/// OpenAI-compatible client used for both embeddings and chat completions.
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    chat_model: String,
    embedding_model: String,
    dimension: usize,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = Config::require(&config.openai_api_key, "OPENAI_API_KEY")?;
        let openai_config = OpenAIConfig::new()
            .with_api_base(&config.openai_base_url)
            .with_api_key(api_key);

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RagError::Config(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            client: Client::with_config(openai_config).with_http_client(http),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
            retry: config.retry_policy(),
        })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input(text)
            .build()
            .map_err(classify)?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(classify_embedding)?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("no embedding returned".to_string()))?
            .embedding;
        Ok(embedding)
    }

    async fn chat_once(&self, messages: Vec<ChatCompletionRequestMessage>, temperature: f32) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(messages)
            .temperature(temperature)
            .build()
            .map_err(classify)?;

        let response = self.client.chat().create(request).await.map_err(classify)?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| RagError::permanent(SERVICE, "no response from LLM"))
    }
}

#[async_trait]
impl Embedder for LlmClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::Embedding("input text is empty".to_string()));
        }

        let embedding = self
            .retry
            .run("embedding", || self.embed_once(text))
            .await?;

        check_dimension(&embedding, self.dimension)?;
        debug!("Embedded {} chars into {} dims", text.len(), embedding.len());
        Ok(embedding)
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, messages: &[PromptMessage], temperature: f32) -> Result<String> {
        let request_messages = to_request_messages(messages)?;
        self.retry
            .run("chat completion", || {
                self.chat_once(request_messages.clone(), temperature)
            })
            .await
    }
}

/// Width mismatch means the model and the index disagree: fatal.
fn check_dimension(embedding: &[f32], expected: usize) -> Result<()> {
    if embedding.len() != expected {
        return Err(RagError::Config(format!(
            "embedding model returned {} dimensions but EMBEDDING_DIMENSION is {}",
            embedding.len(),
            expected
        )));
    }
    Ok(())
}

fn to_request_messages(messages: &[PromptMessage]) -> Result<Vec<ChatCompletionRequestMessage>> {
    messages
        .iter()
        .map(|m| {
            let message: ChatCompletionRequestMessage = match m.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(m.content.clone())
                    .build()
                    .map_err(classify)?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(m.content.clone())
                    .build()
                    .map_err(classify)?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(m.content.clone())
                    .build()
                    .map_err(classify)?
                    .into(),
            };
            Ok(message)
        })
        .collect()
}

/// Only a rejection of this particular input is an `Embedding` error; auth and
/// quota failures stay `PermanentRemote` so callers stop instead of skipping.
fn classify_embedding(err: OpenAIError) -> RagError {
    match err {
        OpenAIError::ApiError(api) if is_input_rejection(&api) => RagError::Embedding(api.message),
        other => classify(other),
    }
}

fn is_input_rejection(api: &ApiError) -> bool {
    api.param.as_deref() == Some("input")
        || api.code.as_deref() == Some("context_length_exceeded")
}

/// The SDK already backs off on 429/5xx; what reaches us is either a
/// transport failure (retryable) or a rejected request (not).
fn classify(err: OpenAIError) -> RagError {
    match err {
        OpenAIError::Reqwest(e) => RagError::from_reqwest(SERVICE, e),
        OpenAIError::ApiError(api) => RagError::permanent(SERVICE, api.message),
        other => RagError::permanent(SERVICE, other.to_string()),
    }
}
