//! In-memory fakes of the external seams, shared by unit tests.

use crate::error::{RagError, Result};
use crate::llm::{ChatModel, Embedder, PromptMessage};
use crate::rag::{Channel, RawMessage};
use crate::slack::ChatHistory;
use crate::vector::sqlite::SqliteIndex;
use crate::vector::{IndexSpec, Metric, VectorIndex};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;

pub const TEST_DIMENSION: usize = 4;
const KEYWORDS: [&str; 3] = ["alpha", "lunch", "retro"];

/// Deterministic 4-dim embedding: one axis per keyword plus a constant bias.
pub struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::Embedding("input text is empty".to_string()));
        }
        let lower = text.to_lowercase();
        let mut values: Vec<f32> = KEYWORDS
            .iter()
            .map(|kw| if lower.contains(kw) { 1.0 } else { 0.0 })
            .collect();
        values.push(0.1);
        Ok(values)
    }
}

/// Records every prompt and answers from a script.
pub struct ScriptedChat {
    reply: Option<String>,
    pub prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedChat {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> Vec<PromptMessage> {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, messages: &[PromptMessage], _temperature: f32) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        self.reply
            .clone()
            .ok_or_else(|| RagError::transient("openai", "upstream timed out"))
    }
}

/// Channels and their history, served from memory.
#[derive(Default)]
pub struct FakeHistory {
    pub channels: Vec<Channel>,
    pub messages: HashMap<String, Vec<RawMessage>>,
    /// Channels whose history stream fails after its first message.
    pub broken: Vec<String>,
    pub joined: Mutex<Vec<String>>,
}

impl FakeHistory {
    pub fn with_channel(mut self, id: &str, name: &str, messages: Vec<RawMessage>) -> Self {
        self.channels.push(Channel {
            id: id.to_string(),
            name: name.to_string(),
        });
        self.messages.insert(id.to_string(), messages);
        self
    }
}

#[async_trait]
impl ChatHistory for FakeHistory {
    async fn list_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.channels.clone())
    }

    async fn join(&self, channel_id: &str) -> Result<()> {
        self.joined.lock().unwrap().push(channel_id.to_string());
        Ok(())
    }

    fn history<'a>(
        &'a self,
        channel_id: &'a str,
        _page_size: usize,
    ) -> BoxStream<'a, Result<RawMessage>> {
        let messages = self.messages.get(channel_id).cloned().unwrap_or_default();
        if self.broken.iter().any(|c| c == channel_id) {
            let first = messages.into_iter().take(1).map(Ok);
            let failure = std::iter::once(Err(RagError::permanent("slack", "channel_not_found")));
            return stream::iter(first.chain(failure)).boxed();
        }
        stream::iter(messages.into_iter().map(Ok)).boxed()
    }
}

pub fn message(text: &str, user: &str, ts: &str) -> RawMessage {
    RawMessage {
        text: text.to_string(),
        user: Some(user.to_string()),
        ts: ts.to_string(),
        ..Default::default()
    }
}

pub fn test_spec() -> IndexSpec {
    IndexSpec {
        name: "test-index".to_string(),
        dimension: TEST_DIMENSION,
        metric: Metric::Cosine,
        cloud: "aws".to_string(),
        region: "us-east-1".to_string(),
    }
}

/// Empty in-memory index, already created with [`test_spec`].
pub async fn empty_index() -> std::sync::Arc<SqliteIndex> {
    let index = SqliteIndex::open_in_memory("test-index").unwrap();
    index.ensure_index(&test_spec()).await.unwrap();
    std::sync::Arc::new(index)
}
