//! Shared data model for the indexing and answering pipeline.

use serde::{Deserialize, Serialize};

pub mod composer;
pub mod memory;
pub mod message;
pub mod retriever;

/// A public channel enumerated from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

/// One message as returned by channel history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Seconds since epoch with a fractional part, kept verbatim (e.g. `1700000000.000100`).
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

/// Persisted next to every vector and returned at query time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub text: String,
}

/// The exact text that gets embedded, plus its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedMessage {
    pub rendered: String,
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: MessageMetadata,
}

/// One ranked hit from a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: Option<f32>,
    pub metadata: MessageMetadata,
}

/// A source shown under an answer. `rank` is the 1-based position in the
/// deduplicated source list, not the retrieval rank of the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub rank: usize,
    pub channel: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}
