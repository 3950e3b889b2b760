//! Uniform surface over the vector database.
//!
//! Two backends implement [`VectorIndex`]: Pinecone (the managed service the
//! bot runs against) and a local SQLite store for offline work and tests.

use crate::config::{Config, VectorBackend};
use crate::error::{RagError, Result};
use crate::rag::{QueryMatch, VectorRecord};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub mod pinecone;
pub mod sqlite;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "cosine" => Some(Metric::Cosine),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the index must look like.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    /// Serverless placement, used only when the index has to be created.
    pub cloud: String,
    pub region: String,
}

impl IndexSpec {
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: config.index_name.clone(),
            dimension: config.embedding_dimension,
            metric: Metric::Cosine,
            cloud: config.pinecone_cloud.clone(),
            region: config.pinecone_region.clone(),
        }
    }

    /// Reject an existing index whose shape disagrees with this spec.
    pub fn check_existing(&self, dimension: usize, metric: &str) -> Result<()> {
        if dimension != self.dimension {
            return Err(RagError::Config(format!(
                "index '{}' has dimension {} but the embedding model produces {}",
                self.name, dimension, self.dimension
            )));
        }
        if Metric::parse(metric) != Some(self.metric) {
            return Err(RagError::Config(format!(
                "index '{}' uses metric '{}' but '{}' is required",
                self.name, metric, self.metric
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexHandle {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    /// True when this call created the index.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertReport {
    pub upserted: usize,
    pub failures: Vec<UpsertFailure>,
}

impl UpsertReport {
    pub fn fail(&mut self, id: &str, reason: impl Into<String>) {
        self.failures.push(UpsertFailure {
            id: id.to_string(),
            reason: reason.into(),
        });
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the index if absent; error with `Config` if it exists with another shape.
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<IndexHandle>;

    /// Insert-or-overwrite by id. Per-record failures land in the report;
    /// `Err` means nothing in the batch could be written.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<UpsertReport>;

    /// Up to `k` matches, highest cosine similarity first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryMatch>>;
}

/// Build the backend selected by `VECTOR_BACKEND`.
pub fn open_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    match config.vector_backend {
        VectorBackend::Pinecone => Ok(Arc::new(pinecone::PineconeIndex::new(config)?)),
        VectorBackend::Sqlite => Ok(Arc::new(sqlite::SqliteIndex::open(
            &config.sqlite_vector_path,
            &config.index_name,
        )?)),
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
