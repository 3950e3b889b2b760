use super::QueryMatch;
use crate::error::Result;
use crate::llm::Embedder;
use crate::vector::VectorIndex;
use std::sync::Arc;
use tracing::debug;

/// Question in, top-k most similar indexed messages out.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Ranked as the store returns them; ties keep the store's order.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<QueryMatch>> {
        let vector = self.embedder.embed(question).await?;
        let matches = self.index.query(&vector, k).await?;
        debug!("Retrieved {} matches for question", matches.len());
        Ok(matches)
    }
}
