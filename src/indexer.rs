use crate::config::Config;
use crate::error::{RagError, Result};
use crate::llm::Embedder;
use crate::rag::message::{format_message, is_indexable, vector_id};
use crate::rag::{Channel, RawMessage, VectorRecord};
use crate::slack::ChatHistory;
use crate::vector::VectorIndex;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Totals for one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub channels: usize,
    pub messages_seen: usize,
    pub indexed: usize,
    /// Bot messages and messages without text.
    pub skipped: usize,
    /// Messages that could not be embedded or stored.
    pub failed: usize,
}

/// Backfills every public channel's history into the vector index.
pub struct Indexer {
    history: Arc<dyn ChatHistory>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    host: String,
    batch_size: usize,
    page_size: usize,
    batch_delay: Duration,
}

impl Indexer {
    pub fn new(
        history: Arc<dyn ChatHistory>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: &Config,
    ) -> Self {
        Self {
            history,
            embedder,
            index,
            host: config.slack_host.clone(),
            batch_size: config.index_batch_size.max(1),
            page_size: config.history_page_size.max(1),
            batch_delay: config.rate_limit_delay(),
        }
    }

    /// Index every channel. Configuration errors stop the run and permanent
    /// remote errors stop the current channel; anything else is logged and the
    /// next message or batch is tried.
    pub async fn run(&self) -> Result<IndexReport> {
        let channels = self.history.list_channels().await?;
        info!("Indexer: found {} channels", channels.len());

        let mut report = IndexReport::default();
        for channel in &channels {
            report.channels += 1;
            match self.index_channel(channel, &mut report).await {
                Ok(()) => {}
                Err(e) if e.is_config() => return Err(e),
                Err(e) => error!("Indexer: stopped indexing #{}: {}", channel.name, e),
            }
        }

        info!(
            "Indexer: done. {} channels, {} messages seen, {} indexed, {} skipped, {} failed",
            report.channels, report.messages_seen, report.indexed, report.skipped, report.failed
        );
        Ok(report)
    }

    async fn index_channel(&self, channel: &Channel, report: &mut IndexReport) -> Result<()> {
        // Already-member channels stay readable even when joining fails.
        if let Err(e) = self.history.join(&channel.id).await {
            warn!("Indexer: could not join #{}: {}", channel.name, e);
        }

        let seen_before = report.messages_seen;
        let indexed_before = report.indexed;
        let mut batches = self
            .history
            .history(&channel.id, self.page_size)
            .chunks(self.batch_size);

        let mut first = true;
        while let Some(batch) = batches.next().await {
            if !first {
                tokio::time::sleep(self.batch_delay).await;
            }
            first = false;

            let mut messages = Vec::with_capacity(batch.len());
            let mut stream_error = None;
            for item in batch {
                match item {
                    Ok(message) => messages.push(message),
                    Err(e) => {
                        stream_error = Some(e);
                        break;
                    }
                }
            }

            self.index_batch(channel, &messages, report).await?;
            if let Some(e) = stream_error {
                return Err(e);
            }
        }

        info!(
            "Indexer: #{} had {} messages, indexed {}",
            channel.name,
            report.messages_seen - seen_before,
            report.indexed - indexed_before
        );
        Ok(())
    }

    async fn index_batch(
        &self,
        channel: &Channel,
        messages: &[RawMessage],
        report: &mut IndexReport,
    ) -> Result<()> {
        let mut records = Vec::with_capacity(messages.len());
        for message in messages {
            report.messages_seen += 1;
            if !is_indexable(message) {
                report.skipped += 1;
                continue;
            }

            let formatted = format_message(message, channel, &self.host);
            let id = vector_id(&channel.id, &message.ts);
            match self.embedder.embed(&formatted.rendered).await {
                Ok(values) => records.push(VectorRecord {
                    id,
                    values,
                    metadata: formatted.metadata,
                }),
                // A revoked key or exhausted quota fails every message the same way.
                Err(e) if e.is_config() || e.is_permanent() => return Err(e),
                Err(e) => {
                    warn!("Indexer: {}", RagError::IndexingSkip { id, reason: e.to_string() });
                    report.failed += 1;
                }
            }
        }

        if records.is_empty() {
            return Ok(());
        }

        match self.index.upsert(&records).await {
            Ok(upserted) => {
                for failure in &upserted.failures {
                    warn!(
                        "Indexer: {}",
                        RagError::IndexingSkip {
                            id: failure.id.clone(),
                            reason: failure.reason.clone(),
                        }
                    );
                }
                report.indexed += upserted.upserted;
                report.failed += upserted.failures.len();
                debug!(
                    "Indexer: upserted {} of {} records from #{}",
                    upserted.upserted,
                    records.len(),
                    channel.name
                );
            }
            Err(e) if e.is_config() || e.is_permanent() => return Err(e),
            Err(e) => {
                error!(
                    "Indexer: upsert of {} records from #{} failed ({}..{}): {}",
                    records.len(),
                    channel.name,
                    records[0].id,
                    records[records.len() - 1].id,
                    e
                );
                report.failed += records.len();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::rag::{MessageMetadata, QueryMatch};
    use crate::testing::{empty_index, message, FakeHistory, KeywordEmbedder};
    use crate::vector::{IndexHandle, IndexSpec, UpsertReport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Keyword embeddings, except for a few marker words.
    struct MarkedEmbedder;

    #[async_trait]
    impl Embedder for MarkedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("poison") {
                return Err(RagError::Embedding("provider rejected input".to_string()));
            }
            if text.contains("misconfigured") {
                return Err(RagError::Config("wrong embedding model".to_string()));
            }
            if text.contains("wide") {
                return Ok(vec![0.5; 5]);
            }
            KeywordEmbedder.embed(text).await
        }
    }

    fn bot_message(ts: &str) -> RawMessage {
        RawMessage {
            text: "deploy finished".to_string(),
            ts: ts.to_string(),
            subtype: Some("bot_message".to_string()),
            bot_id: Some("B1".to_string()),
            ..Default::default()
        }
    }

    async fn stored(index: &dyn VectorIndex) -> Vec<(String, MessageMetadata)> {
        let mut records: Vec<_> = index
            .query(&[0.0, 0.0, 0.0, 1.0], 1000)
            .await
            .unwrap()
            .into_iter()
            .map(|m| (m.id, m.metadata))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }

    async fn stored_ids(index: &dyn VectorIndex) -> Vec<String> {
        stored(index).await.into_iter().map(|(id, _)| id).collect()
    }

    /// Fails every call with the same permanent error and counts the calls.
    #[derive(Default)]
    struct RevokedKey {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for RevokedKey {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RagError::permanent("openai", "HTTP 401: invalid api key"))
        }
    }

    /// A vector store that refuses every write.
    #[derive(Default)]
    struct ForbiddenIndex {
        upserts: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for ForbiddenIndex {
        async fn ensure_index(&self, _spec: &IndexSpec) -> Result<IndexHandle> {
            unreachable!("the indexer does not create indexes")
        }

        async fn upsert(&self, _records: &[VectorRecord]) -> Result<UpsertReport> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Err(RagError::PermanentRemote {
                service: "pinecone",
                message: "HTTP 403: forbidden".to_string(),
                status: Some(403),
            })
        }

        async fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<QueryMatch>> {
            Ok(Vec::new())
        }
    }

    fn numbered(count: usize, text: &str) -> Vec<RawMessage> {
        (0..count)
            .map(|i| message(text, "U1", &format!("1700000000.{:06}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_bot_messages_are_not_indexed() {
        let history = FakeHistory::default().with_channel(
            "C1",
            "general",
            vec![
                message("alpha kickoff", "U1", "1700000000.000100"),
                bot_message("1700000000.000200"),
                message("retro on friday", "U2", "1700000000.000300"),
            ],
        );
        let index = empty_index().await;
        let indexer = Indexer::new(
            Arc::new(history),
            Arc::new(KeywordEmbedder),
            index.clone(),
            &test_config(),
        );

        let report = indexer.run().await.unwrap();
        assert_eq!(report.messages_seen, 3);
        assert_eq!(report.indexed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            stored_ids(index.as_ref()).await,
            vec!["C1_1700000000.000100", "C1_1700000000.000300"]
        );
    }

    #[tokio::test]
    async fn test_reindexing_overwrites_in_place() {
        let history = Arc::new(FakeHistory::default().with_channel(
            "C1",
            "general",
            vec![
                message("alpha kickoff", "U1", "1700000000.000100"),
                message("lunch?", "U2", "1700000000.000200"),
            ],
        ));
        let index = empty_index().await;
        let indexer = Indexer::new(history.clone(), Arc::new(KeywordEmbedder), index.clone(), &test_config());

        indexer.run().await.unwrap();
        let first = stored(index.as_ref()).await;
        indexer.run().await.unwrap();
        let second = stored(index.as_ref()).await;

        assert_eq!(first.len(), 2);
        assert_eq!(second, first);
        let (id, metadata) = &second[0];
        assert_eq!(id, "C1_1700000000.000100");
        assert_eq!(metadata.timestamp, "1700000000.000100");
        assert_eq!(
            metadata.link,
            "https://slack.com/app_redirect?channel=C1&message_ts=1700000000000100"
        );
        assert_eq!(metadata.user, "U1");
        assert_eq!(history.joined.lock().unwrap().as_slice(), ["C1", "C1"]);
    }

    #[tokio::test]
    async fn test_one_bad_record_does_not_sink_the_batch() {
        let messages = (0..100)
            .map(|i| {
                let text = if i == 42 { "wide message" } else { "alpha update" };
                message(text, "U1", &format!("1700000000.{:06}", i))
            })
            .collect();
        let history = FakeHistory::default().with_channel("C1", "general", messages);
        let index = empty_index().await;
        let indexer = Indexer::new(Arc::new(history), Arc::new(MarkedEmbedder), index.clone(), &test_config());

        let report = indexer.run().await.unwrap();
        assert_eq!(report.indexed, 99);
        assert_eq!(report.failed, 1);
        let ids = stored_ids(index.as_ref()).await;
        assert_eq!(ids.len(), 99);
        assert!(!ids.contains(&"C1_1700000000.000042".to_string()));
    }

    #[tokio::test]
    async fn test_embedding_failure_skips_one_message() {
        let history = FakeHistory::default().with_channel(
            "C1",
            "general",
            vec![
                message("poison pill", "U1", "1700000000.000100"),
                message("alpha kickoff", "U1", "1700000000.000200"),
            ],
        );
        let index = empty_index().await;
        let indexer = Indexer::new(Arc::new(history), Arc::new(MarkedEmbedder), index.clone(), &test_config());

        let report = indexer.run().await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(stored_ids(index.as_ref()).await, vec!["C1_1700000000.000200"]);
    }

    #[tokio::test]
    async fn test_permanent_embedding_error_stops_the_channel() {
        let history = FakeHistory::default()
            .with_channel("C1", "general", numbered(50, "alpha update"))
            .with_channel("C2", "random", numbered(50, "lunch?"));
        let embedder = Arc::new(RevokedKey::default());
        let index = empty_index().await;
        let indexer = Indexer::new(Arc::new(history), embedder.clone(), index.clone(), &test_config());

        let report = indexer.run().await.unwrap();
        // One attempt per channel, then on to the next channel.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.channels, 2);
        assert_eq!(report.indexed, 0);
        assert!(stored_ids(index.as_ref()).await.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_upsert_error_stops_the_channel() {
        let history = FakeHistory::default()
            .with_channel("C1", "general", numbered(250, "alpha update"))
            .with_channel("C2", "random", numbered(10, "lunch?"));
        let index = Arc::new(ForbiddenIndex::default());
        let indexer = Indexer::new(Arc::new(history), Arc::new(KeywordEmbedder), index.clone(), &test_config());

        let report = indexer.run().await.unwrap();
        // First batch of C1, then the single batch of C2.
        assert_eq!(index.upserts.load(Ordering::SeqCst), 2);
        assert_eq!(report.messages_seen, 110);
        assert_eq!(report.indexed, 0);
    }

    #[tokio::test]
    async fn test_broken_history_moves_to_next_channel() {
        let mut history = FakeHistory::default()
            .with_channel(
                "C1",
                "general",
                vec![
                    message("alpha kickoff", "U1", "1700000000.000100"),
                    message("never fetched", "U1", "1700000000.000200"),
                ],
            )
            .with_channel("C2", "random", vec![message("lunch?", "U2", "1700000000.000300")]);
        history.broken.push("C1".to_string());

        let index = empty_index().await;
        let indexer = Indexer::new(Arc::new(history), Arc::new(KeywordEmbedder), index.clone(), &test_config());

        let report = indexer.run().await.unwrap();
        assert_eq!(report.channels, 2);
        assert_eq!(
            stored_ids(index.as_ref()).await,
            vec!["C1_1700000000.000100", "C2_1700000000.000300"]
        );
    }

    #[tokio::test]
    async fn test_config_error_stops_the_run() {
        let history = FakeHistory::default().with_channel(
            "C1",
            "general",
            vec![message("misconfigured", "U1", "1700000000.000100")],
        );
        let indexer = Indexer::new(
            Arc::new(history),
            Arc::new(MarkedEmbedder),
            empty_index().await,
            &test_config(),
        );
        assert!(indexer.run().await.unwrap_err().is_config());
    }
}
