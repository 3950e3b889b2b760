//! Pinecone serverless adapter (control plane + data plane REST API).

use super::{IndexHandle, IndexSpec, UpsertReport, VectorIndex};
use crate::config::Config;
use crate::error::{parse_retry_after, RagError, Result};
use crate::rag::{MessageMetadata, QueryMatch, VectorRecord};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const SERVICE: &str = "pinecone";
const API_VERSION: &str = "2024-07";
const READY_POLL_ATTEMPTS: u32 = 30;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct PineconeIndex {
    http: reqwest::Client,
    api_key: String,
    control_url: String,
    name: String,
    /// Data-plane host and dimension, discovered from `describe_index`.
    target: OnceCell<DataPlane>,
    retry: RetryPolicy,
}

#[derive(Debug, Clone)]
struct DataPlane {
    url: String,
    dimension: usize,
}

impl DataPlane {
    fn from_description(description: &IndexDescription) -> Self {
        Self {
            url: data_plane_url(&description.host),
            dimension: description.dimension,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    dimension: usize,
    metric: String,
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<PineconeMatch>,
}

#[derive(Debug, Deserialize)]
struct PineconeMatch {
    id: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    metadata: Option<MessageMetadata>,
}

impl PineconeIndex {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = Config::require(&config.pinecone_api_key, "PINECONE_API_KEY")?.to_string();
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RagError::Config(format!("building HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key,
            control_url: config.pinecone_control_url.trim_end_matches('/').to_string(),
            name: config.index_name.clone(),
            target: OnceCell::new(),
            retry: config.retry_policy(),
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let mut request = self
            .http
            .request(method, url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RagError::from_reqwest(SERVICE, e))?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::from_status(SERVICE, status, &text, retry_after));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| RagError::permanent(SERVICE, format!("unexpected response: {}", e)))
    }

    /// `Ok(None)` when the index does not exist.
    async fn describe_index(&self, name: &str) -> Result<Option<IndexDescription>> {
        let url = format!("{}/indexes/{}", self.control_url, name);
        let result = self
            .retry
            .run("describe index", || {
                self.send::<IndexDescription>(Method::GET, &url, None)
            })
            .await;
        match result {
            Ok(description) => Ok(Some(description)),
            Err(e) if e.status() == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        let url = format!("{}/indexes", self.control_url);
        let body = json!({
            "name": spec.name,
            "dimension": spec.dimension,
            "metric": spec.metric.as_str(),
            "spec": {
                "serverless": {
                    "cloud": spec.cloud,
                    "region": spec.region,
                }
            }
        });
        self.retry
            .run("create index", || {
                self.send::<serde_json::Value>(Method::POST, &url, Some(&body))
            })
            .await?;
        Ok(())
    }

    async fn wait_until_ready(&self, name: &str) -> Result<IndexDescription> {
        for attempt in 1..=READY_POLL_ATTEMPTS {
            if let Some(description) = self.describe_index(name).await? {
                if description.status.ready {
                    return Ok(description);
                }
                debug!(
                    "Pinecone: index '{}' is {} (poll {}/{})",
                    name, description.status.state, attempt, READY_POLL_ATTEMPTS
                );
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        Err(RagError::transient(
            SERVICE,
            format!("index '{}' did not become ready in time", name),
        ))
    }

    async fn data_plane(&self) -> Result<&DataPlane> {
        self.target
            .get_or_try_init(|| async {
                let description = self.describe_index(&self.name).await?.ok_or_else(|| {
                    RagError::Config(format!(
                        "index '{}' does not exist; run the setup binary first",
                        self.name
                    ))
                })?;
                Ok::<_, RagError>(DataPlane::from_description(&description))
            })
            .await
    }

    async fn upsert_batch(&self, host: &str, records: &[VectorRecord]) -> Result<usize> {
        let url = format!("{}/vectors/upsert", host);
        let body = serde_json::to_value(UpsertRequest { vectors: records })
            .map_err(|e| RagError::permanent(SERVICE, e.to_string()))?;
        let response: UpsertResponse = self
            .retry
            .run("upsert", || self.send(Method::POST, &url, Some(&body)))
            .await?;
        Ok(response.upserted_count)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<IndexHandle> {
        if let Some(existing) = self.describe_index(&spec.name).await? {
            spec.check_existing(existing.dimension, &existing.metric)?;
            info!("Pinecone: index '{}' already exists", spec.name);
            if spec.name == self.name {
                let _ = self.target.set(DataPlane::from_description(&existing));
            }
            return Ok(IndexHandle {
                name: spec.name.clone(),
                dimension: spec.dimension,
                metric: spec.metric,
                created: false,
            });
        }

        info!(
            "Pinecone: creating index '{}' (dimension {}, {}, {}/{})",
            spec.name, spec.dimension, spec.metric, spec.cloud, spec.region
        );
        match self.create_index(spec).await {
            Ok(()) => {}
            // Someone else created it between describe and create.
            Err(e) if e.status() == Some(409) => {
                warn!("Pinecone: index '{}' appeared concurrently", spec.name);
            }
            Err(e) => return Err(e),
        }

        let ready = self.wait_until_ready(&spec.name).await?;
        spec.check_existing(ready.dimension, &ready.metric)?;
        if spec.name == self.name {
            let _ = self.target.set(DataPlane::from_description(&ready));
        }
        info!("Pinecone: index '{}' is ready", spec.name);
        Ok(IndexHandle {
            name: spec.name.clone(),
            dimension: spec.dimension,
            metric: spec.metric,
            created: true,
        })
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();
        if records.is_empty() {
            return Ok(report);
        }
        let plane = self.data_plane().await?;

        // Wrong-width vectors would fail the whole request; drop them here.
        let mut valid = Vec::with_capacity(records.len());
        for record in records {
            if record.values.len() == plane.dimension {
                valid.push(record.clone());
            } else {
                report.fail(
                    &record.id,
                    format!(
                        "vector has {} values, index expects {}",
                        record.values.len(),
                        plane.dimension
                    ),
                );
            }
        }
        if valid.is_empty() {
            return Ok(report);
        }

        match self.upsert_batch(&plane.url, &valid).await {
            Ok(count) => {
                report.upserted = count;
                return Ok(report);
            }
            // Auth and outage errors would fail every record the same way.
            Err(e) if e.is_transient() || matches!(e.status(), Some(401) | Some(403)) => {
                return Err(e)
            }
            Err(e) => {
                warn!(
                    "Pinecone: batch of {} rejected ({}), retrying records one by one",
                    valid.len(),
                    e
                );
            }
        }

        // Isolate the records the service refuses so the rest still land.
        for record in &valid {
            match self.upsert_batch(&plane.url, std::slice::from_ref(record)).await {
                Ok(_) => report.upserted += 1,
                Err(e) => report.fail(&record.id, e.to_string()),
            }
        }
        Ok(report)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryMatch>> {
        let plane = self.data_plane().await?;
        let url = format!("{}/query", plane.url);
        let body = json!({
            "vector": vector,
            "topK": k,
            "includeMetadata": true,
            "includeValues": false,
        });
        let response: QueryResponse = self
            .retry
            .run("query", || self.send(Method::POST, &url, Some(&body)))
            .await?;

        Ok(response
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }
}

/// Describe returns a bare hostname; local emulators may return a full URL.
fn data_plane_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}
