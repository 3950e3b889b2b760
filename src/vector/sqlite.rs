use super::{cosine_similarity, IndexHandle, IndexSpec, Metric, UpsertReport, VectorIndex};
use crate::error::{RagError, Result};
use crate::rag::{MessageMetadata, QueryMatch, VectorRecord};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Local vector store: brute-force cosine search over an SQLite table.
#[derive(Clone)]
pub struct SqliteIndex {
    conn: Arc<Mutex<Connection>>,
    name: String,
}

impl SqliteIndex {
    pub fn open(path: &str, name: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && path != ":memory:" {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RagError::Storage(format!("creating {}: {}", parent.display(), e)))?;
            }
        }
        let conn = Connection::open(path)?;
        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
            name: name.to_string(),
        };
        index.execute_init()?;
        Ok(index)
    }

    pub fn open_in_memory(name: &str) -> Result<Self> {
        Self::open(":memory:", name)
    }

    fn execute_init(&self) -> Result<()> {
        let sql = "
            CREATE TABLE IF NOT EXISTS index_meta (
                name TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                metric TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS vectors (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                index_name TEXT NOT NULL,
                id TEXT NOT NULL,
                vector BLOB NOT NULL,
                metadata TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (index_name, id)
            );
        ";
        self.lock()?.execute_batch(sql)?;
        debug!("SqliteIndex: schema initialized");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RagError::Storage("connection lock poisoned".to_string()))
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteIndex) -> Result<T> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(&this))
            .await
            .map_err(|e| RagError::Storage(format!("blocking task failed: {}", e)))?
    }

    fn dimension(&self) -> Result<Option<usize>> {
        let conn = self.lock()?;
        let dimension: Option<i64> = conn
            .query_row(
                "SELECT dimension FROM index_meta WHERE name = ?1",
                [&self.name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(dimension.map(|d| d as usize))
    }

    fn ensure_index_blocking(&self, spec: &IndexSpec) -> Result<IndexHandle> {
        if spec.name != self.name {
            return Err(RagError::Config(format!(
                "index '{}' requested from a store opened for '{}'",
                spec.name, self.name
            )));
        }
        let conn = self.lock()?;
        let existing: Option<(i64, String)> = conn
            .query_row(
                "SELECT dimension, metric FROM index_meta WHERE name = ?1",
                [&spec.name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((dimension, metric)) = existing {
            spec.check_existing(dimension as usize, &metric)?;
            return Ok(IndexHandle {
                name: spec.name.clone(),
                dimension: spec.dimension,
                metric: spec.metric,
                created: false,
            });
        }

        conn.execute(
            "INSERT INTO index_meta (name, dimension, metric) VALUES (?1, ?2, ?3)",
            (&spec.name, spec.dimension as i64, spec.metric.as_str()),
        )?;
        info!(
            "SqliteIndex: created index '{}' (dimension {}, {})",
            spec.name, spec.dimension, spec.metric
        );
        Ok(IndexHandle {
            name: spec.name.clone(),
            dimension: spec.dimension,
            metric: spec.metric,
            created: true,
        })
    }

    fn upsert_blocking(&self, records: &[VectorRecord]) -> Result<UpsertReport> {
        let dimension = self.dimension()?.ok_or_else(|| {
            RagError::Config(format!("index '{}' does not exist", self.name))
        })?;

        let conn = self.lock()?;
        let mut report = UpsertReport::default();
        for record in records {
            if record.values.len() != dimension {
                report.fail(
                    &record.id,
                    format!(
                        "vector has {} values, index expects {}",
                        record.values.len(),
                        dimension
                    ),
                );
                continue;
            }
            let metadata = match serde_json::to_string(&record.metadata) {
                Ok(m) => m,
                Err(e) => {
                    report.fail(&record.id, e.to_string());
                    continue;
                }
            };
            let written = conn.execute(
                "INSERT INTO vectors (index_name, id, vector, metadata, updated_at)
                 VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
                 ON CONFLICT(index_name, id) DO UPDATE SET
                    vector = ?3, metadata = ?4, updated_at = CURRENT_TIMESTAMP",
                (&self.name, &record.id, encode_vector(&record.values), metadata),
            );
            match written {
                Ok(_) => report.upserted += 1,
                Err(e) => report.fail(&record.id, e.to_string()),
            }
        }
        debug!(
            "SqliteIndex: upserted {} records, {} failed",
            report.upserted,
            report.failures.len()
        );
        Ok(report)
    }

    fn query_blocking(&self, vector: &[f32], k: usize) -> Result<Vec<QueryMatch>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, vector, metadata FROM vectors WHERE index_name = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map([&self.name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, blob, metadata) = row?;
            let metadata: MessageMetadata = serde_json::from_str(&metadata)
                .map_err(|e| RagError::Storage(format!("bad metadata for {}: {}", id, e)))?;
            let score = cosine_similarity(vector, &decode_vector(&blob));
            scored.push(QueryMatch {
                id,
                score: Some(score),
                metadata,
            });
        }

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| {
            b.score
                .unwrap_or(f32::MIN)
                .partial_cmp(&a.score.unwrap_or(f32::MIN))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<IndexHandle> {
        let spec = spec.clone();
        self.run_blocking(move |index| index.ensure_index_blocking(&spec))
            .await
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<UpsertReport> {
        let records = records.to_vec();
        self.run_blocking(move |index| index.upsert_blocking(&records))
            .await
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryMatch>> {
        let vector = vector.to_vec();
        self.run_blocking(move |index| index.query_blocking(&vector, k))
            .await
    }
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
