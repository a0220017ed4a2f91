//! Qdrant REST client.
//!
//! Talks to the points API directly over HTTP. Upserts use `wait=true`
//! so a returned `Ok` means the points are durable, and deletes filter
//! on `content_id` so a document's chunks can be replaced atomically
//! enough for re-runs.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use bookrag_core::{Error, PipelineConfig, Result, RetryPolicy};

use crate::store::{ChunkRecord, SearchHit, VectorStore};

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    dimension: usize,
    retry: RetryPolicy,
}

impl QdrantStore {
    pub fn new(config: &PipelineConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: config.qdrant_url.trim_end_matches('/').to_string(),
            api_key: config.qdrant_api_key.clone(),
            collection: config.collection_name.clone(),
            dimension: config.embedding_dim,
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    /// Send a request and parse the standard `{ "result": ... }` envelope.
    /// 404 surfaces as `Status` so callers can distinguish a missing
    /// collection from other failures.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = self.apply_auth(request).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Auth(format!(
                "vector store rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                detail,
            });
        }
        let body: Value = response.json().await?;
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn collection_info(&self) -> Result<Option<Value>> {
        let request = self.client.get(self.url(""));
        match self.send(request).await {
            Ok(info) => Ok(Some(info)),
            Err(Error::Status { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_collection(&self, dimension: usize) -> Result<()> {
        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" }
        });
        let request = self.client.put(self.url("")).json(&body);
        self.send(request).await?;
        info!(
            "created collection {} (dim {dimension}, cosine)",
            self.collection
        );
        Ok(())
    }

    fn check_schema(&self, info: &Value, dimension: usize) -> Result<()> {
        let params = &info["config"]["params"]["vectors"];
        let size = params["size"].as_u64().unwrap_or(0) as usize;
        let distance = params["distance"].as_str().unwrap_or("");
        if size != dimension || distance != "Cosine" {
            return Err(Error::SchemaMismatch(format!(
                "collection {} has size {size} / distance {distance}, expected {dimension} / Cosine",
                self.collection
            )));
        }
        Ok(())
    }

    fn parse_record(payload: &Value) -> Result<ChunkRecord> {
        serde_json::from_value(payload.clone())
            .map_err(|e| Error::Store(format!("malformed stored payload: {e}")))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let info = self
            .retry
            .run("qdrant collection info", || self.collection_info())
            .await?;
        match info {
            Some(info) => self.check_schema(&info, dimension),
            None => {
                self.retry
                    .run("qdrant create collection", || {
                        self.create_collection(dimension)
                    })
                    .await
            }
        }
    }

    async fn upsert_chunks(&self, records: &[ChunkRecord], vectors: &[Vec<f32>]) -> Result<()> {
        if records.len() != vectors.len() {
            return Err(Error::Store(format!(
                "{} records but {} vectors",
                records.len(),
                vectors.len()
            )));
        }
        for vector in vectors {
            if vector.len() != self.dimension {
                return Err(Error::DimensionMismatch {
                    expected: self.dimension,
                    got: vector.len(),
                });
            }
        }
        if records.is_empty() {
            return Ok(());
        }
        let points: Vec<Value> = records
            .iter()
            .zip(vectors)
            .map(|(record, vector)| {
                Ok(json!({
                    "id": record.point_id().to_string(),
                    "vector": vector,
                    "payload": serde_json::to_value(record)?,
                }))
            })
            .collect::<Result<_>>()?;
        let body = json!({ "points": points });

        debug!("upserting {} points", records.len());
        self.retry
            .run("qdrant upsert", || async {
                let request = self
                    .client
                    .put(self.url("/points?wait=true"))
                    .json(&body);
                self.send(request).await.map(|_| ())
            })
            .await
    }

    async fn delete_document(&self, content_id: &str) -> Result<()> {
        let body = json!({
            "filter": {
                "must": [{ "key": "content_id", "match": { "value": content_id } }]
            }
        });
        self.retry
            .run("qdrant delete", || async {
                let request = self
                    .client
                    .post(self.url("/points/delete?wait=true"))
                    .json(&body);
                self.send(request).await.map(|_| ())
            })
            .await
    }

    async fn document_hash(&self, content_id: &str) -> Result<Option<String>> {
        let body = json!({
            "filter": {
                "must": [{ "key": "content_id", "match": { "value": content_id } }]
            },
            "limit": 1,
            "with_payload": true,
        });
        let result = self
            .retry
            .run("qdrant scroll", || async {
                let request = self.client.post(self.url("/points/scroll")).json(&body);
                self.send(request).await
            })
            .await?;
        let hash = result["points"]
            .as_array()
            .and_then(|points| points.first())
            .and_then(|point| point["payload"]["content_hash"].as_str())
            .map(str::to_string);
        Ok(hash)
    }

    async fn count_document(&self, content_id: &str) -> Result<u64> {
        let body = json!({
            "filter": {
                "must": [{ "key": "content_id", "match": { "value": content_id } }]
            },
            "exact": true,
        });
        let result = self
            .retry
            .run("qdrant count", || async {
                let request = self.client.post(self.url("/points/count")).json(&body);
                self.send(request).await
            })
            .await?;
        Ok(result["count"].as_u64().unwrap_or(0))
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        let result = self
            .retry
            .run("qdrant search", || async {
                let request = self.client.post(self.url("/points/search")).json(&body);
                self.send(request).await
            })
            .await?;
        let hits = result
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|hit| {
                Ok(SearchHit {
                    score: hit["score"].as_f64().unwrap_or(0.0) as f32,
                    record: Self::parse_record(&hit["payload"])?,
                })
            })
            .collect::<Result<_>>()?;
        Ok(hits)
    }

    async fn count(&self) -> Result<u64> {
        let result = self
            .retry
            .run("qdrant count", || async {
                let request = self
                    .client
                    .post(self.url("/points/count"))
                    .json(&json!({ "exact": true }));
                self.send(request).await
            })
            .await?;
        Ok(result["count"].as_u64().unwrap_or(0))
    }

    async fn sample(&self, limit: usize) -> Result<Vec<ChunkRecord>> {
        let body = json!({ "limit": limit, "with_payload": true });
        let result = self
            .retry
            .run("qdrant scroll", || async {
                let request = self.client.post(self.url("/points/scroll")).json(&body);
                self.send(request).await
            })
            .await?;
        result["points"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|point| Self::parse_record(&point["payload"]))
            .collect()
    }
}
