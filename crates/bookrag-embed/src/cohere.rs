//! Cohere embed API client.
//!
//! Requests are batched at the provider limit, spaced by a fixed delay,
//! and retried through the shared policy. 429 responses are retryable;
//! 401/403 abort the run immediately.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use bookrag_core::{Error, PipelineConfig, Result, RetryPolicy};

use crate::backend::EmbeddingBackend;

pub struct CohereEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    rate_limit_delay: Duration,
    retry: RetryPolicy,
    last_request: Mutex<Option<Instant>>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
    model: &'a str,
    truncate: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl CohereEmbedder {
    pub fn new(config: &PipelineConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.embed_endpoint.clone(),
            api_key: config.cohere_api_key.clone(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dim,
            batch_size: config.embed_batch_size.max(1),
            rate_limit_delay: config.rate_limit_delay,
            retry,
            last_request: Mutex::new(None),
        })
    }

    /// Enforce the minimum spacing between requests. The lock is held
    /// through the sleep so concurrent batches queue up behind it.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.rate_limit_delay {
                tokio::time::sleep(self.rate_limit_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.throttle().await;

        let request = EmbedRequest {
            texts,
            model: &self.model,
            truncate: "END",
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::Throttled(format!(
                "embedding provider rate limited ({status})"
            )));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Auth(format!(
                "embedding provider rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let parsed: EmbedResponse = response.json().await?;
        if parsed.embeddings.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, provider returned {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        for vector in &parsed.embeddings {
            if vector.len() != self.dimension {
                return Err(Error::DimensionMismatch {
                    expected: self.dimension,
                    got: vector.len(),
                });
            }
        }
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl EmbeddingBackend for CohereEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!("embedding batch of {}", batch.len());
            let embedded = self
                .retry
                .run("embed", || self.embed_batch(batch))
                .await?;
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}
