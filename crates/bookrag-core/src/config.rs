//! Pipeline configuration, resolved once from the environment.
//!
//! No module-level singletons: the resolved value is passed into each
//! component constructor, and credentials never appear in logs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default Cohere embed endpoint.
pub const DEFAULT_EMBED_ENDPOINT: &str = "https://api.cohere.ai/v1/embed";
/// Default embedding model; 768-dimensional vectors.
pub const DEFAULT_EMBEDDING_MODEL: &str = "embed-multilingual-v2.0";
/// Dimensionality of the default model.
pub const DEFAULT_EMBEDDING_DIM: usize = 768;
/// Provider-imposed maximum batch size.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 96;

/// All tunables for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bearer credential for the embedding provider. Never logged.
    #[serde(skip_serializing)]
    pub cohere_api_key: String,
    pub embed_endpoint: String,
    pub embedding_model: String,
    pub embedding_dim: usize,

    /// Qdrant base URL, e.g. `http://localhost:6333`.
    pub qdrant_url: String,
    #[serde(skip_serializing)]
    pub qdrant_api_key: Option<String>,
    pub collection_name: String,

    /// Root of the documentation site being ingested.
    pub target_base_url: String,
    pub sitemap_url: String,
    pub max_pages: usize,

    /// Target chunk size in tokens.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, as a fraction of `chunk_size`.
    pub chunk_overlap: f32,

    /// Concurrent fetches against the source site.
    pub crawl_concurrency: usize,
    /// Concurrent in-flight embedding batches.
    pub embed_concurrency: usize,
    pub embed_batch_size: usize,
    /// Minimum delay between successive embedding requests.
    pub rate_limit_delay: Duration,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Resolve configuration from environment variables with documented
    /// defaults, then validate required credentials.
    pub fn from_env() -> Result<Self> {
        let target_base_url = std::env::var("TARGET_BASE_URL")
            .unwrap_or_else(|_| "https://physical-ai-humanoid-robotics-vert.vercel.app".into());
        let sitemap_url = std::env::var("TARGET_SITEMAP_URL")
            .unwrap_or_else(|_| format!("{}/sitemap.xml", target_base_url.trim_end_matches('/')));

        let config = Self {
            cohere_api_key: std::env::var("COHERE_API_KEY").unwrap_or_default(),
            embed_endpoint: std::env::var("COHERE_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_EMBED_ENDPOINT.into()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.into()),
            embedding_dim: env_or("EMBEDDING_DIM", DEFAULT_EMBEDDING_DIM),
            qdrant_url: std::env::var("QDRANT_URL")
                .unwrap_or_else(|_| "http://localhost:6333".into()),
            qdrant_api_key: std::env::var("QDRANT_API_KEY").ok().filter(|k| !k.is_empty()),
            collection_name: std::env::var("COLLECTION_NAME")
                .unwrap_or_else(|_| "rag_embedding".into()),
            target_base_url,
            sitemap_url,
            max_pages: env_or("MAX_PAGES", 100),
            chunk_size: env_or("CHUNK_SIZE", 512),
            chunk_overlap: env_or("CHUNK_OVERLAP", 0.1),
            crawl_concurrency: env_or("MAX_CONCURRENT_REQUESTS", 5),
            embed_concurrency: env_or("EMBED_CONCURRENCY", 2),
            embed_batch_size: env_or("EMBED_BATCH_SIZE", DEFAULT_EMBED_BATCH_SIZE),
            rate_limit_delay: Duration::from_secs_f64(env_or("RATE_LIMIT_DELAY", 1.0)),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check required settings; lists every missing variable at once.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.cohere_api_key.is_empty() {
            missing.push("COHERE_API_KEY");
        }
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("CHUNK_SIZE must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.chunk_overlap) {
            return Err(Error::Config(
                "CHUNK_OVERLAP must be in [0.0, 1.0)".into(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::Config("EMBED_BATCH_SIZE must be positive".into()));
        }
        Ok(())
    }

    /// Overlap between consecutive chunks, in tokens.
    pub fn overlap_tokens(&self) -> usize {
        (self.chunk_size as f32 * self.chunk_overlap).round() as usize
    }

    /// Baseline config for tests; not read from the environment.
    pub fn for_tests() -> Self {
        Self {
            cohere_api_key: "test-key".into(),
            embed_endpoint: DEFAULT_EMBED_ENDPOINT.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            qdrant_url: "http://localhost:6333".into(),
            qdrant_api_key: None,
            collection_name: "rag_embedding".into(),
            target_base_url: "https://example.com".into(),
            sitemap_url: "https://example.com/sitemap.xml".into(),
            max_pages: 100,
            chunk_size: 512,
            chunk_overlap: 0.1,
            crawl_concurrency: 5,
            embed_concurrency: 2,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            rate_limit_delay: Duration::from_millis(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_reports_missing_credential() {
        let mut config = PipelineConfig::for_tests();
        config.cohere_api_key.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("COHERE_API_KEY"));
    }

    #[test]
    fn validate_rejects_bad_overlap() {
        let mut config = PipelineConfig::for_tests();
        config.chunk_overlap = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn overlap_tokens_rounds_from_fraction() {
        let config = PipelineConfig::for_tests();
        assert_eq!(config.overlap_tokens(), 51); // 512 * 0.1
    }
}
