//! Post-ingestion retrieval validation.
//!
//! Read-only against the store: a dimension probe plus a handful of
//! retrieval probes. When no probes are supplied, one is derived from a
//! stored sample point so a fresh collection can still be checked. A
//! failed validation is reported, not fatal.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use bookrag_core::{Error, Result};
use bookrag_embed::EmbeddingBackend;
use bookrag_store::VectorStore;

/// Characters of stored content used for a derived probe query.
const DERIVED_QUERY_CHARS: usize = 200;

/// One retrieval expectation: this query should surface this URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationProbe {
    pub query: String,
    pub expected_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub query: String,
    pub expected_url: String,
    pub top_url: Option<String>,
    pub passed: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub dimension_ok: bool,
    pub probes: Vec<ProbeResult>,
    pub passed: bool,
}

pub struct Validator {
    embedder: Arc<dyn EmbeddingBackend>,
    store: Arc<dyn VectorStore>,
}

impl Validator {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Run the dimension probe and every retrieval probe. `probes` may be
    /// empty; a probe is then derived from a stored sample.
    pub async fn validate(&self, probes: &[ValidationProbe]) -> Result<ValidationSummary> {
        let dimension_ok = self.check_dimension().await?;

        let probes = if probes.is_empty() {
            self.derived_probes().await?
        } else {
            probes.to_vec()
        };

        let mut results = Vec::with_capacity(probes.len());
        for probe in &probes {
            results.push(self.run_probe(probe).await?);
        }

        let passed = dimension_ok && results.iter().all(|r| r.passed);
        if passed {
            info!("validation passed ({} probes)", results.len());
        } else {
            warn!(
                "validation failed: dimension_ok={dimension_ok}, probes {}/{} passed",
                results.iter().filter(|r| r.passed).count(),
                results.len()
            );
        }
        Ok(ValidationSummary {
            dimension_ok,
            probes: results,
            passed,
        })
    }

    async fn check_dimension(&self) -> Result<bool> {
        let vectors = self
            .embedder
            .embed(&["dimension probe".to_string()])
            .await?;
        let got = vectors.first().map(Vec::len).unwrap_or(0);
        Ok(got == self.embedder.dimension())
    }

    /// Build a probe from an arbitrary stored point: the opening of its
    /// content should retrieve its own URL.
    async fn derived_probes(&self) -> Result<Vec<ValidationProbe>> {
        let sample = self.store.sample(1).await?;
        let Some(record) = sample.into_iter().next() else {
            return Err(Error::Validation("store is empty, nothing to probe".into()));
        };
        let query: String = record.content.chars().take(DERIVED_QUERY_CHARS).collect();
        Ok(vec![ValidationProbe {
            query,
            expected_url: record.url,
        }])
    }

    async fn run_probe(&self, probe: &ValidationProbe) -> Result<ProbeResult> {
        let start = Instant::now();
        let vectors = self.embedder.embed(&[probe.query.clone()]).await?;
        let hits = self.store.search(&vectors[0], 3).await?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let top_url = hits.first().map(|h| h.record.url.clone());
        let passed = hits.iter().any(|h| h.record.url == probe.expected_url);
        Ok(ProbeResult {
            query: probe.query.clone(),
            expected_url: probe.expected_url.clone(),
            top_url,
            passed,
            latency_ms,
        })
    }
}
