//! Storage trait and the stored-record shape.
//!
//! Point ids are UUIDv5 digests of the deterministic chunk id, so
//! re-running ingestion overwrites rather than duplicates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bookrag_core::Result;
use bookrag_ingest::Chunk;

/// Stable point id for a chunk id.
pub fn point_id(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, chunk_id.as_bytes())
}

/// The payload stored alongside each vector. Carries everything needed
/// to render a retrieval hit without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub content_id: String,
    pub url: String,
    pub section: String,
    pub hierarchy_path: String,
    pub chunk_index: usize,
    pub token_count: usize,
    pub content: String,
    /// Hash of the full source document, the re-run skip key.
    pub content_hash: String,
    /// Versioned provider model string (e.g. `embed-multilingual-v2.0`);
    /// the version is part of the identifier, not a separate field.
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub fn from_chunk(chunk: &Chunk, content_hash: &str, model: &str) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            content_id: chunk.content_id.clone(),
            url: chunk.url.clone(),
            section: chunk.section_title.clone(),
            hierarchy_path: chunk.hierarchy_path.clone(),
            chunk_index: chunk.chunk_index,
            token_count: chunk.token_count,
            content: chunk.text.clone(),
            content_hash: content_hash.to_string(),
            model: model.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn point_id(&self) -> Uuid {
        point_id(&self.chunk_id)
    }
}

/// One similarity-search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub score: f32,
    pub record: ChunkRecord,
}

/// Vector persistence. All operations are idempotent with respect to
/// chunk ids; `ensure_collection` fails loudly when an existing
/// collection does not match the expected schema.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent; error on a schema mismatch.
    async fn ensure_collection(&self, dimension: usize) -> Result<()>;

    /// Insert or overwrite one point per record. `records` and `vectors`
    /// are parallel slices.
    async fn upsert_chunks(&self, records: &[ChunkRecord], vectors: &[Vec<f32>]) -> Result<()>;

    /// Drop every point belonging to a document.
    async fn delete_document(&self, content_id: &str) -> Result<()>;

    /// Content hash stored for a document, if any of its chunks exist.
    async fn document_hash(&self, content_id: &str) -> Result<Option<String>>;

    /// Number of stored points belonging to a document. Together with the
    /// stored hash this tells a re-run whether the document is complete.
    async fn count_document(&self, content_id: &str) -> Result<u64>;

    /// Nearest stored chunks by cosine similarity, best first.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>>;

    /// Total number of stored points.
    async fn count(&self) -> Result<u64>;

    /// An arbitrary page of stored records, for spot checks.
    async fn sample(&self, limit: usize) -> Result<Vec<ChunkRecord>>;
}
