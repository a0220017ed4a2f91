//! In-memory store for tests and offline runs.
//!
//! Mirrors the Qdrant semantics: idempotent upsert keyed by point id,
//! cosine-scored search, and the same schema-mismatch failure when the
//! collection is re-ensured with a different dimension.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use bookrag_core::{Error, Result};

use crate::store::{ChunkRecord, SearchHit, VectorStore};

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    dimension: Option<usize>,
    points: BTreeMap<Uuid, (ChunkRecord, Vec<f32>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.dimension {
            Some(existing) if existing != dimension => Err(Error::SchemaMismatch(format!(
                "memory store has dimension {existing}, expected {dimension}"
            ))),
            _ => {
                inner.dimension = Some(dimension);
                Ok(())
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
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(dimension) = inner.dimension {
            for vector in vectors {
                if vector.len() != dimension {
                    return Err(Error::DimensionMismatch {
                        expected: dimension,
                        got: vector.len(),
                    });
                }
            }
        }
        for (record, vector) in records.iter().zip(vectors) {
            inner
                .points
                .insert(record.point_id(), (record.clone(), vector.clone()));
        }
        Ok(())
    }

    async fn delete_document(&self, content_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .points
            .retain(|_, (record, _)| record.content_id != content_id);
        Ok(())
    }

    async fn document_hash(&self, content_id: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .points
            .values()
            .find(|(record, _)| record.content_id == content_id)
            .map(|(record, _)| record.content_hash.clone()))
    }

    async fn count_document(&self, content_id: &str) -> Result<u64> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .points
            .values()
            .filter(|(record, _)| record.content_id == content_id)
            .count() as u64)
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<SearchHit> = inner
            .points
            .values()
            .map(|(record, stored)| SearchHit {
                score: cosine(vector, stored),
                record: record.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<u64> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.points.len() as u64)
    }

    async fn sample(&self, limit: usize) -> Result<Vec<ChunkRecord>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .points
            .values()
            .take(limit)
            .map(|(record, _)| record.clone())
            .collect())
    }
}
