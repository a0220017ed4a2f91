//! Query surface: the only contract exposed to a serving layer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use bookrag_core::Result;
use bookrag_embed::EmbeddingBackend;
use bookrag_store::VectorStore;

/// One ranked passage, ready to drop into a prompt or a terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub chunk_text: String,
    pub url: String,
    pub section: String,
    pub score: f32,
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingBackend>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Embed the query with the ingestion backend and return the nearest
    /// stored chunks, best first.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedPassage>> {
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let hits = self.store.search(&vectors[0], top_k).await?;
        Ok(hits
            .into_iter()
            .map(|hit| RetrievedPassage {
                chunk_text: hit.record.content,
                url: hit.record.url,
                section: hit.record.section,
                score: hit.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookrag_embed::DeterministicEmbedder;
    use bookrag_store::{ChunkRecord, MemoryStore, VectorStore};
    use chrono::Utc;

    fn record(content_id: &str, content: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: format!("{content_id}_chunk_0"),
            content_id: content_id.into(),
            url: format!("https://e.com/docs/{content_id}"),
            section: "Intro".into(),
            hierarchy_path: "docs".into(),
            chunk_index: 0,
            token_count: content.split_whitespace().count(),
            content: content.into(),
            content_hash: "h".into(),
            model: "deterministic-test".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn exact_text_query_ranks_its_chunk_first() {
        let embedder = Arc::new(DeterministicEmbedder::new(16));
        let store = Arc::new(MemoryStore::new());
        store.ensure_collection(16).await.unwrap();

        let texts = ["sensors and actuators", "kinematics of walking"];
        let records: Vec<ChunkRecord> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| record(&format!("content_{i}"), t))
            .collect();
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let vectors = embedder.embed(&owned).await.unwrap();
        store.upsert_chunks(&records, &vectors).await.unwrap();

        let retriever = Retriever::new(embedder, store);
        let passages = retriever.retrieve("kinematics of walking", 2).await.unwrap();
        assert_eq!(passages[0].chunk_text, "kinematics of walking");
        assert!(passages[0].score > passages[1].score);
    }
}
