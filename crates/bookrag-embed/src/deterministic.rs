//! Offline embedding backend for tests and dry runs.
//!
//! Vectors are derived from a hash of the text, so equal texts always
//! embed identically and distinct texts almost never collide. Output is
//! L2-normalized to behave sensibly under cosine distance.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use bookrag_core::Result;

use crate::backend::EmbeddingBackend;

pub struct DeterministicEmbedder {
    dimension: usize,
    model: String,
}

impl DeterministicEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: "deterministic-test".to_string(),
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;
        while out.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(counter.to_le_bytes());
            hasher.update(text.as_bytes());
            let digest = hasher.finalize();
            for pair in digest.chunks(2) {
                if out.len() == self.dimension {
                    break;
                }
                let raw = u16::from_le_bytes([pair[0], pair[1]]) as f32;
                out.push(raw / u16::MAX as f32 - 0.5);
            }
            counter += 1;
        }
        let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut out {
                *x /= norm;
            }
        }
        out
    }
}

#[async_trait]
impl EmbeddingBackend for DeterministicEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}
