//! BookRag Ingest — crawled-document model and overlap-aware chunking.

pub mod chunking;
pub mod document;

pub use chunking::{Chunk, ChunkConfig, Chunker};
pub use document::{content_hash, ContentDocument, ContentType, Heading};
