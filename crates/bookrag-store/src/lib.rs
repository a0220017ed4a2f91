//! BookRag Store — vector persistence behind a backend trait.

pub mod memory;
pub mod qdrant;
pub mod store;

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;
pub use store::{point_id, ChunkRecord, SearchHit, VectorStore};
