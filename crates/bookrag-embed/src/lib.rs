//! BookRag Embed — text to vector, behind a backend trait.
//!
//! The pipeline only sees `EmbeddingBackend`; the Cohere HTTP client and
//! the deterministic offline backend are interchangeable behind it.

pub mod backend;
pub mod cohere;
pub mod deterministic;

pub use backend::EmbeddingBackend;
pub use cohere::CohereEmbedder;
pub use deterministic::DeterministicEmbedder;
