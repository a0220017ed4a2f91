//! Crawled page model.
//!
//! The document id is a deterministic function of the URL alone, so a
//! re-crawl of the same page maps onto the same stored records. Content
//! changes are detected separately through `content_hash`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Coarse page classification derived from the URL path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Documentation,
    Blog,
    Module,
    Intro,
    Research,
}

impl ContentType {
    /// Classify from the URL path; unknown paths count as documentation.
    pub fn from_url(url: &str) -> Self {
        if url.contains("/blog/") {
            ContentType::Blog
        } else if url.contains("/modules/") {
            ContentType::Module
        } else if url.contains("/research-articles") {
            ContentType::Research
        } else if url.contains("/intro") {
            ContentType::Intro
        } else {
            ContentType::Documentation
        }
    }
}

/// A heading encountered during extraction, positioned by byte offset
/// into the cleaned text. Used for section assignment while chunking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub offset: usize,
    pub text: String,
}

/// One crawled page, immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentDocument {
    pub id: String,
    pub url: String,
    pub title: String,
    pub content_type: ContentType,
    pub text: String,
    pub content_hash: String,
    pub hierarchy_path: String,
    pub headings: Vec<Heading>,
    pub word_count: usize,
    pub crawled_at: DateTime<Utc>,
}

impl ContentDocument {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
        hierarchy_path: impl Into<String>,
        headings: Vec<Heading>,
    ) -> Self {
        let url = url.into();
        let text = text.into();
        Self {
            id: document_id(&url),
            content_type: ContentType::from_url(&url),
            content_hash: content_hash(&text),
            word_count: text.split_whitespace().count(),
            crawled_at: Utc::now(),
            url,
            title: title.into(),
            text,
            hierarchy_path: hierarchy_path.into(),
            headings,
        }
    }
}

/// Deterministic document id derived from the canonical URL.
pub fn document_id(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.trim_end_matches('/').as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("content_{}", &digest[..12])
}

/// SHA-256 content hash, the change-detection key for re-runs.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_stable_per_url() {
        let a = document_id("https://example.com/docs/chapter-1");
        let b = document_id("https://example.com/docs/chapter-1");
        let c = document_id("https://example.com/docs/chapter-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("content_"));
    }

    #[test]
    fn trailing_slash_does_not_change_id() {
        assert_eq!(
            document_id("https://example.com/docs/x"),
            document_id("https://example.com/docs/x/")
        );
    }

    #[test]
    fn content_type_from_path() {
        assert_eq!(
            ContentType::from_url("https://e.com/blog/post-1"),
            ContentType::Blog
        );
        assert_eq!(
            ContentType::from_url("https://e.com/modules/ros2"),
            ContentType::Module
        );
        assert_eq!(
            ContentType::from_url("https://e.com/docs/chapter-1"),
            ContentType::Documentation
        );
        assert_eq!(
            ContentType::from_url("https://e.com/intro"),
            ContentType::Intro
        );
    }

    #[test]
    fn new_document_fills_derived_fields() {
        let doc = ContentDocument::new(
            "https://e.com/docs/ch1",
            "Chapter 1",
            "one two three",
            "docs",
            vec![],
        );
        assert_eq!(doc.word_count, 3);
        assert_eq!(doc.content_hash, content_hash("one two three"));
        assert_eq!(doc.id, document_id("https://e.com/docs/ch1"));
    }
}
