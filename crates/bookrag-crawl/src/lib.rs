//! BookRag Crawl — page discovery and content extraction.

pub mod discover;
pub mod extract;
pub mod throttle;

pub use discover::UrlDiscoverer;
pub use extract::ContentExtractor;
pub use throttle::FetchThrottle;

/// Shared user agent for all requests against the source site.
pub(crate) const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/91.0.4472.124 Safari/537.36";
