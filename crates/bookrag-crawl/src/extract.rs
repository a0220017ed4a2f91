//! Content extraction: one page -> one `ContentDocument`.
//!
//! The main content region is located with a selector cascade and
//! reduced to block texts (paragraphs, headings, list items, quotes,
//! code), skipping anything nested in navigation chrome. Pages whose
//! cleaned text falls under the minimum length are reported as failures
//! instead of being stored near-empty.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

use bookrag_core::{Error, PipelineConfig, Result, RetryPolicy};
use bookrag_ingest::{ContentDocument, Heading};

use crate::throttle::FetchThrottle;

/// Minimum cleaned-text length for a document to count as content.
pub const MIN_CONTENT_LEN: usize = 50;

/// Candidate main-content containers, most specific first.
const CONTAINER_SELECTORS: &[&str] = &[
    "main",
    ".markdown",
    ".theme-doc-markdown",
    "article",
    ".post-content",
    ".article-content",
    ".doc-content",
    ".content",
    "#content",
    ".main-content",
    "body",
];

/// Regions excluded even when nested inside the chosen container.
const EXCLUDED_ANCESTORS: &[&str] = &["nav", "header", "footer", "aside", "script", "style"];

/// Block-level elements whose text is collected.
const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre",
];

static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static WS_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Fetches a single URL and reduces it to a `ContentDocument`.
pub struct ContentExtractor {
    client: reqwest::Client,
    retry: RetryPolicy,
    throttle: Arc<FetchThrottle>,
}

impl ContentExtractor {
    pub fn new(
        _config: &PipelineConfig,
        retry: RetryPolicy,
        throttle: Arc<FetchThrottle>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            retry,
            throttle,
        })
    }

    /// Fetch and extract one page. Transient failures are retried through
    /// the shared policy; 4xx and empty extraction are permanent.
    pub async fn extract(&self, url: &str) -> Result<ContentDocument> {
        debug!("extracting {url}");
        let body = self
            .retry
            .run("extract", || self.fetch(url))
            .await?;
        let doc = extract_document(url, &body)?;
        info!(
            "extracted {} ({} words, {})",
            url,
            doc.word_count,
            doc.title
        );
        Ok(doc)
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        self.throttle.wait().await;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                detail: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Pure extraction from fetched HTML; separated for testability.
pub fn extract_document(url: &str, html: &str) -> Result<ContentDocument> {
    let document = Html::parse_document(html);

    let container = pick_container(&document)
        .ok_or_else(|| Error::MalformedContent(format!("no body element in {url}")))?;

    let title = extract_title(&document);
    let (text, headings) = collect_blocks(container);

    if text.trim().len() < MIN_CONTENT_LEN {
        return Err(Error::EmptyExtraction(url.to_string()));
    }

    let title = title.unwrap_or_else(|| {
        headings
            .first()
            .map(|h| h.text.clone())
            .unwrap_or_else(|| url.to_string())
    });

    Ok(ContentDocument::new(
        url,
        title,
        text,
        hierarchy_path(url),
        headings,
    ))
}

fn pick_container(document: &Html) -> Option<ElementRef<'_>> {
    for selector in CONTAINER_SELECTORS {
        let parsed = Selector::parse(selector).ok()?;
        if let Some(element) = document.select(&parsed).next() {
            return Some(element);
        }
    }
    None
}

fn extract_title(document: &Html) -> Option<String> {
    static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
    static HEADINGS: Lazy<Selector> =
        Lazy::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").unwrap());

    let from_tag = document
        .select(&TITLE)
        .next()
        .map(|t| clean_inline(&t.text().collect::<String>()))
        .filter(|t| t.len() >= 2);
    if from_tag.is_some() {
        return from_tag;
    }
    document
        .select(&HEADINGS)
        .next()
        .map(|h| clean_inline(&h.text().collect::<String>()))
        .filter(|t| t.len() >= 2)
}

/// Walk block elements under the container, skipping navigation chrome
/// and nested blocks (a `code` inside `pre`, a `p` inside `blockquote`),
/// assembling cleaned text and heading offsets.
fn collect_blocks(container: ElementRef<'_>) -> (String, Vec<Heading>) {
    static BLOCKS: Lazy<Selector> =
        Lazy::new(|| Selector::parse("p, h1, h2, h3, h4, h5, h6, li, blockquote, pre").unwrap());

    let mut text = String::new();
    let mut headings = Vec::new();

    for element in container.select(&BLOCKS) {
        if has_excluded_or_block_ancestor(element, container) {
            continue;
        }
        let tag = element.value().name();
        let block = if tag == "pre" {
            clean_preformatted(&element.text().collect::<String>())
        } else {
            clean_inline(&element.text().collect::<String>())
        };
        if block.len() <= 5 {
            continue;
        }

        if !text.is_empty() {
            text.push_str("\n\n");
        }
        if tag.len() == 2 && tag.starts_with('h') {
            headings.push(Heading {
                offset: text.len(),
                text: block.clone(),
            });
        }
        text.push_str(&block);
    }

    (text, headings)
}

fn has_excluded_or_block_ancestor(element: ElementRef<'_>, container: ElementRef<'_>) -> bool {
    for ancestor in element.ancestors() {
        if ancestor.id() == container.id() {
            break;
        }
        let Some(parent) = ElementRef::wrap(ancestor) else {
            continue;
        };
        let name = parent.value().name();
        if EXCLUDED_ANCESTORS.contains(&name) || BLOCK_TAGS.contains(&name) {
            return true;
        }
    }
    false
}

/// Collapse all interior whitespace to single spaces.
fn clean_inline(raw: &str) -> String {
    WS_RUN_RE.replace_all(raw.trim(), " ").into_owned()
}

/// Preserve line structure inside code blocks, normalizing spaces only.
fn clean_preformatted(raw: &str) -> String {
    let collapsed = SPACE_RE.replace_all(raw, " ");
    collapsed.trim_matches('\n').trim_end().to_string()
}

/// Hierarchy label from the URL path: every segment but the page itself.
pub fn hierarchy_path(url: &str) -> String {
    let segments: Vec<String> = Url::parse(url)
        .ok()
        .map(|u| {
            u.path()
                .trim_matches('/')
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    match segments.len() {
        0 => "root".to_string(),
        1 => segments[0].clone(),
        _ => segments[..segments.len() - 1].join("/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn extractor() -> ContentExtractor {
        let config = PipelineConfig::for_tests();
        let retry = RetryPolicy::new(3, std::time::Duration::from_millis(1), 2);
        let throttle = Arc::new(FetchThrottle::new(config.rate_limit_delay));
        ContentExtractor::new(&config, retry, throttle).unwrap()
    }

    const PAGE: &str = r#"<html>
<head><title>Lesson 1.1: Sensors</title></head>
<body>
  <nav><ul><li>Navigation entry that must not leak into content</li></ul></nav>
  <main>
    <h1>Sensors for Humanoids</h1>
    <p>Perception begins with sensing. Cameras, IMUs and force sensors feed
       the control loop of every modern humanoid robot platform.</p>
    <h2>Camera Models</h2>
    <p>A pinhole camera model maps world points onto the image plane and is
       the foundation of visual perception pipelines.</p>
    <pre><code>let fx = 525.0;
let cx = 319.5;</code></pre>
  </main>
  <footer><p>Copyright notice that should be excluded from text</p></footer>
</body>
</html>"#;

    #[test]
    fn extracts_main_content_and_skips_chrome() {
        let doc = extract_document("https://e.com/docs/chapter-1/lesson-1-1", PAGE).unwrap();
        assert_eq!(doc.title, "Lesson 1.1: Sensors");
        assert!(doc.text.contains("Perception begins with sensing."));
        assert!(doc.text.contains("let fx = 525.0;\nlet cx = 319.5;"));
        assert!(!doc.text.contains("Navigation entry"));
        assert!(!doc.text.contains("Copyright notice"));
    }

    #[test]
    fn heading_offsets_point_into_the_text() {
        let doc = extract_document("https://e.com/docs/chapter-1/lesson-1-1", PAGE).unwrap();
        assert_eq!(doc.headings.len(), 2);
        for heading in &doc.headings {
            assert!(doc.text[heading.offset..].starts_with(&heading.text));
        }
        assert_eq!(doc.headings[1].text, "Camera Models");
    }

    #[test]
    fn hierarchy_path_drops_the_page_segment() {
        assert_eq!(
            hierarchy_path("https://e.com/docs/chapter-1/lesson-1-1"),
            "docs/chapter-1"
        );
        assert_eq!(hierarchy_path("https://e.com/intro"), "intro");
        assert_eq!(hierarchy_path("https://e.com/"), "root");
    }

    #[test]
    fn near_empty_pages_are_rejected() {
        let html = "<html><body><main><p>Too short.</p></main></body></html>";
        let err = extract_document("https://e.com/docs/empty", html).unwrap_err();
        assert!(matches!(err, Error::EmptyExtraction(_)));
    }

    #[test]
    fn title_falls_back_to_first_heading() {
        let html = r#"<html><body><main>
            <h1>Fallback Title</h1>
            <p>Enough body text to clear the fifty character minimum for content.</p>
        </main></body></html>"#;
        let doc = extract_document("https://e.com/docs/x", html).unwrap();
        assert_eq!(doc.title, "Fallback Title");
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_exhausted() {
        let server = MockServer::start_async().await;
        let flaky = server
            .mock_async(|when, then| {
                when.method(GET).path("/docs/flaky");
                then.status(500);
            })
            .await;

        let extractor = extractor();
        let url = format!("{}/docs/flaky", server.base_url());
        let err = extractor.extract(&url).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 500, .. }));
        assert_eq!(flaky.hits_async().await, 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let missing = server
            .mock_async(|when, then| {
                when.method(GET).path("/docs/gone");
                then.status(404);
            })
            .await;

        let extractor = extractor();
        let url = format!("{}/docs/gone", server.base_url());
        let err = extractor.extract(&url).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 404, .. }));
        assert_eq!(missing.hits_async().await, 1);
    }
}
