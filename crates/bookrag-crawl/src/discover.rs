//! URL discovery: sitemap first, breadth-first crawl as fallback.
//!
//! Discovery re-enumerates from the root on every run; there is no
//! resumable cursor. Individual unreachable pages are logged and
//! skipped, but an unreachable root and sitemap together abort the run.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{info, warn};
use url::Url;

use bookrag_core::{Error, PipelineConfig, Result};

use crate::throttle::FetchThrottle;

/// Path fragments that never identify content pages.
const EXCLUDED_PATTERNS: &[&str] = &[
    "/tag/", "/category/", "/author/", "/feed", "/rss", ".jpg", ".jpeg", ".png", ".gif", ".pdf",
    ".zip", ".exe", ".css", ".js", ".json", ".xml", "/search",
];

/// Path prefixes that mark a page as content.
const CONTENT_PATTERNS: &[&str] = &["/docs/", "/blog/", "/modules/", "/research-articles", "/intro"];

static LOC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<loc>\s*([^<]+?)\s*</loc>").unwrap());
static SITEMAP_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<sitemap>").unwrap());

/// Enumerates content URLs reachable from a site root.
pub struct UrlDiscoverer {
    client: reqwest::Client,
    base_url: String,
    sitemap_url: String,
    max_pages: usize,
    throttle: Arc<FetchThrottle>,
}

impl UrlDiscoverer {
    pub fn new(config: &PipelineConfig, throttle: Arc<FetchThrottle>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: config.target_base_url.trim_end_matches('/').to_string(),
            sitemap_url: config.sitemap_url.clone(),
            max_pages: config.max_pages,
            throttle,
        })
    }

    /// All content URLs: sitemap entries, supplemented by a crawl when the
    /// sitemap is missing or sparse. Deduplicated, deterministically ordered.
    pub async fn discover(&self) -> Result<Vec<String>> {
        info!("discovering urls from {}", self.base_url);

        let sitemap_urls = match self.sitemap_urls().await {
            Ok(urls) => urls,
            Err(err) => {
                warn!("sitemap fetch failed ({err}), falling back to crawl");
                Vec::new()
            }
        };
        info!("sitemap yielded {} urls", sitemap_urls.len());

        let mut all: BTreeSet<String> = sitemap_urls.into_iter().collect();
        if all.len() < 10 {
            // Sparse sitemaps are supplemented by a crawl; the crawl is
            // only load-bearing when the sitemap yielded nothing.
            match self.crawl().await {
                Ok(crawled) => {
                    info!("crawl yielded {} urls", crawled.len());
                    all.extend(crawled);
                }
                Err(err) if all.is_empty() => return Err(err),
                Err(err) => warn!("crawl supplement failed ({err})"),
            }
        }

        let urls: Vec<String> = all
            .into_iter()
            .filter(|u| self.is_content_url(u))
            .collect();
        if urls.is_empty() {
            return Err(Error::Discovery(format!(
                "no content urls reachable from {}",
                self.base_url
            )));
        }
        info!("discovered {} content urls", urls.len());
        Ok(urls)
    }

    /// Fetch and flatten the sitemap, following nested sitemap indexes.
    pub async fn sitemap_urls(&self) -> Result<Vec<String>> {
        let mut pending = VecDeque::from([self.sitemap_url.clone()]);
        let mut seen: HashSet<String> = HashSet::new();
        let mut urls = Vec::new();

        // Nested indexes are bounded to avoid cycles between sitemaps.
        while let Some(sitemap) = pending.pop_front() {
            if !seen.insert(sitemap.clone()) || seen.len() > 32 {
                continue;
            }
            let body = self.fetch_ok(&sitemap).await?;
            let nested = SITEMAP_TAG_RE.is_match(&body);
            for cap in LOC_RE.captures_iter(&body) {
                let loc = cap[1].trim().to_string();
                if nested && loc.ends_with(".xml") {
                    pending.push_back(loc);
                } else if self.is_content_url(&loc) {
                    urls.push(loc);
                }
            }
        }
        Ok(urls)
    }

    /// Breadth-first crawl from the base URL, bounded by `max_pages`.
    pub async fn crawl(&self) -> Result<Vec<String>> {
        let root = self.base_url.clone();
        let mut visited: HashSet<String> = HashSet::new();
        let mut found: BTreeSet<String> = BTreeSet::new();
        let mut queue = VecDeque::from([root.clone()]);
        let mut root_reachable = false;

        while let Some(current) = queue.pop_front() {
            if found.len() >= self.max_pages || !visited.insert(current.clone()) {
                continue;
            }
            let body = match self.fetch_ok(&current).await {
                Ok(body) => {
                    root_reachable = true;
                    body
                }
                Err(err) if current == root => {
                    return Err(Error::Discovery(format!("site root unreachable: {err}")));
                }
                Err(err) => {
                    warn!("skipping {current}: {err}");
                    continue;
                }
            };

            for link in extract_links(&body, &current) {
                if link.starts_with(&self.base_url)
                    && self.is_content_url(&link)
                    && found.insert(link.clone())
                {
                    queue.push_back(link);
                }
            }
        }

        if !root_reachable {
            return Err(Error::Discovery(format!("site root unreachable: {root}")));
        }
        Ok(found.into_iter().collect())
    }

    async fn fetch_ok(&self, url: &str) -> Result<String> {
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

    /// Whether a URL points at a content page we want to ingest.
    pub fn is_content_url(&self, url: &str) -> bool {
        if !url.starts_with(&self.base_url) {
            return false;
        }
        let lower = url.to_lowercase();
        if EXCLUDED_PATTERNS.iter().any(|p| lower.contains(p)) {
            return false;
        }
        if CONTENT_PATTERNS.iter().any(|p| url.contains(p)) {
            return true;
        }
        // No known content prefix: accept anything deeper than the bare root.
        Url::parse(url)
            .map(|u| u.path().trim_matches('/').split('/').any(|s| !s.is_empty()))
            .unwrap_or(false)
    }
}

/// Anchor hrefs resolved against the page URL.
fn extract_links(html: &str, page_url: &str) -> Vec<String> {
    static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .map(|mut u| {
            u.set_fragment(None);
            u.to_string().trim_end_matches('/').to_string()
        })
        .collect()
}
