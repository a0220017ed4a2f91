//! End-to-end ingestion run.
//!
//! Two independent bounded pools: URL workers fan out over discovery
//! results, and embedding batches queue behind a semaphore so slow
//! provider calls never hold a fetch slot. The vector store is the only
//! shared sink, reached solely through id-keyed upserts, so re-running
//! the pipeline converges instead of duplicating.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use bookrag_core::{CancelFlag, Error, PipelineConfig, Result, RetryPolicy};
use bookrag_crawl::{ContentExtractor, FetchThrottle, UrlDiscoverer};
use bookrag_embed::EmbeddingBackend;
use bookrag_ingest::{ChunkConfig, Chunker, ContentDocument};
use bookrag_store::{ChunkRecord, VectorStore};

use crate::report::{RunReport, RunStage};
use crate::validator::Validator;

/// What happened to one discovered URL.
enum UrlOutcome {
    Stored { chunks: usize },
    Skipped,
}

pub struct Pipeline {
    config: PipelineConfig,
    discoverer: UrlDiscoverer,
    extractor: ContentExtractor,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingBackend>,
    store: Arc<dyn VectorStore>,
    embed_slots: Arc<Semaphore>,
    cancel: CancelFlag,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        embedder: Arc<dyn EmbeddingBackend>,
        store: Arc<dyn VectorStore>,
        cancel: CancelFlag,
    ) -> Result<Self> {
        let retry = RetryPolicy::default();
        // One throttle for every request against the source host, shared
        // by discovery and extraction.
        let throttle = Arc::new(FetchThrottle::new(config.rate_limit_delay));
        Ok(Self {
            discoverer: UrlDiscoverer::new(&config, throttle.clone())?,
            extractor: ContentExtractor::new(&config, retry, throttle)?,
            chunker: Chunker::new(ChunkConfig::from(&config)),
            embed_slots: Arc::new(Semaphore::new(config.embed_concurrency.max(1))),
            embedder,
            store,
            cancel,
            config,
        })
    }

    /// Run discovery through validation. Per-URL failures accumulate in
    /// the report; only fatal errors (auth, schema, config, unreachable
    /// site, cancellation) abort with `Err`.
    pub async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::new();

        let urls = self.discoverer.discover().await?;
        report.urls_discovered = urls.len();

        self.store
            .ensure_collection(self.embedder.dimension())
            .await?;

        report.stage = RunStage::Ingesting;
        let mut outcomes = stream::iter(urls)
            .map(|url| async move {
                let outcome = self.process_url(&url).await;
                (url, outcome)
            })
            .buffer_unordered(self.config.crawl_concurrency.max(1));

        while let Some((url, outcome)) = outcomes.next().await {
            match outcome {
                Ok(UrlOutcome::Stored { chunks }) => {
                    report.documents_stored += 1;
                    report.chunks_stored += chunks;
                }
                Ok(UrlOutcome::Skipped) => {
                    report.documents_skipped += 1;
                }
                Err(err) if err.is_fatal() || matches!(err, Error::Cancelled) => {
                    report.finish(RunStage::Failed);
                    return Err(err);
                }
                Err(err) => {
                    warn!("dropping {url}: {err}");
                    report.record_failure(url, err.failure_kind(), err.to_string());
                }
            }
        }
        drop(outcomes);

        report.stage = RunStage::Validating;
        if report.documents_stored + report.documents_skipped > 0 {
            let validator = Validator::new(self.embedder.clone(), self.store.clone());
            match validator.validate(&[]).await {
                Ok(summary) => report.validation = Some(summary),
                Err(err) if err.is_fatal() => {
                    report.finish(RunStage::Failed);
                    return Err(err);
                }
                Err(err) => warn!("validation did not complete: {err}"),
            }
        }

        report.finish(RunStage::Done);
        info!(
            "run done: {} stored, {} skipped, {} failed, {} chunks",
            report.documents_stored,
            report.documents_skipped,
            report.failures.len(),
            report.chunks_stored
        );
        Ok(report)
    }

    async fn process_url(&self, url: &str) -> Result<UrlOutcome> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let doc = self.extractor.extract(url).await?;
        let chunks = self.chunker.chunk_document(&doc);
        if chunks.is_empty() {
            return Err(Error::EmptyExtraction(url.to_string()));
        }

        // A matching hash alone is not proof of completeness: an earlier
        // run may have failed or been cancelled between batches. Skip only
        // when every chunk of the document is already present.
        match self.store.document_hash(&doc.id).await? {
            Some(stored) if stored == doc.content_hash => {
                let present = self.store.count_document(&doc.id).await?;
                if present == chunks.len() as u64 {
                    debug!("unchanged, skipping {url}");
                    return Ok(UrlOutcome::Skipped);
                }
                debug!(
                    "incomplete ({present}/{} chunks), rewriting {url}",
                    chunks.len()
                );
                self.store.delete_document(&doc.id).await?;
            }
            Some(_) => {
                debug!("content changed, replacing {url}");
                self.store.delete_document(&doc.id).await?;
            }
            None => {}
        }

        let stored = self.embed_and_store(&doc, &chunks).await?;
        Ok(UrlOutcome::Stored { chunks: stored })
    }

    /// Embed and upsert one document's chunks, batch by batch. A batch is
    /// stored completely or not at all; a failed batch fails the document.
    async fn embed_and_store(
        &self,
        doc: &ContentDocument,
        chunks: &[bookrag_ingest::Chunk],
    ) -> Result<usize> {
        let mut stored = 0;
        for batch in chunks.chunks(self.config.embed_batch_size.max(1)) {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let permit = self
                .embed_slots
                .acquire()
                .await
                .map_err(|_| Error::Cancelled)?;

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            drop(permit);

            let records: Vec<ChunkRecord> = batch
                .iter()
                .map(|chunk| {
                    ChunkRecord::from_chunk(chunk, &doc.content_hash, self.embedder.model())
                })
                .collect();
            self.store.upsert_chunks(&records, &vectors).await?;
            stored += records.len();
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookrag_embed::DeterministicEmbedder;
    use bookrag_store::{MemoryStore, VectorStore};
    use httpmock::prelude::*;

    fn page(title: &str, body: &str) -> String {
        format!(
            r#"<html><head><title>{title}</title></head><body><main>
                <h1>{title}</h1>
                <p>{body}</p>
            </main></body></html>"#
        )
    }

    async fn mock_site<'a>(server: &'a MockServer, lesson_two_body: &str) -> httpmock::Mock<'a> {
        let base = server.base_url();
        let sitemap = format!(
            r#"<urlset>
  <url><loc>{base}/docs/lesson-1</loc></url>
  <url><loc>{base}/docs/lesson-2</loc></url>
</urlset>"#
        );
        server
            .mock_async(move |when, then| {
                when.method(GET).path("/sitemap.xml");
                then.status(200).body(&sitemap);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/docs/lesson-1");
                then.status(200).body(page(
                    "Lesson 1",
                    "Humanoid robots combine perception and actuation into one control loop.",
                ));
            })
            .await;
        let two = page("Lesson 2", lesson_two_body);
        server
            .mock_async(move |when, then| {
                when.method(GET).path("/docs/lesson-2");
                then.status(200).body(&two);
            })
            .await
    }

    fn pipeline(
        server: &MockServer,
        store: Arc<MemoryStore>,
        cancel: CancelFlag,
    ) -> Pipeline {
        let mut config = PipelineConfig::for_tests();
        config.target_base_url = server.base_url();
        config.sitemap_url = format!("{}/sitemap.xml", server.base_url());
        config.embed_batch_size = 4;
        let embedder = Arc::new(DeterministicEmbedder::new(16));
        Pipeline::new(config, embedder, store, cancel).unwrap()
    }

    #[tokio::test]
    async fn ingests_discovered_pages_and_validates() {
        let server = MockServer::start_async().await;
        mock_site(
            &server,
            "Inverse kinematics turns desired foot placement into joint angles.",
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        let report = pipeline(&server, store.clone(), CancelFlag::new())
            .run()
            .await
            .unwrap();

        assert_eq!(report.stage, RunStage::Done);
        assert_eq!(report.urls_discovered, 2);
        assert_eq!(report.documents_stored, 2);
        assert_eq!(report.failures.len(), 0);
        assert!(report.validation.as_ref().unwrap().passed);
        assert!(report.is_success());
        assert_eq!(store.count().await.unwrap() as usize, report.chunks_stored);
    }

    #[tokio::test]
    async fn rerun_skips_unchanged_documents() {
        let server = MockServer::start_async().await;
        mock_site(
            &server,
            "Inverse kinematics turns desired foot placement into joint angles.",
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        let p = pipeline(&server, store.clone(), CancelFlag::new());
        let first = p.run().await.unwrap();
        let count_after_first = store.count().await.unwrap();

        let second = p.run().await.unwrap();
        assert_eq!(second.documents_stored, 0);
        assert_eq!(second.documents_skipped, 2);
        assert_eq!(store.count().await.unwrap(), count_after_first);
        assert_eq!(first.chunks_stored, count_after_first as usize);
    }

    #[tokio::test]
    async fn edited_page_is_replaced_without_duplicates() {
        let server = MockServer::start_async().await;
        let mut lesson_two = mock_site(
            &server,
            "Inverse kinematics turns desired foot placement into joint angles.",
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        pipeline(&server, store.clone(), CancelFlag::new())
            .run()
            .await
            .unwrap();
        let before = store.count().await.unwrap();

        // Document ids are URL-derived, so serving an edited body at the
        // same URL must replace the stored chunks in place.
        lesson_two.delete_async().await;
        let edited = page(
            "Lesson 2",
            "An edited lesson now covers whole-body control and balance recovery.",
        );
        server
            .mock_async(move |when, then| {
                when.method(GET).path("/docs/lesson-2");
                then.status(200).body(&edited);
            })
            .await;

        let report = pipeline(&server, store.clone(), CancelFlag::new())
            .run()
            .await
            .unwrap();
        assert_eq!(report.documents_stored, 1);
        assert_eq!(report.documents_skipped, 1);
        assert_eq!(store.count().await.unwrap(), before);

        let sample = store.sample(10).await.unwrap();
        assert!(sample
            .iter()
            .any(|r| r.content.contains("whole-body control")));
    }

    #[tokio::test]
    async fn broken_page_is_reported_not_fatal() {
        let server = MockServer::start_async().await;
        let base = server.base_url();
        let sitemap = format!(
            r#"<urlset>
  <url><loc>{base}/docs/lesson-1</loc></url>
  <url><loc>{base}/docs/missing</loc></url>
</urlset>"#
        );
        server
            .mock_async(move |when, then| {
                when.method(GET).path("/sitemap.xml");
                then.status(200).body(&sitemap);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/docs/lesson-1");
                then.status(200).body(page(
                    "Lesson 1",
                    "Humanoid robots combine perception and actuation into one control loop.",
                ));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/docs/missing");
                then.status(404);
            })
            .await;

        let store = Arc::new(MemoryStore::new());
        let report = pipeline(&server, store, CancelFlag::new())
            .run()
            .await
            .unwrap();
        assert_eq!(report.stage, RunStage::Done);
        assert_eq!(report.documents_stored, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_success());
    }

    /// Delegates to a deterministic backend but fails one chosen call,
    /// leaving a document partially stored.
    struct FlakyEmbedder {
        inner: DeterministicEmbedder,
        calls: std::sync::atomic::AtomicU32,
        failing_call: u32,
    }

    impl FlakyEmbedder {
        fn new(dimension: usize, failing_call: u32) -> Self {
            Self {
                inner: DeterministicEmbedder::new(dimension),
                calls: std::sync::atomic::AtomicU32::new(0),
                failing_call,
            }
        }
    }

    #[async_trait::async_trait]
    impl bookrag_embed::EmbeddingBackend for FlakyEmbedder {
        async fn embed(&self, texts: &[String]) -> bookrag_core::Result<Vec<Vec<f32>>> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                + 1;
            if call == self.failing_call {
                return Err(Error::Embedding("provider unavailable".into()));
            }
            self.inner.embed(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn model(&self) -> &str {
            self.inner.model()
        }
    }

    #[tokio::test]
    async fn partially_stored_document_is_completed_on_rerun() {
        let server = MockServer::start_async().await;
        let base = server.base_url();
        let sitemap =
            format!("<urlset><url><loc>{base}/docs/long-lesson</loc></url></urlset>");
        server
            .mock_async(move |when, then| {
                when.method(GET).path("/sitemap.xml");
                then.status(200).body(&sitemap);
            })
            .await;
        let body: String = (0..40)
            .map(|i| format!("robotword{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let lesson = page("Long Lesson", &body);
        server
            .mock_async(move |when, then| {
                when.method(GET).path("/docs/long-lesson");
                then.status(200).body(&lesson);
            })
            .await;

        let mut config = PipelineConfig::for_tests();
        config.target_base_url = server.base_url();
        config.sitemap_url = format!("{}/sitemap.xml", server.base_url());
        config.chunk_size = 8;
        config.embed_batch_size = 4;

        // Second embed call fails: batch one of the document lands, batch
        // two does not.
        let embedder = Arc::new(FlakyEmbedder::new(16, 2));
        let store = Arc::new(MemoryStore::new());
        let p = Pipeline::new(config, embedder, store.clone(), CancelFlag::new()).unwrap();

        let first = p.run().await.unwrap();
        assert_eq!(first.documents_stored, 0);
        assert_eq!(first.failures.len(), 1);
        let partial = store.count().await.unwrap();
        assert!(partial > 0, "first batch should have been stored");

        // The hash already matches, but the document is incomplete: the
        // re-run must rewrite it rather than skip it.
        let second = p.run().await.unwrap();
        assert_eq!(second.documents_skipped, 0);
        assert_eq!(second.documents_stored, 1);
        let full = store.count().await.unwrap();
        assert!(full > partial);
        assert_eq!(full as usize, second.chunks_stored);

        // Once complete, further runs skip it.
        let third = p.run().await.unwrap();
        assert_eq!(third.documents_skipped, 1);
        assert_eq!(store.count().await.unwrap(), full);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_run() {
        let server = MockServer::start_async().await;
        mock_site(
            &server,
            "Inverse kinematics turns desired foot placement into joint angles.",
        )
        .await;

        let cancel = CancelFlag::new();
        cancel.cancel();
        let store = Arc::new(MemoryStore::new());
        let err = pipeline(&server, store, cancel).run().await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
