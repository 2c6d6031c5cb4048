//! End-to-end ingestion: raw content → text → bits → store.
//!
//! The [`Pipeline`] owns no I/O besides the store handle it is given.
//! Remote documents come in through a [`ContentFetcher`].

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use learnbits_shared::{
    AnalysisScope, AppConfig, BitFilter, LearnBitsError, LearningBit, Pattern, PatternFilter,
    Result,
};
use learnbits_storage::{InsertOutcome, PatternStore};

use crate::analyzer::{AnalyzerConfig, PatternAnalyzer};
use crate::extractor::{ExtractorConfig, LearningBitExtractor};
use crate::fetch::ContentFetcher;

/// Summary of one `ingest` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source_url: String,
    pub title: String,
    /// Per-URL crawl number assigned by the store.
    pub crawl_sequence: u64,
    /// Bits that passed the informativeness threshold.
    pub bits_extracted: usize,
    /// Bits that were not already stored.
    pub bits_new: usize,
}

/// One document for [`Pipeline::ingest_batch`].
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub source_url: String,
    pub content: String,
}

impl SourceDocument {
    pub fn new(source_url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            content: content.into(),
        }
    }
}

/// Ingestion and query entry point. Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<PatternStore>,
    extractor: Arc<LearningBitExtractor>,
    analyzer: Arc<PatternAnalyzer>,
    concurrency: usize,
}

impl Pipeline {
    /// Build a pipeline over `store`, validating `config` first.
    pub fn new(store: Arc<PatternStore>, config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let extractor = LearningBitExtractor::new(ExtractorConfig::from(config))?;
        let analyzer = PatternAnalyzer::new(Arc::clone(&store), AnalyzerConfig::from(config))?;

        Ok(Self {
            store,
            extractor: Arc::new(extractor),
            analyzer: Arc::new(analyzer),
            concurrency: config.ingest.concurrency.max(1) as usize,
        })
    }

    pub fn store(&self) -> &Arc<PatternStore> {
        &self.store
    }

    /// Ingest one document.
    ///
    /// Opens a crawl record, extracts bits and inserts them in chunk order.
    /// On cancellation the bits inserted so far stay stored; re-ingesting is
    /// safe because inserts deduplicate on content hash.
    #[instrument(skip_all, fields(source_url = %source_url))]
    pub async fn ingest(
        &self,
        source_url: &str,
        raw_content: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        self.ingest_with(source_url, raw_content, cancel, |bit, outcome| {
            if !outcome.stored {
                debug!(id = %outcome.id, chunk = bit.chunk_index, "duplicate bit");
            }
        })
        .await
    }

    /// [`Pipeline::ingest`] with a hook called after every insert.
    async fn ingest_with<F>(
        &self,
        source_url: &str,
        raw_content: &str,
        cancel: &CancellationToken,
        mut on_insert: F,
    ) -> Result<IngestReport>
    where
        F: FnMut(&LearningBit, &InsertOutcome) + Send,
    {
        if cancel.is_cancelled() {
            return Err(LearnBitsError::Cancelled);
        }
        let start = Instant::now();

        let extracted = learnbits_markdown::extract(raw_content, source_url);
        if extracted.text.is_empty() {
            warn!("document has no text content");
        }

        let crawl = self.store.begin_crawl(source_url).await?;
        let bits = self
            .extractor
            .extract(&extracted.text, source_url, crawl.sequence, cancel)
            .await?;

        let mut bits_new = 0;
        for mut bit in bits.iter().cloned() {
            if cancel.is_cancelled() {
                return Err(LearnBitsError::Cancelled);
            }
            bit.title = extracted.title.clone();
            let outcome = self.store.insert(&bit).await?;
            if outcome.stored {
                bits_new += 1;
            }
            on_insert(&bit, &outcome);
        }

        let report = IngestReport {
            source_url: source_url.to_string(),
            title: extracted.title,
            crawl_sequence: crawl.sequence,
            bits_extracted: bits.len(),
            bits_new,
        };

        let stats = serde_json::json!({
            "words": extracted.word_count,
            "bits_extracted": report.bits_extracted,
            "bits_new": report.bits_new,
            "elapsed_ms": start.elapsed().as_millis() as u64,
        });
        self.store.finish_crawl(&crawl.id, &stats.to_string()).await?;

        info!(
            crawl_sequence = report.crawl_sequence,
            bits_extracted = report.bits_extracted,
            bits_new = report.bits_new,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "document ingested"
        );
        Ok(report)
    }

    /// Fetch `url` through `fetcher`, then ingest the body.
    pub async fn ingest_url(
        &self,
        url: &Url,
        fetcher: &dyn ContentFetcher,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(LearnBitsError::Cancelled),
            body = fetcher.fetch(url) => body?,
        };
        self.ingest(url.as_str(), &body, cancel).await
    }

    /// Ingest documents on a bounded worker pool.
    ///
    /// Results come back in input order; one failed document does not stop
    /// the others.
    #[instrument(skip_all, fields(documents = docs.len(), concurrency = self.concurrency))]
    pub async fn ingest_batch(
        &self,
        docs: Vec<SourceDocument>,
        cancel: &CancellationToken,
    ) -> Vec<Result<IngestReport>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(docs.len());

        for doc in docs {
            let pipeline = self.clone();
            let sem = Arc::clone(&semaphore);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|_| LearnBitsError::Cancelled)?;
                pipeline.ingest(&doc.source_url, &doc.content, &cancel).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(LearnBitsError::Storage(format!("ingest task failed: {e}"))),
            };
            if let Err(e) = &result {
                warn!(error = %e, "document failed");
            }
            results.push(result);
        }
        results
    }

    /// Stored bits matching `filter`, oldest first.
    pub async fn query_learning(&self, filter: &BitFilter) -> Result<Vec<LearningBit>> {
        self.store.query(filter).await?.collect_all().await
    }

    pub async fn query_patterns(&self, filter: &PatternFilter) -> Result<Vec<Pattern>> {
        self.store.query_patterns(filter).await
    }

    /// Re-mine the patterns of `scope`.
    pub async fn analyze(&self, scope: &AnalysisScope) -> Result<Vec<Pattern>> {
        self.analyzer.analyze(scope).await
    }
}
