//! Learning bit extraction: chunk, classify, score, tag, hash, filter.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use learnbits_shared::{
    AppConfig, Category, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MIN_INFORMATIVENESS, LearnBitsError,
    LearningBit, Result, ScoringConfig, content_hash,
};

use crate::chunker::Chunker;
use crate::classifier::Classifier;
use crate::tags::Tagger;

/// Runtime settings for [`LearningBitExtractor`].
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub max_chunk_size: usize,
    /// Chunks classified below this confidence are discarded.
    pub min_informativeness: f64,
    pub max_tags: usize,
    pub extra_keywords: Vec<String>,
    pub scoring: ScoringConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            min_informativeness: DEFAULT_MIN_INFORMATIVENESS,
            max_tags: 8,
            extra_keywords: Vec::new(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl From<&AppConfig> for ExtractorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_chunk_size: config.pipeline.max_chunk_size,
            min_informativeness: config.pipeline.min_informativeness,
            max_tags: config.pipeline.max_tags,
            extra_keywords: config.pipeline.extra_keywords.clone(),
            scoring: config.scoring.clone(),
        }
    }
}

/// Turns normalized document text into learning bits.
#[derive(Debug, Clone)]
pub struct LearningBitExtractor {
    chunker: Chunker,
    classifier: Classifier,
    tagger: Tagger,
    min_informativeness: f64,
    scoring: ScoringConfig,
}

impl LearningBitExtractor {
    /// Build an extractor, rejecting out-of-range thresholds and weights.
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let chunker = Chunker::new(config.max_chunk_size)?;

        if !(0.0..=1.0).contains(&config.min_informativeness) {
            return Err(LearnBitsError::invalid_config(format!(
                "min_informativeness must be within [0, 1], got {}",
                config.min_informativeness
            )));
        }
        let s = &config.scoring;
        if [s.confidence_weight, s.length_weight, s.category_weight]
            .iter()
            .chain(s.category_weights.values())
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(LearnBitsError::invalid_config(
                "scoring weights must be non-negative",
            ));
        }
        if s.ideal_length == 0 {
            return Err(LearnBitsError::invalid_config(
                "ideal_length must be positive",
            ));
        }

        Ok(Self {
            chunker,
            classifier: Classifier::new(),
            tagger: Tagger::new(&config.extra_keywords, config.max_tags),
            min_informativeness: config.min_informativeness,
            scoring: config.scoring,
        })
    }

    /// Importance in `[0, 1]` from confidence, length and category priority.
    pub fn importance(&self, category: Category, confidence: f64, chars: usize) -> f64 {
        let s = &self.scoring;
        let length = (chars as f64 / s.ideal_length as f64).min(1.0);
        let score = s.confidence_weight * confidence
            + s.length_weight * length
            + s.category_weight * s.weight_for(category);
        score.clamp(0.0, 1.0)
    }

    /// Extract bits from `text` in chunk order.
    ///
    /// Cancellation is checked before each chunk. Bits have an empty `id`
    /// and `title`; the store and pipeline fill those in.
    #[instrument(skip_all, fields(source_url = %source_url, crawl_sequence = crawl_sequence))]
    pub async fn extract(
        &self,
        text: &str,
        source_url: &str,
        crawl_sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<LearningBit>> {
        let chunks = self.chunker.split(text);
        let mut bits = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            if cancel.is_cancelled() {
                return Err(LearnBitsError::Cancelled);
            }

            let content = chunk.content();
            let classification = self.classifier.classify(content, source_url);
            if classification.confidence < self.min_informativeness {
                debug!(
                    chunk = chunk.index,
                    category = %classification.category,
                    confidence = classification.confidence,
                    "chunk below informativeness threshold"
                );
                continue;
            }

            let importance = self.importance(
                classification.category,
                classification.confidence,
                content.chars().count(),
            );
            debug!(
                chunk = chunk.index,
                category = %classification.category,
                subcategory = %classification.subcategory,
                confidence = classification.confidence,
                importance,
                "chunk classified"
            );

            bits.push(LearningBit {
                id: String::new(),
                source_url: source_url.to_string(),
                title: String::new(),
                chunk_index: chunk.index,
                crawl_sequence,
                content: content.to_string(),
                content_hash: content_hash(content, classification.category),
                content_type: classification.content_type,
                category: classification.category,
                subcategory: classification.subcategory,
                importance_score: importance,
                confidence_score: classification.confidence,
                tags: self.tagger.tags(content),
                created_at: Utc::now(),
            });
        }

        Ok(bits)
    }
}
