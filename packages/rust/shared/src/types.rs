//! Core domain types: the content taxonomy, learning bits, patterns, crawls.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LearnBitsError;

// ---------------------------------------------------------------------------
// Taxonomy
// ---------------------------------------------------------------------------

/// Top-level content category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Code,
    ReferenceTable,
    Procedure,
    Definition,
    Concept,
    Uncategorized,
}

impl Category {
    /// All categories, in detector priority order (`Uncategorized` last).
    pub const ALL: [Category; 6] = [
        Category::Code,
        Category::ReferenceTable,
        Category::Procedure,
        Category::Definition,
        Category::Concept,
        Category::Uncategorized,
    ];

    /// Stable storage/wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::ReferenceTable => "reference-table",
            Self::Procedure => "procedure",
            Self::Definition => "definition",
            Self::Concept => "concept",
            Self::Uncategorized => "uncategorized",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = LearnBitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| LearnBitsError::Storage(format!("unknown category: {s}")))
    }
}

/// Finer-grained label; every subcategory belongs to exactly one [`Category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Subcategory {
    FencedBlock,
    InlineSnippet,
    MarkdownTable,
    KeyValue,
    NumberedSteps,
    ImperativeInstructions,
    TermDefinition,
    GlossaryEntry,
    Explanation,
    Overview,
    Unknown,
}

impl Subcategory {
    pub const ALL: [Subcategory; 11] = [
        Subcategory::FencedBlock,
        Subcategory::InlineSnippet,
        Subcategory::MarkdownTable,
        Subcategory::KeyValue,
        Subcategory::NumberedSteps,
        Subcategory::ImperativeInstructions,
        Subcategory::TermDefinition,
        Subcategory::GlossaryEntry,
        Subcategory::Explanation,
        Subcategory::Overview,
        Subcategory::Unknown,
    ];

    /// The category this subcategory belongs to.
    pub fn category(&self) -> Category {
        match self {
            Self::FencedBlock | Self::InlineSnippet => Category::Code,
            Self::MarkdownTable | Self::KeyValue => Category::ReferenceTable,
            Self::NumberedSteps | Self::ImperativeInstructions => Category::Procedure,
            Self::TermDefinition | Self::GlossaryEntry => Category::Definition,
            Self::Explanation | Self::Overview => Category::Concept,
            Self::Unknown => Category::Uncategorized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FencedBlock => "fenced-block",
            Self::InlineSnippet => "inline-snippet",
            Self::MarkdownTable => "markdown-table",
            Self::KeyValue => "key-value",
            Self::NumberedSteps => "numbered-steps",
            Self::ImperativeInstructions => "imperative-instructions",
            Self::TermDefinition => "term-definition",
            Self::GlossaryEntry => "glossary-entry",
            Self::Explanation => "explanation",
            Self::Overview => "overview",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Subcategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subcategory {
    type Err = LearnBitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subcategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| LearnBitsError::Storage(format!("unknown subcategory: {s}")))
    }
}

/// Dominant structural kind of a chunk's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Prose,
    Code,
    Table,
    List,
    Heading,
    Mixed,
}

impl ContentType {
    pub const ALL: [ContentType; 6] = [
        ContentType::Prose,
        ContentType::Code,
        ContentType::Table,
        ContentType::List,
        ContentType::Heading,
        ContentType::Mixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prose => "prose",
            Self::Code => "code",
            Self::Table => "table",
            Self::List => "list",
            Self::Heading => "heading",
            Self::Mixed => "mixed",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = LearnBitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| LearnBitsError::Storage(format!("unknown content type: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Hashing helpers
// ---------------------------------------------------------------------------

/// Collapse every run of whitespace into a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Dedup key for a learning bit: SHA-256 over the whitespace-collapsed
/// content and the category name.
pub fn content_hash(content: &str, category: Category) -> String {
    let mut hasher = Sha256::new();
    hasher.update(collapse_whitespace(content).as_bytes());
    hasher.update([0x1f]);
    hasher.update(category.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// LearningBit
// ---------------------------------------------------------------------------

/// A single classified, scored unit of extracted knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningBit {
    /// Store-assigned identifier (UUID v7). Empty until inserted.
    pub id: String,
    /// Originating document.
    pub source_url: String,
    /// Title of the originating document.
    #[serde(default)]
    pub title: String,
    /// Position within the document's chunk sequence.
    pub chunk_index: usize,
    /// Crawl sequence number the bit was extracted in.
    pub crawl_sequence: u64,
    /// Normalized, non-empty chunk text.
    pub content: String,
    /// See [`content_hash`].
    pub content_hash: String,
    pub content_type: ContentType,
    pub category: Category,
    pub subcategory: Subcategory,
    /// In `[0.0, 1.0]`.
    pub importance_score: f64,
    /// In `[0.0, 1.0]`.
    pub confidence_score: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Pattern
// ---------------------------------------------------------------------------

/// An aggregate insight supported by at least two learning bits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Deterministic id derived from the category and grouping tags.
    pub pattern_id: String,
    pub description: String,
    pub category: Category,
    /// Non-negative; grows with every supporting bit.
    pub strength: f64,
    pub supporting_bit_ids: BTreeSet<String>,
    /// Tags that define the group.
    pub tags: BTreeSet<String>,
    /// Scope key the pattern was computed under.
    pub scope_key: String,
    pub created_at: DateTime<Utc>,
}

impl Pattern {
    /// Compute the stable id for a `(category, tags)` group.
    pub fn id_for(category: Category, tags: &BTreeSet<String>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(category.as_str().as_bytes());
        for tag in tags {
            hasher.update([0x1f]);
            hasher.update(tag.as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        format!("pat-{}", &digest[..16])
    }
}

// ---------------------------------------------------------------------------
// Crawl bookkeeping
// ---------------------------------------------------------------------------

/// One end-to-end ingestion of a source URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRecord {
    pub id: String,
    pub source_url: String,
    /// Per-URL sequence number, starting at 1.
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_json: Option<String>,
}

// ---------------------------------------------------------------------------
// Filters and scopes
// ---------------------------------------------------------------------------

/// Filter for learning bit queries. All fields are conjunctive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BitFilter {
    pub category: Option<Category>,
    pub tag: Option<String>,
    pub source_url: Option<String>,
    pub limit: Option<u32>,
}

/// Filter for pattern queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternFilter {
    pub category: Option<Category>,
    pub tag: Option<String>,
    pub min_strength: Option<f64>,
    pub scope_key: Option<String>,
}

/// The slice of the store a pattern analysis runs over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisScope {
    pub category: Option<Category>,
    pub source_url: Option<String>,
}

impl AnalysisScope {
    /// Canonical key used to replace a scope's patterns on re-analysis.
    pub fn scope_key(&self) -> String {
        format!(
            "category={};source={}",
            self.category.map(|c| c.as_str()).unwrap_or("*"),
            self.source_url.as_deref().unwrap_or("*")
        )
    }

    /// The equivalent bit filter (no tag, no limit).
    pub fn to_filter(&self) -> BitFilter {
        BitFilter {
            category: self.category,
            tag: None,
            source_url: self.source_url.clone(),
            limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_roundtrip() {
        for cat in Category::ALL {
            let parsed: Category = cat.as_str().parse().expect("parse category");
            assert_eq!(parsed, cat);
        }
        assert!("nonsense".parse::<Category>().is_err());
    }

    #[test]
    fn category_serializes_kebab_case() {
        let json = serde_json::to_string(&Category::ReferenceTable).unwrap();
        assert_eq!(json, r#""reference-table""#);
    }

    #[test]
    fn every_category_has_a_subcategory() {
        for cat in Category::ALL {
            assert!(
                Subcategory::ALL.iter().any(|s| s.category() == cat),
                "no subcategory for {cat}"
            );
        }
    }

    #[test]
    fn content_hash_ignores_whitespace_layout() {
        let a = content_hash("fn main() {\n    run();\n}", Category::Code);
        let b = content_hash("fn main() {   run(); }", Category::Code);
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_depends_on_category() {
        let a = content_hash("same text", Category::Concept);
        let b = content_hash("same text", Category::Definition);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn pattern_id_is_stable() {
        let tags: BTreeSet<String> = ["rust", "async"].iter().map(|s| s.to_string()).collect();
        let a = Pattern::id_for(Category::Code, &tags);
        let b = Pattern::id_for(Category::Code, &tags);
        assert_eq!(a, b);
        assert!(a.starts_with("pat-"));
        assert_ne!(a, Pattern::id_for(Category::Concept, &tags));
    }

    #[test]
    fn scope_key_formatting() {
        assert_eq!(AnalysisScope::default().scope_key(), "category=*;source=*");
        let scope = AnalysisScope {
            category: Some(Category::Procedure),
            source_url: Some("https://example.com/a".into()),
        };
        assert_eq!(
            scope.scope_key(),
            "category=procedure;source=https://example.com/a"
        );
    }
}
