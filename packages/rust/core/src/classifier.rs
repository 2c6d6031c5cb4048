//! Heuristic taxonomy classification of a single chunk.
//!
//! Signals are computed once per chunk ([`ChunkFeatures`]) and scored by a
//! fixed list of [`Detector`]s. The highest confidence wins; ties go to the
//! detector that comes first in priority order.

use std::sync::LazyLock;

use learnbits_shared::{Category, ContentType, Subcategory};
use regex::Regex;

/// Detectors scoring below this are ignored.
pub const MIN_DETECTOR_CONFIDENCE: f64 = 0.25;

/// Confidence reported for `uncategorized/unknown`.
pub const UNCATEGORIZED_CONFIDENCE: f64 = 0.1;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(```|~~~)\s*([\w+#.-]*)").expect("valid regex"));

static CODE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        ^\s*(?:def|fn|pub|let|const|var|function|class|import|from|use|return|struct|impl|enum|
             package|func|async|await|public|private|static|\#include|SELECT|INSERT|CREATE)\b.*[(){};:=<>]
        | [;{}]\s*$
        | =>|::|\)\s*->
        | ^\s*\$\s+\S
        | ^\s*[A-Za-z_][\w.]*\s*(?:=|\+=|-=)\s*[^=\s]
        | ^\s*[A-Za-z_][\w.:]*\(.*\)\s*;?\s*$
        "#,
    )
    .expect("valid regex")
});

static CODE_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:def|fn|let|const|var|function|class|import|return|struct|impl|enum|async|await|print|println!|console\.log|self|None|null|true|false)\b|\w\(",
    )
    .expect("valid regex")
});

static INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`\n]+`").expect("valid regex"));

static TABLE_SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\|?\s*:?-{3,}:?\s*(\|\s*:?-{3,}:?\s*)*\|?\s*$").expect("valid regex"));

static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]\s+)?`?[A-Za-z_][\w.-]*`?\s*[:=]\s+(\S.*)$").expect("valid regex")
});

static GLOSSARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]\s+)?(?:\*\*[^*]{1,60}\*\*|[A-Z][\w ()-]{0,40})\s*(?::|\s-\s|\s–\s|\s—\s)\s*(\S.*)$")
        .expect("valid regex")
});

static LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d{1,3}[.)])\s+").expect("valid regex"));

static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\d{1,3}[.)]|Step\s+\d+:?)\s+").expect("valid regex"));

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#{1,6}\s+(.*)$").expect("valid regex"));

static DEFINITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:is|are)\s+(?:a|an|the)\b|\brefers?\s+to\b|\bis\s+defined\s+as\b|\bmeans\b|\bdenotes\b|\bstands\s+for\b")
        .expect("valid regex")
});

static TERM_LEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\*\*[^*]+\*\*|`[^`]+`|[A-Z][\w-]*(?:\s+[\w-]+){0,3})\s+(?:is|are|refers?\s+to|means|denotes)\b")
        .expect("valid regex")
});

static OVERVIEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:overview|introduction|summary|about|this (?:guide|section|document|page|chapter))\b")
        .expect("valid regex")
});

static REFERENCE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/(?:api|reference|ref|references|spec|docs\.rs)(?:/|$|[.#?-])").expect("valid regex")
});

static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?](?:\s|$)").expect("valid regex"));

/// Verbs that open an instruction.
const IMPERATIVE_VERBS: &[&str] = &[
    "add", "build", "call", "change", "check", "choose", "click", "clone", "configure", "copy",
    "create", "define", "delete", "deploy", "disable", "download", "edit", "enable", "ensure",
    "enter", "execute", "install", "launch", "make", "navigate", "open", "paste", "press",
    "remove", "replace", "restart", "run", "save", "select", "set", "start", "stop", "type",
    "update", "upgrade", "use", "verify", "wait", "write",
];

/// Structural signals extracted from one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFeatures {
    pub non_blank_lines: usize,
    pub heading_lines: usize,
    pub first_heading: Option<String>,
    pub fenced_blocks: usize,
    pub fence_languages: Vec<String>,
    pub fenced_lines: usize,
    /// Lines outside fences that look like source code.
    pub code_lines: usize,
    pub code_keyword_hits: usize,
    pub inline_code_spans: usize,
    pub table_rows: usize,
    pub table_separator: bool,
    pub key_value_lines: usize,
    pub glossary_lines: usize,
    pub list_lines: usize,
    pub numbered_lines: usize,
    pub imperative_sentences: usize,
    pub definition_hits: usize,
    pub leads_with_term: bool,
    pub overview_hint: bool,
    pub prose_lines: usize,
    pub word_count: usize,
    pub sentence_count: usize,
    pub reference_url: bool,
}

impl ChunkFeatures {
    /// Compute every signal for `text` in a single pass over its lines.
    pub fn compute(text: &str, source_url: &str) -> Self {
        let mut f = ChunkFeatures {
            reference_url: REFERENCE_URL_RE.is_match(source_url),
            ..Default::default()
        };

        let mut in_fence = false;
        let mut prose = String::new();

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            f.non_blank_lines += 1;

            if let Some(caps) = FENCE_RE.captures(line) {
                if in_fence {
                    in_fence = false;
                } else {
                    in_fence = true;
                    f.fenced_blocks += 1;
                    let lang = caps[2].to_lowercase();
                    if !lang.is_empty() && !f.fence_languages.contains(&lang) {
                        f.fence_languages.push(lang);
                    }
                }
                f.fenced_lines += 1;
                continue;
            }
            if in_fence {
                f.fenced_lines += 1;
                continue;
            }

            if let Some(caps) = HEADING_RE.captures(line) {
                f.heading_lines += 1;
                if f.first_heading.is_none() {
                    f.first_heading = Some(caps[1].trim().to_string());
                }
                continue;
            }

            if trimmed.starts_with('|') {
                if TABLE_SEPARATOR_RE.is_match(trimmed) {
                    f.table_separator = true;
                } else {
                    f.table_rows += 1;
                }
                continue;
            }

            f.inline_code_spans += INLINE_CODE_RE.find_iter(line).count();

            let is_list = LIST_RE.is_match(line);
            if is_list {
                f.list_lines += 1;
            }
            if NUMBERED_RE.is_match(line) {
                f.numbered_lines += 1;
            }

            if CODE_LINE_RE.is_match(line) {
                f.code_lines += 1;
                f.code_keyword_hits += CODE_KEYWORD_RE.find_iter(line).count();
                continue;
            }

            if let Some(caps) = KEY_VALUE_RE.captures(line) {
                if caps[1].split_whitespace().count() <= 6 {
                    f.key_value_lines += 1;
                    continue;
                }
            }
            if let Some(caps) = GLOSSARY_RE.captures(line) {
                if caps[1].split_whitespace().count() >= 4 {
                    f.glossary_lines += 1;
                }
            }

            if !is_list {
                f.prose_lines += 1;
            }
            let body = LIST_RE.replace(trimmed, "");
            if !prose.is_empty() {
                prose.push(' ');
            }
            prose.push_str(&body);
            if !body.trim_end().ends_with(['.', '!', '?']) {
                // A line without terminal punctuation still ends a sentence.
                prose.push('.');
            }
        }

        f.word_count = prose
            .split_whitespace()
            .filter(|w| w.chars().any(char::is_alphanumeric))
            .count();

        let sentences: Vec<&str> = SENTENCE_END_RE
            .split(&prose)
            .map(str::trim)
            .filter(|s| s.chars().any(char::is_alphanumeric))
            .collect();
        f.sentence_count = sentences.len();
        f.imperative_sentences = sentences.iter().filter(|s| starts_imperative(s)).count();
        f.definition_hits = DEFINITION_RE.find_iter(&prose).count();
        f.leads_with_term = sentences.first().is_some_and(|s| TERM_LEAD_RE.is_match(s));
        f.overview_hint = f
            .first_heading
            .as_deref()
            .is_some_and(|h| OVERVIEW_RE.is_match(h))
            || sentences.first().is_some_and(|s| OVERVIEW_RE.is_match(s));

        f
    }

    /// Dominant structural kind of the chunk.
    pub fn content_type(&self) -> ContentType {
        if self.non_blank_lines == 0 {
            return ContentType::Prose;
        }
        let candidates = [
            (ContentType::Code, self.fenced_lines + self.code_lines),
            (ContentType::Table, self.table_rows + usize::from(self.table_separator)),
            (ContentType::List, self.list_lines),
            (ContentType::Prose, self.prose_lines),
        ];
        let body_lines = self.non_blank_lines - self.heading_lines;
        if body_lines == 0 {
            return ContentType::Heading;
        }
        for (kind, count) in candidates {
            if count * 10 >= body_lines * 6 {
                return kind;
            }
        }
        ContentType::Mixed
    }
}

fn starts_imperative(sentence: &str) -> bool {
    let first = sentence
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or_default()
        .to_lowercase();
    IMPERATIVE_VERBS.binary_search(&first.as_str()).is_ok()
}

/// Saturating map of a non-negative signal into `[0, 1)`.
fn saturate(x: f64, scale: f64) -> f64 {
    if x <= 0.0 {
        0.0
    } else {
        1.0 - (-x / scale).exp()
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

/// Category detectors, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detector {
    Code,
    ReferenceTable,
    Procedure,
    Definition,
    Concept,
}

impl Detector {
    pub const PRIORITY: [Detector; 5] = [
        Detector::Code,
        Detector::ReferenceTable,
        Detector::Procedure,
        Detector::Definition,
        Detector::Concept,
    ];

    /// Score the features, returning the best subcategory and its confidence.
    pub fn score(&self, f: &ChunkFeatures) -> Option<(Subcategory, f64)> {
        let scored = match self {
            Detector::Code => Self::score_code(f),
            Detector::ReferenceTable => Self::score_reference(f),
            Detector::Procedure => Self::score_procedure(f),
            Detector::Definition => Self::score_definition(f),
            Detector::Concept => Self::score_concept(f),
        };
        scored.map(|(sub, conf)| (sub, conf.clamp(0.0, 1.0)))
    }

    fn score_code(f: &ChunkFeatures) -> Option<(Subcategory, f64)> {
        if f.fenced_blocks > 0 {
            let coverage = ratio(f.fenced_lines + f.code_lines, f.non_blank_lines - f.heading_lines);
            return Some((Subcategory::FencedBlock, 0.55 + 0.45 * coverage));
        }
        if f.code_lines == 0 {
            return None;
        }
        let body = f.non_blank_lines - f.heading_lines;
        let conf = 0.5 * ratio(f.code_lines, body)
            + 0.35 * saturate(f.code_keyword_hits as f64, 2.0)
            + 0.15 * saturate(f.inline_code_spans as f64, 3.0);
        Some((Subcategory::InlineSnippet, conf))
    }

    fn score_reference(f: &ChunkFeatures) -> Option<(Subcategory, f64)> {
        let boost = if f.reference_url { 0.1 } else { 0.0 };
        if f.table_rows >= 2 {
            let conf = 0.5
                + if f.table_separator { 0.1 } else { 0.0 }
                + 0.3 * saturate((f.table_rows - 1) as f64, 3.0)
                + boost;
            return Some((Subcategory::MarkdownTable, conf));
        }
        if f.key_value_lines >= 2 {
            let body = f.non_blank_lines - f.heading_lines;
            let conf = 0.2 + 0.55 * ratio(f.key_value_lines, body) + boost;
            return Some((Subcategory::KeyValue, conf));
        }
        None
    }

    fn score_procedure(f: &ChunkFeatures) -> Option<(Subcategory, f64)> {
        let imperative = ratio(f.imperative_sentences, f.sentence_count);
        if f.numbered_lines >= 2 {
            let conf = 0.45 + 0.3 * saturate((f.numbered_lines - 1) as f64, 2.0) + 0.25 * imperative;
            return Some((Subcategory::NumberedSteps, conf));
        }
        if f.imperative_sentences >= 2 {
            let conf = 0.15 + 0.6 * imperative + 0.1 * saturate(f.list_lines as f64, 2.0);
            return Some((Subcategory::ImperativeInstructions, conf));
        }
        None
    }

    fn score_definition(f: &ChunkFeatures) -> Option<(Subcategory, f64)> {
        if f.glossary_lines > 0 {
            let body = f.non_blank_lines - f.heading_lines;
            let conf = 0.35
                + 0.4 * ratio(f.glossary_lines, body)
                + 0.15 * saturate(f.glossary_lines as f64, 2.0);
            return Some((Subcategory::GlossaryEntry, conf));
        }
        if f.definition_hits == 0 || !f.leads_with_term {
            return None;
        }
        let brevity = match f.sentence_count {
            0..=2 => 0.3,
            3 => 0.15,
            _ => 0.0,
        };
        let conf = 0.3 + brevity + 0.15 * saturate(f.definition_hits as f64, 1.0);
        Some((Subcategory::TermDefinition, conf))
    }

    fn score_concept(f: &ChunkFeatures) -> Option<(Subcategory, f64)> {
        if f.word_count < 8 || f.prose_lines == 0 {
            return None;
        }
        let body = f.non_blank_lines - f.heading_lines;
        let conf = (0.3
            + 0.35 * saturate(f.word_count as f64, 60.0)
            + 0.2 * saturate(f.sentence_count as f64, 3.0))
            * (0.5 + 0.5 * ratio(f.prose_lines, body));
        let sub = if f.overview_hint {
            Subcategory::Overview
        } else {
            Subcategory::Explanation
        };
        Some((sub, conf))
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Outcome of classifying one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub category: Category,
    pub subcategory: Subcategory,
    pub content_type: ContentType,
    /// In `[0.0, 1.0]`.
    pub confidence: f64,
}

/// Stateless, deterministic chunk classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one chunk of text from `source_url`.
    pub fn classify(&self, text: &str, source_url: &str) -> Classification {
        let features = ChunkFeatures::compute(text, source_url);
        self.classify_features(&features)
    }

    pub fn classify_features(&self, features: &ChunkFeatures) -> Classification {
        let content_type = features.content_type();

        let mut best: Option<(Detector, Subcategory, f64)> = None;
        for detector in Detector::PRIORITY {
            let Some((sub, conf)) = detector.score(features) else {
                continue;
            };
            if conf < MIN_DETECTOR_CONFIDENCE {
                continue;
            }
            // Strictly greater: ties keep the earlier detector.
            if best.is_none_or(|(_, _, c)| conf > c) {
                best = Some((detector, sub, conf));
            }
        }

        match best {
            Some((_, subcategory, confidence)) => Classification {
                category: subcategory.category(),
                subcategory,
                content_type,
                confidence,
            },
            None => Classification {
                category: Category::Uncategorized,
                subcategory: Subcategory::Unknown,
                content_type,
                confidence: UNCATEGORIZED_CONFIDENCE,
            },
        }
    }
}
