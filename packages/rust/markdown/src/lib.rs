//! Markup-to-text extraction for the ingestion pipeline.
//!
//! Raw pages are narrowed to their main content, converted to Markdown with
//! the `htmd` crate (so code fences, list markers, headings and tables
//! survive as structural signals), and then normalized by a series of
//! cleanup passes. Extraction never fails: when conversion errors out, a
//! regex-based markup stripper produces best-effort plain text instead.

mod cleanup;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of extracting one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    /// Normalized text (Markdown-flavoured when the input was HTML).
    pub text: String,
    /// Resolved document title; empty when nothing could be derived.
    pub title: String,
    /// Approximate word count, excluding fenced code.
    pub word_count: usize,
}

/// Tags whose whole subtree is dropped during conversion.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "aside", "iframe", "noscript", "svg", "form", "button",
];

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Extract normalized text and title from `markup` in a single parse.
///
/// Empty or whitespace-only input yields empty text and an empty title.
#[instrument(skip(markup), fields(url = %source_url, len = markup.len()))]
pub fn extract(markup: &str, source_url: &str) -> ExtractedText {
    if markup.trim().is_empty() {
        return ExtractedText::default();
    }

    let (text, title) = if looks_like_html(markup) {
        let doc = Html::parse_document(markup);
        let text = html_to_text(&doc);
        let title = html_title(&doc).or_else(|| markdown_heading(&text));
        (text, title)
    } else {
        let text = cleanup::run_pipeline(markup);
        let title = markdown_heading(&text);
        (text, title)
    };

    let title = title.unwrap_or_else(|| title_from_url(source_url));
    let word_count = count_words(&text);

    debug!(title = %title, word_count, text_len = text.len(), "extraction complete");

    ExtractedText {
        text,
        title,
        word_count,
    }
}

/// Extract normalized text only.
pub fn extract_text(markup: &str) -> String {
    if markup.trim().is_empty() {
        return String::new();
    }
    if looks_like_html(markup) {
        html_to_text(&Html::parse_document(markup))
    } else {
        cleanup::run_pipeline(markup)
    }
}

/// Resolve a title: `<title>`, then the first heading, then the last path
/// segment of `source_url`.
pub fn extract_title(markup: &str, source_url: &str) -> String {
    if markup.trim().is_empty() {
        return String::new();
    }
    let title = if looks_like_html(markup) {
        html_title(&Html::parse_document(markup))
    } else {
        markdown_heading(markup)
    };
    title.unwrap_or_else(|| title_from_url(source_url))
}

/// Best-effort plain text: drop script/style bodies and every tag, decode
/// the common entities, and normalize whitespace while keeping paragraph
/// breaks at block-level closers.
pub fn strip_markup(markup: &str) -> String {
    static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(?:script|style)\s*>").expect("valid regex")
    });
    static BLOCK_END_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)</(?:p|div|h[1-6]|li|pre|tr|table|section|article|blockquote)\s*>|<br\s*/?>")
            .expect("valid regex")
    });
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"</?[A-Za-z!][^>]*>?").expect("valid regex"));
    static INLINE_WS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));

    let text = SCRIPT_RE.replace_all(markup, "");
    let text = BLOCK_END_RE.replace_all(&text, "\n\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = decode_entities(&text);

    let lines: Vec<String> = text
        .lines()
        .map(|line| INLINE_WS_RE.replace_all(line.trim(), " ").to_string())
        .collect();

    let mut out = String::new();
    let mut blank_run = false;
    for line in lines {
        if line.is_empty() {
            blank_run = !out.is_empty();
            continue;
        }
        if blank_run {
            out.push_str("\n\n");
        } else if !out.is_empty() {
            out.push('\n');
        }
        blank_run = false;
        out.push_str(&line);
    }
    out
}

// ---------------------------------------------------------------------------
// HTML path
// ---------------------------------------------------------------------------

/// Whether the input contains recognizable HTML tags.
fn looks_like_html(markup: &str) -> bool {
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)</?(?:html|head|body|title|div|p|span|h[1-6]|pre|code|table|thead|tbody|tr|td|th|ul|ol|li|a|article|main|section|br|hr|meta|script|style|em|strong|b|i|img|blockquote|nav|header|footer|dl|dt|dd)\b[^>]*>")
            .expect("valid regex")
    });
    TAG_RE.is_match(markup)
}

/// Convert a parsed document to cleaned Markdown-flavoured text.
fn html_to_text(doc: &Html) -> String {
    let content_html = extract_content_html(doc);
    let (content_html, tables) = extract_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let raw = match converter.convert(&content_html) {
        Ok(md) => md,
        Err(e) => {
            warn!(error = %e, "htmd conversion failed, falling back to markup stripping");
            return strip_markup(&content_html);
        }
    };

    let mut markdown = raw;
    for (i, table) in tables.iter().enumerate() {
        markdown = markdown.replacen(&table_placeholder(i), table, 1);
    }

    cleanup::run_pipeline(&markdown)
}

/// Extract the main content HTML, preferring semantic containers over `<body>`.
fn extract_content_html(doc: &Html) -> String {
    let selectors = [
        "article .markdown",
        ".vp-doc",
        ".markdown-section",
        "[role=\"main\"]",
        "article",
        "main",
        ".content",
    ];

    for sel_str in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            return body.inner_html();
        }
    }

    doc.root_element().inner_html()
}

fn table_placeholder(i: usize) -> String {
    format!("LEARNBITSTABLE{i}X")
}

/// Replace each `<table>` with a paragraph placeholder and return the tables
/// rendered as pipe rows, to be spliced back in after conversion.
fn extract_tables(html: &str) -> (String, Vec<String>) {
    let fragment = Html::parse_fragment(html);
    let Ok(table_sel) = Selector::parse("table") else {
        return (html.to_string(), Vec::new());
    };

    if fragment.select(&table_sel).next().is_none() {
        return (html.to_string(), Vec::new());
    }

    // Match against the re-serialized fragment so `ElementRef::html` lines up.
    let mut result = fragment.root_element().inner_html();
    let mut tables = Vec::new();

    for table_el in fragment.select(&table_sel) {
        // Nested tables are rendered as part of their parent.
        if table_el
            .ancestors()
            .filter_map(scraper::ElementRef::wrap)
            .any(|a| a.value().name() == "table")
        {
            continue;
        }
        let outer = table_el.html();
        if !result.contains(&outer) {
            continue;
        }
        let rendered = html_table_to_markdown(&table_el);
        if rendered.is_empty() {
            continue;
        }
        let placeholder = format!("<p>{}</p>", table_placeholder(tables.len()));
        result = result.replacen(&outer, &placeholder, 1);
        tables.push(rendered);
    }

    (result, tables)
}

/// Render a table element as pipe-table rows (header + separator + data).
fn html_table_to_markdown(table: &scraper::ElementRef) -> String {
    let (Ok(tr_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("th, td")) else {
        return String::new();
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    for tr in table.select(&tr_sel) {
        let cells: Vec<String> = tr
            .select(&cell_sel)
            .map(|cell| {
                cell.text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .replace('|', "\\|")
            })
            .collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    let col_count = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let mut md = String::new();
    for (i, row) in rows.iter().enumerate() {
        md.push_str("| ");
        md.push_str(&row.join(" | "));
        md.push_str(" |\n");
        if i == 0 {
            md.push_str("| ");
            md.push_str(&vec!["---"; col_count].join(" | "));
            md.push_str(" |\n");
        }
    }
    md.trim_end().to_string()
}

/// `<title>` text, else the first `h1`..`h6` in document order.
fn html_title(doc: &Html) -> Option<String> {
    let candidates = ["title", "h1, h2, h3, h4, h5, h6"];
    for sel_str in candidates {
        let Ok(sel) = Selector::parse(sel_str) else {
            continue;
        };
        let found = doc
            .select(&sel)
            .map(|el| {
                el.text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .find(|t| !t.is_empty());
        if found.is_some() {
            return found;
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// First ATX heading of a Markdown text.
fn markdown_heading(md: &str) -> Option<String> {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+?)\s*#*\s*$").expect("valid regex"));

    H_RE.captures(md)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Derive a title from the last non-empty path segment of a URL (or path),
/// with any file extension removed and `-`/`_` turned into spaces.
fn title_from_url(source_url: &str) -> String {
    let segment = match Url::parse(source_url) {
        Ok(url) => url
            .path_segments()
            .and_then(|segs| segs.filter(|s| !s.is_empty()).last().map(str::to_string))
            .or_else(|| url.host_str().map(str::to_string)),
        Err(_) => source_url
            .split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .last()
            .map(str::to_string),
    };

    let Some(segment) = segment else {
        return String::new();
    };

    let stem = match segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() <= 5 && !ext.contains(' ') => stem,
        _ => segment.as_str(),
    };

    stem.replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode the handful of entities that matter for plain text.
fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Count words outside fenced code blocks.
fn count_words(md: &str) -> usize {
    static CODE_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

    CODE_BLOCK_RE
        .replace_all(md, "")
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
