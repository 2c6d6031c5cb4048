//! Keyword and entity spotting for learning bit tags.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// Built-in technology vocabulary, matched case-insensitively on word boundaries.
const TECH_VOCABULARY: &[&str] = &[
    "rust", "python", "javascript", "typescript", "go", "java", "kotlin", "swift", "c++", "c#",
    "ruby", "php", "sql", "html", "css", "json", "yaml", "toml", "xml", "markdown", "bash",
    "docker", "kubernetes", "git", "linux", "http", "https", "rest", "graphql", "grpc", "api",
    "cli", "async", "tokio", "serde", "cargo", "npm", "node", "react", "vue", "wasm",
    "postgres", "postgresql", "sqlite", "mysql", "redis", "kafka", "aws", "oauth", "jwt", "tls",
    "regex", "websocket", "terraform",
];

static FENCE_LANG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:```|~~~)[ \t]*([\w+#.-]+)").expect("valid regex"));

static INLINE_IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([A-Za-z_][\w:.]{1,30})`").expect("valid regex"));

/// Normalize a fence info string to a tag.
fn normalize_language(lang: &str) -> Option<String> {
    let lang = lang.to_lowercase();
    let tag = match lang.as_str() {
        "" | "text" | "txt" | "plain" | "plaintext" | "console" | "output" => return None,
        "rs" => "rust",
        "py" | "python3" => "python",
        "js" | "jsx" | "mjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "sh" | "shell" | "zsh" | "shell-session" => "bash",
        "yml" => "yaml",
        "golang" => "go",
        other => other,
    };
    Some(tag.to_string())
}

/// Produces a bounded, deterministic tag set for a chunk.
#[derive(Debug, Clone)]
pub struct Tagger {
    keywords: Vec<(String, Regex)>,
    max_tags: usize,
}

impl Tagger {
    /// Build a tagger from the built-in vocabulary plus `extra_keywords`.
    pub fn new(extra_keywords: &[String], max_tags: usize) -> Self {
        let mut seen = BTreeSet::new();
        let keywords = TECH_VOCABULARY
            .iter()
            .map(|k| k.to_string())
            .chain(extra_keywords.iter().map(|k| k.trim().to_lowercase()))
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .filter_map(|k| {
                let pattern = format!(r"(?i)(?:^|[^\w+#]){}(?:$|[^\w+#])", regex::escape(&k));
                Regex::new(&pattern).ok().map(|re| (k, re))
            })
            .collect();

        Self { keywords, max_tags }
    }

    /// Tags for `text`: fence languages first, then vocabulary hits, then
    /// short inline-code identifiers, capped at `max_tags`.
    pub fn tags(&self, text: &str) -> BTreeSet<String> {
        let mut tags = BTreeSet::new();
        if self.max_tags == 0 {
            return tags;
        }

        let fence_langs = FENCE_LANG_RE
            .captures_iter(text)
            .filter_map(|c| normalize_language(&c[1]));
        let vocabulary = self
            .keywords
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(k, _)| k.clone());
        let identifiers = INLINE_IDENT_RE
            .captures_iter(text)
            .map(|c| c[1].to_lowercase());

        for tag in fence_langs.chain(vocabulary).chain(identifiers) {
            if tags.len() >= self.max_tags {
                break;
            }
            tags.insert(tag);
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn vocabulary_matches_on_word_boundaries() {
        let tagger = Tagger::new(&[], 8);
        let tags = tagger.tags("Use Rust with Tokio; trusty is not a match.");
        assert_eq!(tags, set(&["rust", "tokio"]));
    }

    #[test]
    fn symbols_in_keywords_are_literal() {
        let tagger = Tagger::new(&[], 8);
        assert_eq!(tagger.tags("Written in C++ and C#."), set(&["c#", "c++"]));
        assert!(tagger.tags("Section C is short.").is_empty());
    }

    #[test]
    fn fence_languages_are_normalized() {
        let tagger = Tagger::new(&[], 8);
        let tags = tagger.tags("```rs\nfn main() {}\n```\n\n```text\noutput\n```");
        assert_eq!(tags, set(&["rust"]));
    }

    #[test]
    fn extra_keywords_and_inline_identifiers() {
        let tagger = Tagger::new(&["Borrow Checker".to_string()], 8);
        let tags = tagger.tags("The borrow checker rejects `Vec::push` here.");
        assert_eq!(tags, set(&["borrow checker", "vec::push"]));
    }

    #[test]
    fn tags_are_capped() {
        let tagger = Tagger::new(&[], 3);
        let tags = tagger.tags("```python\nx\n```\nrust go java kotlin swift");
        assert_eq!(tags.len(), 3);
        assert!(tags.contains("python"));
    }

    #[test]
    fn duplicate_keywords_are_ignored() {
        let tagger = Tagger::new(&["RUST".to_string(), " ".to_string()], 8);
        assert_eq!(tagger.keywords.iter().filter(|(k, _)| k == "rust").count(), 1);
        assert_eq!(tagger.tags("rust"), set(&["rust"]));
    }
}
