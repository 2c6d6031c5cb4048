//! Structure-aware text chunking.
//!
//! Normalized text is parsed into blocks (headings, fenced code, tables,
//! lists, paragraphs) and the blocks are packed into chunks of bounded size.
//! Chunks are exact, contiguous slices of the input: concatenating them
//! gives back the trimmed input.

use std::sync::LazyLock;

use learnbits_shared::{DEFAULT_MAX_CHUNK_SIZE, LearnBitsError, Result};
use regex::Regex;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}(?:\s|$)").expect("valid regex"));

static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d{1,3}[.)])\s+\S").expect("valid regex"));

/// One contiguous segment of the input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the chunk sequence, starting at 0.
    pub index: usize,
    /// Exact slice of the input, including trailing blank lines.
    pub text: String,
}

impl Chunk {
    /// The chunk text without surrounding whitespace. Never empty.
    pub fn content(&self) -> &str {
        self.text.trim()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Heading,
    Code,
    Table,
    List,
    Paragraph,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    kind: BlockKind,
    start: usize,
    end: usize,
}

/// A chunk under construction: byte range plus the kind of its body.
struct Pending {
    start: usize,
    end: usize,
    body: Option<BlockKind>,
}

/// Splits normalized text into bounded chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chunk_size: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

impl Chunker {
    /// Create a chunker whose chunks hold at most `max_chunk_size` characters.
    pub fn new(max_chunk_size: usize) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(LearnBitsError::invalid_config(
                "max_chunk_size must be greater than zero",
            ));
        }
        Ok(Self { max_chunk_size })
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Split `text` into chunks. Whitespace-only input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let blocks = parse_blocks(text);
        let ranges = self.pack(text, &blocks);

        ranges
            .iter()
            .enumerate()
            .map(|(index, &(start, end))| {
                // Whitespace between chunks belongs to the earlier chunk.
                let stop = ranges.get(index + 1).map_or(end, |next| next.0);
                Chunk {
                    index,
                    text: text[start..stop].to_string(),
                }
            })
            .collect()
    }

    fn pack(&self, text: &str, blocks: &[Block]) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut current: Option<Pending> = None;

        for block in blocks {
            if char_len(&text[block.start..block.end]) > self.max_chunk_size {
                flush(&mut current, &mut ranges);
                self.hard_cut(text, block.start, block.end, &mut ranges);
                continue;
            }

            if block.kind == BlockKind::Heading {
                flush(&mut current, &mut ranges);
                current = Some(Pending {
                    start: block.start,
                    end: block.end,
                    body: None,
                });
                continue;
            }

            if let Some(pending) = current.as_mut() {
                let same_kind = pending.body.is_none_or(|kind| kind == block.kind);
                let fits = char_len(&text[pending.start..block.end]) <= self.max_chunk_size;
                if same_kind && fits {
                    pending.end = block.end;
                    pending.body = Some(block.kind);
                    continue;
                }
                flush(&mut current, &mut ranges);
            }

            current = Some(Pending {
                start: block.start,
                end: block.end,
                body: Some(block.kind),
            });
        }

        flush(&mut current, &mut ranges);
        ranges
    }

    /// Cut an oversized block: last newline in the window, else last
    /// whitespace, else a plain character boundary.
    fn hard_cut(&self, text: &str, start: usize, end: usize, ranges: &mut Vec<(usize, usize)>) {
        let mut pos = start;
        while pos < end {
            let rest = &text[pos..end];
            pos += rest.len() - rest.trim_start().len();
            if pos >= end {
                break;
            }

            let rest = &text[pos..end];
            let Some((window_end, _)) = rest.char_indices().nth(self.max_chunk_size) else {
                ranges.push((pos, pos + rest.trim_end().len()));
                break;
            };

            let window = &rest[..window_end];
            let cut = window
                .rfind('\n')
                .filter(|&i| i > 0)
                .or_else(|| window.rfind(char::is_whitespace).filter(|&i| i > 0))
                .unwrap_or(window_end);

            let piece = &rest[..cut];
            ranges.push((pos, pos + piece.trim_end().len()));
            pos += cut;
        }
    }
}

fn flush(current: &mut Option<Pending>, ranges: &mut Vec<(usize, usize)>) {
    if let Some(pending) = current.take() {
        ranges.push((pending.start, pending.end));
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ---------------------------------------------------------------------------
// Block parsing
// ---------------------------------------------------------------------------

fn fence_marker(trimmed: &str) -> Option<&'static str> {
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// Parse text into blocks separated by blank lines. Block ranges exclude
/// leading indentation and trailing whitespace.
fn parse_blocks(text: &str) -> Vec<Block> {
    let mut lines: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0;
    for raw in text.split_inclusive('\n') {
        lines.push((offset, raw.trim_end_matches(['\n', '\r'])));
        offset += raw.len();
    }

    let is_blank = |i: usize| lines[i].1.trim().is_empty();
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let (line_start, line) = lines[i];
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            i += 1;
            continue;
        }
        let start = line_start + (line.len() - trimmed.len());

        let (kind, last) = if let Some(marker) = fence_marker(trimmed) {
            let mut j = i + 1;
            while j < lines.len() && !lines[j].1.trim_start().starts_with(marker) {
                j += 1;
            }
            // Unterminated fences run to the end of input.
            (BlockKind::Code, j.min(lines.len() - 1))
        } else if HEADING_RE.is_match(trimmed) {
            (BlockKind::Heading, i)
        } else if trimmed.starts_with('|') {
            let mut j = i;
            while j + 1 < lines.len() && lines[j + 1].1.trim_start().starts_with('|') {
                j += 1;
            }
            (BlockKind::Table, j)
        } else if LIST_ITEM_RE.is_match(line) {
            let mut j = i;
            while j + 1 < lines.len() && !is_blank(j + 1) {
                let next = lines[j + 1].1;
                let continues = LIST_ITEM_RE.is_match(next)
                    || (next.starts_with([' ', '\t']) && fence_marker(next.trim_start()).is_none());
                if !continues {
                    break;
                }
                j += 1;
            }
            (BlockKind::List, j)
        } else {
            let mut j = i;
            while j + 1 < lines.len() && !is_blank(j + 1) {
                let next = lines[j + 1].1.trim_start();
                if fence_marker(next).is_some() || HEADING_RE.is_match(next) || next.starts_with('|')
                {
                    break;
                }
                j += 1;
            }
            (BlockKind::Paragraph, j)
        };

        let (last_start, last_line) = lines[last];
        let raw_end = last_start + last_line.len();
        let end = start + text[start..raw_end].trim_end().len();
        blocks.push(Block { kind, start, end });
        i = last + 1;
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnbits_shared::collapse_whitespace;
    use proptest::prelude::*;

    const DOC: &str = "# Getting Started\n\nThis guide walks through installation.\nIt takes a few minutes.\n\n```bash\ncargo install learnbits\n\nlearnbits --help\n```\n\n## Options\n\n| Flag | Meaning |\n| --- | --- |\n| -v | verbose |\n\n1. Open a terminal.\n2. Run the installer.\n   Wait for it to finish.\n\nThat is all.\n";

    fn joined(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = Chunker::new(0).unwrap_err();
        assert!(matches!(err, LearnBitsError::InvalidConfiguration { .. }));
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("  \n\n\t ").is_empty());
    }

    #[test]
    fn chunks_partition_the_input() {
        for size in [1, 7, 40, 80, 1200] {
            let chunks = Chunker::new(size).unwrap().split(DOC);
            assert_eq!(joined(&chunks), DOC.trim(), "size {size}");
            assert_eq!(
                collapse_whitespace(&joined(&chunks)),
                collapse_whitespace(DOC),
                "size {size}"
            );
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.index, i);
                assert!(!chunk.content().is_empty());
                assert!(
                    chunk.content().chars().count() <= size,
                    "chunk {i} too long for size {size}: {:?}",
                    chunk.content()
                );
            }
        }
    }

    #[test]
    fn structure_drives_boundaries() {
        let chunks = Chunker::default().split(DOC);
        let contents: Vec<&str> = chunks.iter().map(|c| c.content()).collect();

        assert_eq!(
            contents[0],
            "# Getting Started\n\nThis guide walks through installation.\nIt takes a few minutes."
        );
        assert!(contents[1].starts_with("```bash"));
        assert!(contents[1].ends_with("```"));
        assert!(contents[1].contains("learnbits --help"));
        assert!(contents[2].starts_with("## Options"));
        assert!(contents[2].contains("| -v | verbose |"));
        assert!(contents[3].starts_with("1. Open a terminal."));
        assert!(contents[3].contains("Wait for it to finish."));
        assert_eq!(contents[4], "That is all.");
        assert_eq!(contents.len(), 5);
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        let text = "Intro paragraph.\n\n```rust\nfn main() {}\n\nlet x = 1;\n";
        let chunks = Chunker::default().split(text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content(), "```rust\nfn main() {}\n\nlet x = 1;");
    }

    #[test]
    fn oversized_block_is_cut_at_newlines_then_whitespace() {
        let text = "alpha beta gamma\ndelta epsilon zeta eta theta";
        let chunks = Chunker::new(20).unwrap().split(text);
        let contents: Vec<&str> = chunks.iter().map(|c| c.content()).collect();
        assert_eq!(contents, ["alpha beta gamma", "delta epsilon zeta", "eta theta"]);
        assert_eq!(joined(&chunks), text);
    }

    #[test]
    fn unbroken_run_is_cut_on_char_boundaries() {
        let text = "ééééééééé";
        let chunks = Chunker::new(4).unwrap().split(text);
        let contents: Vec<&str> = chunks.iter().map(|c| c.content()).collect();
        assert_eq!(contents, ["éééé", "éééé", "é"]);
    }

    #[test]
    fn consecutive_paragraphs_pack_together() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = Chunker::default().split(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content(), text);
    }

    proptest! {
        #[test]
        fn any_markdown_is_partitioned(
            text in "[a-z0-9 #|`*.\\-\n]{0,400}",
            size in 1usize..120,
        ) {
            let chunks = Chunker::new(size).unwrap().split(&text);
            prop_assert_eq!(joined(&chunks), text.trim());
            prop_assert_eq!(
                collapse_whitespace(&joined(&chunks)),
                collapse_whitespace(&text)
            );
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert!(!chunk.content().is_empty());
                prop_assert!(chunk.content().chars().count() <= size);
            }
        }
    }
}
