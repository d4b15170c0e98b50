//! Heading-aware regulation chunker.
//!
//! Splits a regulation document into [`Chunk`]s that stay within a target
//! token budget while keeping each chunk inside one heading section, so the
//! section title and clause identifier travel with the text into the index.
//!
//! # Algorithm
//!
//! 1. Split the document at heading lines: Markdown `#` headings, or short
//!    standalone `Article N`, `Section N`, `Chapter N`, `Part N`, `§N` lines
//!    with an optional capitalized title (`Article 12: Wages`). Body text
//!    that merely starts with `Article 7 of this Law ...` is not a heading.
//!    Text before the first heading becomes an implicit `"Introduction"`
//!    section.
//! 2. Extract a clause identifier from each heading (see [`extract_article`]).
//! 3. A section whose estimate is within `target_tokens` becomes one chunk
//!    (heading + body).
//! 4. Larger sections are split into sentences and greedily packed. Each new
//!    chunk starts with an overlap buffer holding the trailing sentences of
//!    the chunk just closed, worth about `overlap_tokens`.
//! 5. Tokens are estimated as `ceil(chars / 4)`.
//!
//! # Example
//!
//! ```rust
//! use compliance_kb_core::chunk::{chunk_document, ChunkOptions};
//!
//! let doc = "Preamble text.\n\n## Article 12.b\n\nEmployers shall keep records.";
//! let chunks = chunk_document(doc, &ChunkOptions::default());
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].section.as_deref(), Some("Introduction"));
//! assert_eq!(chunks[1].article.as_deref(), Some("12.b"));
//! ```

use std::sync::OnceLock;

use regex::Regex;

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
///
/// Kept as a fixed heuristic: thresholds and truncation limits elsewhere are
/// calibrated against it.
pub const CHARS_PER_TOKEN: usize = 4;

pub const DEFAULT_TARGET_TOKENS: usize = 700;
pub const DEFAULT_OVERLAP_TOKENS: usize = 80;

/// Section name given to text that precedes the first heading.
pub const INTRODUCTION: &str = "Introduction";

/// Size parameters for [`chunk_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            target_tokens: DEFAULT_TARGET_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
        }
    }
}

/// Estimate the token count of `text` as `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    tokens_for_chars(text.chars().count())
}

fn tokens_for_chars(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Longest line accepted as a non-Markdown clause heading.
const MAX_CLAUSE_HEADING_CHARS: usize = 80;

fn atx_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*#{1,6}\s+\S").expect("valid heading regex"))
}

/// Keyword and number, then an optional separator and a title that starts
/// capitalized and holds no sentence punctuation.
fn clause_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?i:article|section|chapter|part)\s+|§\s*)\d+(?:\.\w+)*\s*(?:[:.\-–—)]\s*)?(?:[\p{Lu}\p{Lt}\d(\[][^.!?;,]*)?$",
        )
        .expect("valid clause heading regex")
    })
}

/// Article patterns in priority order; the first match wins.
fn article_res() -> &'static [Regex; 4] {
    static RES: OnceLock<[Regex; 4]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"(?i)\barticle\s+(\d+(?:\.\w+)*)").expect("valid article regex"),
            Regex::new(r"§\s*(\d+(?:\.\w+)*)").expect("valid section-sign regex"),
            Regex::new(r"(?i)\bsection\s+(\d+(?:\.\w+)*)").expect("valid section regex"),
            Regex::new(r"^(\d+(?:\.\d+)*)\.?(?:\s|$)").expect("valid bare-number regex"),
        ]
    })
}

/// Returns true when `line` starts a new section.
pub fn is_heading(line: &str) -> bool {
    if atx_heading_re().is_match(line) {
        return true;
    }
    let line = line.trim();
    line.chars().count() <= MAX_CLAUSE_HEADING_CHARS && clause_heading_re().is_match(line)
}

/// Heading text with Markdown hashes and surrounding whitespace removed.
fn heading_text(line: &str) -> String {
    line.trim().trim_start_matches('#').trim().to_string()
}

/// Extract a clause identifier from a heading.
///
/// Patterns are tried in a fixed order: `Article <id>`, `§<id>`,
/// `Section <id>`, then a leading bare number such as `12.` or `4.2`.
///
/// ```rust
/// use compliance_kb_core::chunk::extract_article;
///
/// assert_eq!(extract_article("Article 12.b").as_deref(), Some("12.b"));
/// assert_eq!(extract_article("§9").as_deref(), Some("9"));
/// assert_eq!(extract_article("12. Scope").as_deref(), Some("12"));
/// assert_eq!(extract_article("Introduction"), None);
/// ```
pub fn extract_article(heading: &str) -> Option<String> {
    let heading = heading.trim().trim_start_matches('#').trim();
    article_res()
        .iter()
        .find_map(|re| re.captures(heading))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// A heading section before chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    /// Heading line as it appears in chunk text; `None` for the preamble.
    heading: Option<String>,
    name: String,
    article: Option<String>,
    body: String,
}

impl Section {
    fn preamble() -> Self {
        Self {
            heading: None,
            name: INTRODUCTION.to_string(),
            article: None,
            body: String::new(),
        }
    }

    fn text(&self) -> String {
        let body = self.body.trim();
        match &self.heading {
            Some(h) => format!("{}\n\n{}", h, body),
            None => body.to_string(),
        }
    }
}

fn split_sections(document: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section::preamble();

    for line in document.lines() {
        if is_heading(line) {
            sections.push(std::mem::replace(&mut current, Section::preamble()));
            let heading = heading_text(line);
            current.article = extract_article(&heading);
            current.name = heading.clone();
            current.heading = Some(heading);
        } else {
            current.body.push_str(line);
            current.body.push('\n');
        }
    }
    sections.push(current);

    sections.retain(|s| !s.body.trim().is_empty());
    sections
}

/// Split text into sentences on `.`, `!` or `?` followed by whitespace.
///
/// Returned slices are trimmed; empty pieces are skipped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let end = i + c.len_utf8();
                    push_trimmed(&mut sentences, &text[start..end]);
                    start = end;
                }
            }
        }
    }
    push_trimmed(&mut sentences, &text[start..]);

    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, piece: &'a str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece);
    }
}

/// Char count of `sentences` joined with single spaces.
fn joined_chars(sentences: &[&str]) -> usize {
    let chars: usize = sentences.iter().map(|s| s.chars().count()).sum();
    chars + sentences.len().saturating_sub(1)
}

/// Trailing sentences of a closed chunk that seed the next one.
///
/// Walks back from the last sentence while the tail fits `overlap_tokens`
/// (the last sentence is always taken), then drops sentences from the
/// front until the tail plus the incoming sentence fits `target_tokens`.
fn overlap_tail<'a>(
    closed: &[&'a str],
    next_chars: usize,
    opts: &ChunkOptions,
) -> Vec<&'a str> {
    if opts.overlap_tokens == 0 || closed.is_empty() {
        return Vec::new();
    }

    let mut start = closed.len() - 1;
    while start > 0 && tokens_for_chars(joined_chars(&closed[start - 1..])) <= opts.overlap_tokens {
        start -= 1;
    }

    let mut tail = closed[start..].to_vec();
    while !tail.is_empty() && tokens_for_chars(joined_chars(&tail) + 1 + next_chars) > opts.target_tokens {
        tail.remove(0);
    }
    tail
}

fn pack_sentences(sentences: &[&str], opts: &ChunkOptions) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for &sentence in sentences {
        let sentence_chars = sentence.chars().count();
        if !current.is_empty() {
            let would_be = joined_chars(&current) + 1 + sentence_chars;
            if tokens_for_chars(would_be) > opts.target_tokens {
                chunks.push(current.join(" "));
                current = overlap_tail(&current, sentence_chars, opts);
            }
        }
        current.push(sentence);
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

fn make_chunk(text: String, section: &Section) -> Chunk {
    Chunk {
        token_count: estimate_tokens(&text),
        text,
        section: Some(section.name.clone()),
        article: section.article.clone(),
    }
}

/// Split a regulation document into heading-aware, size-bounded chunks.
///
/// # Guarantees
///
/// - An empty or whitespace-only document yields no chunks.
/// - Every chunk estimates at most `target_tokens`, unless it is a single
///   sentence that alone exceeds the target.
/// - Consecutive chunks from one section share their boundary sentence
///   whenever that sentence and the next fit the target together.
/// - Output is deterministic for a given input and options.
pub fn chunk_document(document: &str, opts: &ChunkOptions) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for section in split_sections(document) {
        let text = section.text();
        if estimate_tokens(&text) <= opts.target_tokens {
            chunks.push(make_chunk(text, &section));
            continue;
        }

        let sentences = split_sentences(&text);
        for piece in pack_sentences(&sentences, opts) {
            chunks.push(make_chunk(piece, &section));
        }
    }

    chunks
}
