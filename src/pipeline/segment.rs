//! Segmentation: raw document text → ordered, bounded-size [`Page`]s.
//!
//! Packing is paragraph-first with a sentence fallback:
//!
//! 1. Paragraphs (blank-line separated) accumulate into a buffer, joined by
//!    `"\n\n"`. When the next paragraph would push the buffer past the
//!    character budget, the buffer is flushed as a page first.
//! 2. A paragraph that alone exceeds the budget flushes any pending buffer,
//!    is split into sentences, and the same rule is applied at sentence
//!    granularity (sentences joined by a single space). Whatever is left in
//!    the buffer keeps accumulating with the following paragraphs.
//!
//! A page can only exceed the budget when one indivisible sentence does;
//! that sentence then becomes a page on its own. Page numbers are assigned
//! 1..N in emission order and are the only ordering downstream stages use.

use crate::error::TranslateError;
use crate::output::Page;
use crate::pipeline::input::{self, InputDocument};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Extract and segment a document.
///
/// Returns an empty vector when the document has no non-blank paragraph;
/// callers treat that as [`TranslateError::EmptyDocument`].
pub async fn segment(doc: &InputDocument, page_chars: usize) -> Result<Vec<Page>, TranslateError> {
    let units = input::extract_text(doc).await?;
    let pages = paginate(&units, page_chars);
    debug!(
        "Segmented {} into {} page(s) of ≤{} chars",
        doc.name,
        pages.len(),
        page_chars
    );
    Ok(pages)
}

/// Pack extracted text units into pages of at most `page_chars` characters.
///
/// Units are native pages (PDF) or a single blob (flat formats); paragraph
/// packing runs across unit boundaries.
pub fn paginate<S: AsRef<str>>(units: &[S], page_chars: usize) -> Vec<Page> {
    let mut packer = PagePacker::new(page_chars.max(1));

    for unit in units {
        let normalised = unit.as_ref().replace("\r\n", "\n").replace('\r', "\n");
        for paragraph in split_paragraphs(&normalised) {
            if char_len(paragraph) > packer.budget {
                packer.flush();
                for sentence in split_sentences(paragraph) {
                    packer.push(sentence, " ");
                }
            } else {
                packer.push(paragraph, "\n\n");
            }
        }
    }

    packer.finish()
}

/// Non-blank, trimmed paragraphs.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    RE_PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split a paragraph after sentence terminators.
///
/// Latin terminators (`.`, `!`, `?`) end a sentence only when followed by
/// whitespace; full-width CJK terminators (`。`, `！`, `？`) end one
/// immediately. Returned sentences are trimmed and non-empty.
pub fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().is_some_and(|&(_, next)| next.is_whitespace()),
            _ => false,
        };
        if !boundary {
            continue;
        }

        let sentence = paragraph[start..i + c.len_utf8()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        while chars.peek().is_some_and(|&(_, next)| next.is_whitespace()) {
            chars.next();
        }
        start = chars.peek().map_or(paragraph.len(), |&(j, _)| j);
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

struct PagePacker {
    budget: usize,
    pages: Vec<Page>,
    buf: String,
    buf_chars: usize,
}

impl PagePacker {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            pages: Vec::new(),
            buf: String::new(),
            buf_chars: 0,
        }
    }

    fn push(&mut self, piece: &str, joiner: &str) {
        let piece_chars = char_len(piece);
        if !self.buf.is_empty() && self.buf_chars + char_len(joiner) + piece_chars > self.budget {
            self.flush();
        }
        if !self.buf.is_empty() {
            self.buf.push_str(joiner);
            self.buf_chars += char_len(joiner);
        }
        self.buf.push_str(piece);
        self.buf_chars += piece_chars;
    }

    fn flush(&mut self) {
        let text = self.buf.trim();
        if !text.is_empty() {
            self.pages.push(Page {
                page_num: self.pages.len() + 1,
                text: text.to_string(),
            });
        }
        self.buf.clear();
        self.buf_chars = 0;
    }

    fn finish(mut self) -> Vec<Page> {
        self.flush();
        self.pages
    }
}
