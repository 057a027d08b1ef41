//! Boundary-aware overlapping text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `max_chars` characters,
//! with consecutive chunks sharing exactly `overlap` characters. Cuts prefer
//! natural boundaries close to the length limit so that each chunk stays
//! semantically coherent.
//!
//! Each chunk receives a content-addressed id: the SHA-256 of its document
//! id, start offset, and text. Re-chunking unchanged text therefore yields
//! identical ids, which is what makes re-ingestion idempotent.
//!
//! # Algorithm
//!
//! 1. If the text has at most `max_chars` characters, emit it as one chunk.
//! 2. Otherwise, from the current start position, take the hard limit
//!    `start + max_chars`.
//! 3. Search the tolerance window `[limit - tolerance, limit]` backwards for
//!    a paragraph break (`\n\n`), then a sentence end (`.`/`!`/`?` followed
//!    by whitespace), then a single newline. Cut after the first one found.
//! 4. With no boundary in the window, cut hard at the limit.
//! 5. Start the next chunk `overlap` characters before the cut; stop once a
//!    chunk reaches the end of the text.
//!
//! The chunks' spans cover the whole text with no gap, and the tolerance is
//! clamped so every step advances past the overlap.
//!
//! # Example
//!
//! ```rust
//! use ragline_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-123", "Hello world. Second sentence.", 300, 50).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::Chunk;

/// Default tolerance window, as a fraction (1/N) of `max_chars`.
const DEFAULT_TOLERANCE_DIVISOR: usize = 5;

/// Splits text into overlapping, boundary-aligned chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    overlap: usize,
    tolerance: usize,
}

impl Chunker {
    /// Create a chunker.
    ///
    /// # Errors
    ///
    /// [`RagError::Config`] if `max_chars == 0` or `overlap >= max_chars`.
    pub fn new(max_chars: usize, overlap: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(RagError::config("chunk max length must be > 0"));
        }
        if overlap >= max_chars {
            return Err(RagError::config(format!(
                "chunk overlap ({}) must be smaller than max length ({})",
                overlap, max_chars
            )));
        }
        Ok(Self {
            max_chars,
            overlap,
            tolerance: max_chars / DEFAULT_TOLERANCE_DIVISOR,
        })
    }

    /// Override the boundary search window (in characters).
    pub fn with_tolerance(mut self, tolerance: usize) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into chunks belonging to `document_id`.
    ///
    /// # Guarantees
    ///
    /// - At least one chunk is returned (an empty text yields one empty chunk).
    /// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
    /// - The first chunk starts at 0, the last ends at `text.len()`, and each
    ///   chunk starts no later than the previous one ends.
    /// - Every chunk has at most `max_chars` characters.
    pub fn chunk(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        // Byte offset of every char position, plus the end of the text.
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = offsets.len() - 1;

        if total <= self.max_chars {
            return vec![make_chunk(document_id, 0, text, 0, text.len(), total)];
        }

        let chars: Vec<char> = text.chars().collect();
        // Keep `end - overlap > start` for every cut.
        let tolerance = self.tolerance.min(self.max_chars - self.overlap - 1);

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0u32;

        loop {
            let limit = (start + self.max_chars).min(total);
            let end = if limit == total {
                total
            } else {
                find_boundary(&chars, limit, tolerance).unwrap_or(limit)
            };

            chunks.push(make_chunk(
                document_id,
                index,
                text,
                offsets[start],
                offsets[end],
                end - start,
            ));
            index += 1;

            if end == total {
                break;
            }
            start = end - self.overlap;
        }

        chunks
    }
}

/// Split `text` with a default-tolerance [`Chunker`].
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_chars: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    Ok(Chunker::new(max_chars, overlap)?.chunk(document_id, text))
}

/// Find the best cut position (exclusive end, in chars) within
/// `[limit - tolerance, limit]`, preferring paragraph, then sentence, then
/// line boundaries. Returns the rightmost cut of the best kind.
fn find_boundary(chars: &[char], limit: usize, tolerance: usize) -> Option<usize> {
    let lo = limit.saturating_sub(tolerance).max(1);
    let window = || (lo..=limit).rev();

    let is_paragraph = |p: usize| p >= 2 && chars[p - 2] == '\n' && chars[p - 1] == '\n';
    let is_sentence = |p: usize| {
        p >= 2 && matches!(chars[p - 2], '.' | '!' | '?') && chars[p - 1].is_whitespace()
    };
    let is_line = |p: usize| chars[p - 1] == '\n';

    window()
        .find(|&p| is_paragraph(p))
        .or_else(|| window().find(|&p| is_sentence(p)))
        .or_else(|| window().find(|&p| is_line(p)))
}

/// Create a single [`Chunk`] with a content-addressed id.
fn make_chunk(
    document_id: &str,
    index: u32,
    text: &str,
    start: usize,
    end: usize,
    char_len: usize,
) -> Chunk {
    let span = &text[start..end];
    Chunk {
        id: chunk_id(document_id, start, span),
        document_id: document_id.to_string(),
        chunk_index: index,
        start,
        end,
        char_len,
        text: span.to_string(),
    }
}

/// Content-addressed chunk id: SHA-256 over document id, offset, and text.
pub fn chunk_id(document_id: &str, start: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(start.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
