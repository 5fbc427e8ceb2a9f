//! Paragraph-boundary text chunker with overlap.
//!
//! Splits document text into [`Chunk`]s that respect a `max_tokens`
//! budget. Splitting happens on paragraph boundaries (`\n\n`) where
//! possible; each chunk after the first is prefixed with the trailing
//! `overlap_tokens` of its predecessor so that sentences straddling a
//! boundary stay retrievable from either side.
//!
//! # Algorithm
//!
//! 1. Convert token budgets to characters at 4 chars/token.
//! 2. Accumulate paragraphs into pieces that leave room for the overlap
//!    prefix.
//! 3. Hard-split oversized paragraphs at the nearest newline or space.
//! 4. Prefix every piece after the first with the word-aligned tail of
//!    the previous piece.
//! 5. Always return at least one chunk.
//!
//! Chunk ids are UUIDv5 over `document_id:index`, so re-importing the same
//! document yields the same ids.
//!
//! ```rust
//! use corpus_rag_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-123", "Hello world.\n\nSecond paragraph.", 400, 40);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of `text` at [`CHARS_PER_TOKEN`].
pub fn estimate_tokens(text: &str) -> i64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as i64
}

/// Hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic chunk id for a document and ordinal.
pub fn chunk_id(document_id: &str, index: i64) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, index).as_bytes(),
    )
    .to_string()
}

/// Split text into overlapping chunks.
///
/// Indices are contiguous from 0. `overlap_tokens` is clamped below
/// `max_tokens`.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens.min(max_tokens.saturating_sub(1)) * CHARS_PER_TOKEN;
    // Room for the overlap prefix and its joining space.
    let piece_chars = if overlap_chars > 0 {
        max_chars - overlap_chars - 1
    } else {
        max_chars
    };

    let pieces = split_pieces(text, piece_chars);
    if pieces.is_empty() {
        return vec![make_chunk(document_id, 0, text.trim())];
    }

    let mut chunks = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        let body = match i.checked_sub(1).map(|p| overlap_tail(&pieces[p], overlap_chars)) {
            Some(tail) if !tail.is_empty() => format!("{} {}", tail, piece),
            _ => piece.clone(),
        };
        chunks.push(make_chunk(document_id, i as i64, &body));
    }
    chunks
}

/// Accumulate paragraphs into pieces of at most `max_chars` bytes.
fn split_pieces(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }
    pieces
}

/// Split an oversized paragraph at newline/space boundaries.
fn hard_split(mut remaining: &str, max_chars: usize, pieces: &mut Vec<String>) {
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
        let mut split_at = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        if split_at == 0 {
            split_at = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

/// Trailing `max_chars` of `text`, starting at a word boundary.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    if text.len() <= max_chars {
        return text;
    }
    let start = snap_forward(text, text.len() - max_chars);
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(ws) if start > 0 && !text[..start].ends_with(char::is_whitespace) => {
            tail[ws..].trim_start()
        }
        _ => tail.trim_start(),
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Snap a byte index forward to the nearest valid UTF-8 char boundary.
fn snap_forward(s: &str, index: usize) -> usize {
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        token_count: estimate_tokens(text),
        hash: content_hash(text),
        page: None,
        section: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 400, 40);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].token_count, 4);
        assert_eq!(chunks[0].hash, content_hash("Hello, world!"));
    }

    #[test]
    fn test_empty_text_yields_one_chunk() {
        let chunks = chunk_text("doc1", "", 400, 40);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].token_count, 0);
    }

    #[test]
    fn test_indices_contiguous_and_within_budget() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {} talks about lightfield panels.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc1", &text, 30, 5);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert!(c.text.len() <= 30 * CHARS_PER_TOKEN, "chunk {} too long", i);
        }
    }

    #[test]
    fn test_overlap_repeats_tail_of_previous_chunk() {
        let text = "alpha beta gamma delta\n\nepsilon zeta eta theta";
        let chunks = chunk_text("doc1", text, 10, 3);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "alpha beta gamma delta");
        assert!(chunks[1].text.starts_with("gamma delta "), "{}", chunks[1].text);
        assert!(chunks[1].text.ends_with("epsilon zeta eta theta"));
    }

    #[test]
    fn test_zero_overlap_reconstructs_paragraphs() {
        let text = "one two three\n\nfour five six\n\nseven eight nine";
        let chunks = chunk_text("doc1", text, 4, 0);
        let joined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        assert_eq!(joined, text);
    }

    #[test]
    fn test_hard_split_multibyte() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_text("doc1", text, 3, 1);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_ids_are_deterministic_per_document() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let a = chunk_text("doc1", text, 2, 0);
        let b = chunk_text("doc1", text, 2, 0);
        let c = chunk_text("doc2", text, 2, 0);
        assert_eq!(a, b);
        assert_ne!(a[0].id, c[0].id);
        assert_eq!(a[0].id, chunk_id("doc1", 0));
    }

    #[test]
    fn test_overlap_clamped_below_max() {
        let chunks = chunk_text("doc1", "a b c d e f g h i j k l m n o p", 2, 50);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 2 * CHARS_PER_TOKEN);
        }
    }
}
