//! Recursive boundary-aware text chunker.
//!
//! Splits document content into ordered, overlapping chunks that respect
//! a size bound expressed in tokens. Splitting walks a precedence list
//! of separators (paragraph boundary, line boundary, sentence boundary)
//! and falls back to hard cuts when a fragment has no usable boundary.
//!
//! The function is deterministic in `(content, size, overlap)`, which is
//! what makes `chunk_id = "{doc_id}_chunk_{index}"` a stable identity:
//! the index sequence only changes when the content around it does, and
//! the diff engine detects exactly that through the per-chunk hash.

use crate::hash;

/// Approximate chars-per-token ratio used for size accounting.
const CHARS_PER_TOKEN: usize = 4;

/// Separator precedence: paragraphs, then lines, then sentences.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". "];

/// One chunk of a document: contiguous index, content, and the content
/// fingerprint the diff engine compares.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub index: usize,
    pub content: String,
    pub hash_content: String,
}

/// Split `content` into chunks of at most `chunk_size` tokens, with
/// `chunk_overlap` tokens carried over from the tail of the previous
/// chunk. Returns an empty vector for empty content.
pub fn chunk_content(content: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<ChunkPiece> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let max_chars = chunk_size.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = chunk_overlap.min(chunk_size / 2) * CHARS_PER_TOKEN;

    let pieces = split_recursive(content, max_chars, SEPARATORS);

    let mut chunks = Vec::with_capacity(pieces.len());
    for (index, piece) in pieces.iter().enumerate() {
        let text = if index > 0 && overlap_chars > 0 {
            let prev = &pieces[index - 1];
            let start = boundary_before(prev, prev.len().saturating_sub(overlap_chars));
            let mut joined = prev[start..].to_string();
            joined.push_str(piece);
            joined
        } else {
            piece.clone()
        };
        chunks.push(ChunkPiece {
            index,
            hash_content: hash::hash_content(&text),
            content: text,
        });
    }
    chunks
}

/// Recursively split text at the best available separator, packing
/// adjacent fragments greedily up to the size bound.
fn split_recursive(text: &str, max_chars: usize, separators: &[&str]) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let Some((sep, rest)) = separators.split_first() else {
        return hard_cut(text, max_chars);
    };

    let parts: Vec<&str> = text.split(sep).collect();
    if parts.len() == 1 {
        // Separator absent; try the next one.
        return split_recursive(text, max_chars, rest);
    }

    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();

    for part in parts {
        let joined_len = if buf.is_empty() {
            part.len()
        } else {
            buf.len() + sep.len() + part.len()
        };

        if joined_len > max_chars && !buf.is_empty() {
            out.push(std::mem::take(&mut buf));
        }

        if part.len() > max_chars {
            if !buf.is_empty() {
                out.push(std::mem::take(&mut buf));
            }
            out.extend(split_recursive(part, max_chars, rest));
        } else if buf.is_empty() {
            buf.push_str(part);
        } else {
            buf.push_str(sep);
            buf.push_str(part);
        }
    }

    if !buf.is_empty() {
        out.push(buf);
    }

    out.retain(|piece| !piece.trim().is_empty());
    out
}

/// Cut at the size bound, preferring the last newline or space inside
/// the window over a mid-word cut.
fn hard_cut(text: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            out.push(remaining.to_string());
            break;
        }
        let window_end = boundary_before(remaining, max_chars);
        let cut = remaining[..window_end]
            .rfind('\n')
            .or_else(|| remaining[..window_end].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(window_end)
            .max(1);
        let cut = boundary_before(remaining, cut).max(1);
        out.push(remaining[..cut].to_string());
        remaining = &remaining[cut..];
    }
    out
}

/// Largest char boundary at or below `idx`.
fn boundary_before(s: &str, idx: usize) -> usize {
    let mut i = idx.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
