//! Overlapping token-window chunker.
//!
//! Splits document body text into fixed-size windows of whitespace tokens.
//! Consecutive chunks share exactly `overlap` tokens: each chunk after the
//! first starts `overlap` tokens before the previous chunk's end. Window
//! ends are nudged to a nearby sentence or paragraph break when one exists
//! within a small tolerance, and the next window start follows the nudged
//! end, so the exact-overlap invariant survives nudging.
//!
//! Each chunk receives a deterministic id derived from its document id and
//! sequence index, plus a SHA-256 hash of its text for staleness detection.
//! Identical input text and parameters reproduce identical chunks, which is
//! what makes re-syncing an unchanged document a no-op.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Largest distance (in tokens) a window end may be pulled back to land on
/// a sentence or paragraph break.
const MAX_BOUNDARY_TOLERANCE: usize = 20;

/// Split text into overlapping chunks of `chunk_size` tokens.
///
/// `overlap` must be < `chunk_size`; [`crate::config::validate`] enforces
/// this before any chunking happens. A document shorter than `chunk_size`
/// tokens yields exactly one chunk. Empty text yields one empty chunk.
pub fn chunk_document(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Vec<Chunk> {
    debug_assert!(overlap < chunk_size);

    let spans = tokenize(text);
    if spans.is_empty() {
        return vec![make_chunk(document_id, 0, "", 0)];
    }

    let n = spans.len();
    let tolerance = boundary_tolerance(chunk_size, overlap);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    loop {
        let mut end = (start + chunk_size).min(n);
        if end < n {
            if let Some(nudged) = nudge_to_boundary(text, &spans, start, end, tolerance) {
                // Never pull back past the overlap region of the next chunk.
                if nudged > start + overlap {
                    end = nudged;
                }
            }
        }

        let slice = &text[spans[start].0..spans[end - 1].1];
        chunks.push(make_chunk(document_id, index, slice, end - start));
        index += 1;

        if end >= n {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Byte spans of whitespace-delimited tokens.
fn tokenize(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut token_start: Option<usize> = None;

    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = token_start.take() {
                spans.push((s, i));
            }
        } else if token_start.is_none() {
            token_start = Some(i);
        }
    }
    if let Some(s) = token_start {
        spans.push((s, text.len()));
    }
    spans
}

fn boundary_tolerance(chunk_size: usize, overlap: usize) -> usize {
    // Keep the tolerance well inside the stride so nudging can never
    // stall forward progress.
    ((chunk_size - overlap) / 4).min(MAX_BOUNDARY_TOLERANCE)
}

/// Look backwards from the computed cut point for a sentence end or a
/// paragraph break. Returns the nudged end (exclusive token index).
fn nudge_to_boundary(
    text: &str,
    spans: &[(usize, usize)],
    start: usize,
    end: usize,
    tolerance: usize,
) -> Option<usize> {
    let floor = end.saturating_sub(tolerance).max(start + 1);
    for candidate in (floor..end).rev() {
        let token = &text[spans[candidate - 1].0..spans[candidate - 1].1];
        if token.ends_with(['.', '!', '?']) || token.ends_with("\".") || token.ends_with("\")") {
            return Some(candidate);
        }
        // Paragraph break between this token and the next.
        let gap = &text[spans[candidate - 1].1..spans[candidate].0];
        if gap.contains("\n\n") {
            return Some(candidate);
        }
    }
    None
}

fn make_chunk(document_id: &str, index: i64, text: &str, token_count: usize) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        chunk_id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        sequence_index: index,
        text: text.to_string(),
        token_count,
        content_hash: hash,
    }
}

/// Deterministic chunk id: a function of document id and sequence index.
pub fn chunk_id(document_id: &str, index: i64) -> String {
    format!("{}_chunk_{}", document_id, index)
}
