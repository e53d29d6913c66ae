//! Paragraph-boundary text chunker.
//!
//! Splits document body text into [`Chunk`]s of at most roughly
//! `max_tokens` tokens. Paragraphs (`\n\n`-separated) are packed greedily;
//! a paragraph larger than the budget is hard-split at the last newline or
//! space before the limit. With `overlap_tokens > 0`, each chunk after the
//! first starts with the tail of its predecessor, and the packing budget
//! shrinks by the same amount so chunks stay within `max_tokens`.
//!
//! Chunk ids are `"{document_id}:{index}"`, so the same corpus always yields
//! the same ids; each chunk also carries a SHA-256 of its text.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Chunks a document's body. Whitespace-only bodies yield no chunks.
pub fn chunk_document(doc: &Document, config: &ChunkingConfig) -> Vec<Chunk> {
    split_text(&doc.body, config.max_tokens, config.overlap_tokens)
        .into_iter()
        .enumerate()
        .map(|(index, text)| make_chunk(doc, index, text))
        .collect()
}

/// Splits `text` into chunk bodies. Indices are implied by position.
pub fn split_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = (overlap_tokens * CHARS_PER_TOKEN).min(max_chars / 2);
    let budget = max_chars - overlap_chars;

    let pieces = pack_paragraphs(text, budget);
    if overlap_chars == 0 {
        return pieces;
    }

    let mut out: Vec<String> = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        if i == 0 {
            out.push(piece.clone());
            continue;
        }
        let tail = overlap_tail(&pieces[i - 1], overlap_chars);
        if tail.is_empty() {
            out.push(piece.clone());
        } else {
            out.push(format!("{tail} {piece}"));
        }
    }
    out
}

fn pack_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current.is_empty() {
            trimmed.len()
        } else {
            current.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(trimmed);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Splits an oversized paragraph, preferring newline then space boundaries.
fn hard_split(paragraph: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let split_at = if remaining.len() <= max_chars {
            remaining.len()
        } else {
            let limit = floor_char_boundary(remaining, max_chars);
            let window = &remaining[..limit];
            match window.rfind('\n').or_else(|| window.rfind(' ')) {
                Some(pos) if pos > 0 => pos + 1,
                _ if limit > 0 => limit,
                // A single char wider than the budget.
                _ => remaining
                    .char_indices()
                    .nth(1)
                    .map(|(i, _)| i)
                    .unwrap_or(remaining.len()),
            }
        };

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

/// The last ~`max_chars` bytes of `text`, starting at a word boundary.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text.trim();
    }
    let start = ceil_char_boundary(text, text.len() - max_chars);
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim(),
        None => tail.trim(),
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn make_chunk(doc: &Document, index: usize, text: String) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));

    Chunk {
        id: format!("{}:{}", doc.id, index),
        document_id: doc.id.clone(),
        source_path: doc.source_path.clone(),
        chunk_index: index,
        text,
        hash,
    }
}
