//! Sliding-window text chunker.
//!
//! Splits a document's text into overlapping windows of `chunk_size`
//! whitespace-delimited tokens with `chunk_overlap` tokens shared between
//! consecutive windows. Text shorter than one window yields exactly one
//! chunk, so every document is retrievable.
//!
//! Each chunk receives a deterministic id derived from the document id and
//! its ordinal, so re-indexing a document reproduces the same chunk ids.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Derive the chunk id for `(document_id, ordinal)`.
pub fn chunk_id(document_id: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b":");
    hasher.update(ordinal.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split `text` into overlapping token windows. Returns at least one chunk.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    debug_assert!(chunk_size > 0 && chunk_overlap < chunk_size);

    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() <= chunk_size {
        return vec![tokens.join(" ")];
    }

    let step = chunk_size - chunk_overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < tokens.len() {
        let end = (start + chunk_size).min(tokens.len());
        chunks.push(tokens[start..end].join(" "));
        if end == tokens.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Chunk the concatenation of a document's title and content and assign
/// ordinals and deterministic ids.
pub fn build_chunks(
    document_id: &str,
    title: &str,
    content: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    let full_text = if title.is_empty() {
        content.to_string()
    } else {
        format!("{} {}", title, content)
    };

    chunk_text(&full_text, chunk_size, chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(ordinal, text)| Chunk {
            id: chunk_id(document_id, ordinal),
            document_id: document_id.to_string(),
            ordinal,
            text,
        })
        .collect()
}
