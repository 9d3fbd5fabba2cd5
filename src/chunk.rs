//! Budget-bounded chunker over extracted units.
//!
//! Packs whole units greedily into [`Chunk`]s under a token budget so no
//! chunk boundary splits inside a unit — unless a single unit alone exceeds
//! the budget, in which case that unit is sub-split at sentence, line, then
//! word boundaries, every piece still tagged with the originating ordinal.
//!
//! Chunk ids are deterministic (document id + sequence), so re-chunking an
//! unchanged document yields identical output. Each chunk carries a SHA-256
//! hash of its text.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, NormalizedDocument};

/// Approximate chars-per-token ratio for budget estimation.
const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count for a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Split a normalized document into ordered chunks under
/// `size_budget_tokens`. Zero extractable units produce an empty sequence,
/// not an error — the orchestrator decides whether that ends the run.
pub fn chunk_units(doc: &NormalizedDocument, size_budget_tokens: usize) -> Vec<Chunk> {
    let budget_chars = size_budget_tokens * CHARS_PER_TOKEN;

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut buf = String::new();
    let mut buf_ordinals: Vec<u32> = Vec::new();

    let flush = |buf: &mut String, ordinals: &mut Vec<u32>, chunks: &mut Vec<Chunk>| {
        if !buf.is_empty() {
            let sequence = chunks.len() as u32;
            chunks.push(make_chunk(
                &doc.document_id,
                sequence,
                std::mem::take(ordinals),
                buf,
            ));
            buf.clear();
        }
    };

    for unit in doc.units.iter().filter(|u| !u.text.is_empty()) {
        // Units over the budget get their own sub-split chunks.
        if unit.text.len() > budget_chars {
            flush(&mut buf, &mut buf_ordinals, &mut chunks);
            for piece in split_oversized(&unit.text, budget_chars) {
                let sequence = chunks.len() as u32;
                chunks.push(make_chunk(
                    &doc.document_id,
                    sequence,
                    vec![unit.ordinal],
                    &piece,
                ));
            }
            continue;
        }

        let would_be = if buf.is_empty() {
            unit.text.len()
        } else {
            buf.len() + 2 + unit.text.len() // +2 for \n\n separator
        };
        if would_be > budget_chars {
            flush(&mut buf, &mut buf_ordinals, &mut chunks);
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(&unit.text);
        buf_ordinals.push(unit.ordinal);
    }

    flush(&mut buf, &mut buf_ordinals, &mut chunks);
    chunks
}

/// Split one oversized text at the best boundary below `budget_chars`:
/// sentence end, then newline, then space, then a hard cut.
fn split_oversized(text: &str, budget_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= budget_chars {
            pieces.push(remaining.trim().to_string());
            break;
        }

        let mut limit = budget_chars;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let window = &remaining[..limit];
        let split_at = window
            .rfind(". ")
            .map(|pos| pos + 2)
            .or_else(|| window.rfind('\n').map(|pos| pos + 1))
            .or_else(|| window.rfind(' ').map(|pos| pos + 1))
            .unwrap_or(limit);

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
    pieces
}

fn make_chunk(document_id: &str, sequence: u32, unit_ordinals: Vec<u32>, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}-c{:04}", document_id, sequence),
        document_id: document_id.to_string(),
        sequence,
        unit_ordinals,
        text: text.to_string(),
        estimated_tokens: estimate_tokens(text),
        hash,
    }
}
