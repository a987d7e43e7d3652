// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Prose chunking: split long reply text into speak-sized pieces.
//!
//! A TTS front-end speaks one `speak` action at a time; bounding each chunk
//! keeps barge-in responsive. Sentence mode packs whole sentences up to the
//! limit and falls back to word packing for a sentence that alone exceeds
//! it; word mode packs words directly. A single word longer than the limit
//! is hard-split on char boundaries.

use voxbridge_config::ChunkMode;

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into chunks of at most `limit` characters.
pub fn chunk_text(text: &str, limit: usize, mode: ChunkMode) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if limit == 0 || char_len(text) <= limit {
        return vec![text.to_string()];
    }

    let units: Vec<String> = match mode {
        ChunkMode::Sentence => split_sentences(text),
        ChunkMode::Word => text.split_whitespace().map(str::to_string).collect(),
    };

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for unit in units {
        if char_len(&unit) > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(split_oversize(&unit, limit, mode));
            continue;
        }
        let sep = usize::from(!current.is_empty());
        if char_len(&current) + sep + char_len(&unit) <= limit {
            if sep == 1 {
                current.push(' ');
            }
            current.push_str(&unit);
        } else {
            chunks.push(std::mem::take(&mut current));
            current = unit;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_oversize(unit: &str, limit: usize, mode: ChunkMode) -> Vec<String> {
    match mode {
        // An oversize sentence is repacked at word granularity.
        ChunkMode::Sentence => chunk_text(unit, limit, ChunkMode::Word),
        // An oversize word can only be hard-split.
        ChunkMode::Word => hard_split(unit, limit),
    }
}

fn hard_split(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

/// Split prose into sentences. A sentence ends at `.`, `!`, or `?` followed
/// by whitespace or end of text; text without terminators is one sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_end = match chars.peek() {
                None => true,
                Some((_, next)) => next.is_whitespace(),
            };
            if at_end {
                let end = idx + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    out.push(sentence.to_string());
                }
                start = end;
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail.to_string());
    }
    if out.is_empty() {
        out.push(text.trim().to_string());
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
