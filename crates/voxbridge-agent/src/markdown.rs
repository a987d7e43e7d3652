// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Markdown preparation for speech.
//!
//! Two transforms run on every reply block before action parsing:
//! - [`sanitize_tables`] — a markdown table read aloud cell-by-cell is
//!   unintelligible, so tables are flattened to "header: value" prose (or
//!   stripped, or kept, per config).
//! - [`append_media_notices`] — the bridge does not transport media; any
//!   image or media-file URL the block references is appended as a
//!   bracketed notice instead.

use pulldown_cmark::{Event, Options, Parser, Tag};
use voxbridge_config::TableMode;

const MEDIA_EXTENSIONS: [&str; 13] = [
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "svg", "mp3", "wav", "ogg", "m4a", "mp4", "webm",
];

fn parser_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options
}

/// Rewrite markdown tables in `text` according to `mode`.
pub fn sanitize_tables(text: &str, mode: TableMode) -> String {
    if mode == TableMode::Keep {
        return text.to_string();
    }

    // Start-event ranges span the whole element, so one pass collects every
    // table's byte span. Tables cannot nest; the spans are disjoint.
    let spans: Vec<std::ops::Range<usize>> = Parser::new_ext(text, parser_options())
        .into_offset_iter()
        .filter_map(|(event, range)| match event {
            Event::Start(Tag::Table(_)) => Some(range),
            _ => None,
        })
        .collect();
    if spans.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in spans {
        out.push_str(&text[cursor..span.start]);
        if mode == TableMode::Flatten {
            out.push_str(&flatten_table(&text[span.clone()]));
            out.push('\n');
        }
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Rewrite one table source block as "header: value" prose, one sentence
/// per data row.
fn flatten_table(table: &str) -> String {
    let mut header: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();

    for line in table.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cells = split_row(line);
        if cells.is_empty() || is_separator_row(&cells) {
            continue;
        }
        if header.is_empty() {
            header = cells;
        } else {
            rows.push(cells);
        }
    }

    if rows.is_empty() {
        let mut line = header.join(", ");
        line.push('.');
        return line;
    }

    rows.iter()
        .map(|row| {
            let mut sentence = header
                .iter()
                .zip(row.iter())
                .map(|(h, v)| format!("{h}: {v}"))
                .collect::<Vec<_>>()
                .join(", ");
            sentence.push('.');
            sentence
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_row(line: &str) -> Vec<String> {
    line.trim()
        .trim_start_matches('|')
        .trim_end_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_string())
        .filter(|cell| !cell.is_empty())
        .collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    cells.iter().all(|cell| {
        let trimmed = cell.trim_start_matches(':').trim_end_matches(':');
        !trimmed.is_empty() && trimmed.chars().all(|c| c == '-')
    })
}

/// Append a `[media: <url>]` notice for every image or media-file URL the
/// block references.
pub fn append_media_notices(text: &str) -> String {
    let mut urls: Vec<String> = Vec::new();
    for (event, _) in Parser::new_ext(text, parser_options()).into_offset_iter() {
        match event {
            Event::Start(Tag::Image { dest_url, .. }) => {
                push_unique(&mut urls, dest_url.as_ref());
            }
            Event::Start(Tag::Link { dest_url, .. }) if is_media_url(dest_url.as_ref()) => {
                push_unique(&mut urls, dest_url.as_ref());
            }
            _ => {}
        }
    }
    if urls.is_empty() {
        return text.to_string();
    }
    let mut out = text.trim_end().to_string();
    for url in urls {
        out.push_str("\n[media: ");
        out.push_str(&url);
        out.push(']');
    }
    out
}

fn push_unique(urls: &mut Vec<String>, url: &str) {
    if !urls.iter().any(|u| u == url) {
        urls.push(url.to_string());
    }
}

fn is_media_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit_once('.') {
        Some((_, ext)) => MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
