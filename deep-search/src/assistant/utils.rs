use std::time::{SystemTime, UNIX_EPOCH};

use super::state::ExtractedDocument;

/// Removes `<think>...</think>` blocks emitted by reasoning models.
pub fn strip_think_tags(text: &str) -> String {
    let mut out = text.to_string();
    while let Some(start) = out.find("<think>") {
        match out[start..].find("</think>") {
            Some(rel_end) => {
                let end = start + rel_end + "</think>".len();
                out.replace_range(start..end, "");
            }
            // Unterminated block: the rest is still reasoning.
            None => out.truncate(start),
        }
    }
    out.trim().to_string()
}

/// Truncates to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", text[..byte_idx].trim_end()),
        None => text.to_string(),
    }
}

/// Collapses runs of spaces and keeps at most one blank line between blocks.
pub fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut newlines = 0u32;

    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            pending_space = false;
        } else if ch.is_whitespace() {
            pending_space = true;
        } else {
            if !result.is_empty() {
                if newlines > 0 {
                    result.push_str(if newlines > 1 { "\n\n" } else { "\n" });
                } else if pending_space {
                    result.push(' ');
                }
            }
            newlines = 0;
            pending_space = false;
            result.push(ch);
        }
    }

    result
}

/// Renders Ok documents as the context block for report synthesis.
pub fn format_documents(documents: &[&ExtractedDocument]) -> String {
    documents
        .iter()
        .filter_map(|doc| {
            doc.text.as_ref().map(|text| {
                format!(
                    "Source: {}\nTitle: {}\nGenerated Query: {}\nContent:\n{}\n\n---\n",
                    doc.source.url, doc.source.title, doc.source.query, text
                )
            })
        })
        .collect::<Vec<String>>()
        .join("\n")
}

pub fn format_sources(sources: &[String]) -> String {
    sources
        .iter()
        .map(|url| format!("* {}", url))
        .collect::<Vec<String>>()
        .join("\n")
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
