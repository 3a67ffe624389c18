//! Utility functions and helpers.

pub mod http;

use unicode_segmentation::UnicodeSegmentation;
use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> Result<String, url::ParseError> {
    base.join(href.trim()).map(|u| u.to_string())
}

/// Canonical form of a posting URL: absolute, without query or fragment.
///
/// Result pages decorate links with per-request tracking parameters, so the
/// bare path is what identifies a posting across runs.
pub fn canonical_url(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.set_query(None);
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// Split text into chunks of at most `max_chars` characters without
/// breaking grapheme clusters.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for grapheme in text.graphemes(true) {
        let len = grapheme.chars().count();
        if current_len + len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(grapheme);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Truncate text to at most `max_chars` characters, ellipsis included,
/// without breaking grapheme clusters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    const ELLIPSIS: &str = "...";

    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let (budget, marker) = if max_chars > ELLIPSIS.len() {
        (max_chars - ELLIPSIS.len(), ELLIPSIS)
    } else {
        (max_chars, "")
    };

    let mut out = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let len = grapheme.chars().count();
        if used + len > budget {
            break;
        }
        out.push_str(grapheme);
        used += len;
    }
    out.push_str(marker);
    out
}

/// Make a destination id safe for use as a file name or object key.
pub fn partition_name(destination_id: &str) -> String {
    let name: String = destination_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() { "_".to_string() } else { name }
}
