//! Utility functions and helpers.

pub mod http;

use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a displayed price like `"1.250 € VB"` into whole euros.
///
/// Returns `None` for empty or non-numeric prices (e.g. "VB" alone).
pub fn parse_price(text: &str) -> Option<u32> {
    let digits: String = text
        .replace("VB", "")
        .replace('€', "")
        .replace('.', "")
        .split_whitespace()
        .collect();

    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
