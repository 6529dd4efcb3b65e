//! Utility functions shared by the codec, template and store.
//!
//! - HTML attribute escaping (description meta tag)
//! - Percent-escape detection
//! - UTF-16 code unit helpers
//! - Token generation and validation

use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;

static PERCENT_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"%[0-9A-Fa-f]{2}").unwrap());

// ---------------------------------------------------------------------------
// HTML Attribute Escaping
// ---------------------------------------------------------------------------

/// Escape a string for a double-quoted HTML attribute value.
pub fn escape_html_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse [`escape_html_attr`]. Unknown entities are left untouched.
pub fn unescape_html_attr(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let (replacement, consumed) = if rest.starts_with("&amp;") {
            ('&', 5)
        } else if rest.starts_with("&quot;") {
            ('"', 6)
        } else if rest.starts_with("&lt;") {
            ('<', 4)
        } else if rest.starts_with("&gt;") {
            ('>', 4)
        } else if rest.starts_with("&#39;") {
            ('\'', 5)
        } else {
            ('&', 1)
        };
        out.push(replacement);
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Transport Helpers
// ---------------------------------------------------------------------------

/// Whether the string carries at least one `%XX` escape.
pub fn has_percent_escapes(s: &str) -> bool {
    PERCENT_ESCAPE.is_match(s)
}

/// Length in UTF-16 code units, the unit the size thresholds are expressed in.
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Generate a short alphanumeric token. Not cryptographic, and collisions are
/// not checked.
pub fn generate_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len.max(1))
        .map(char::from)
        .collect()
}

/// Tokens are plain ASCII alphanumerics. Anything else never names an entry.
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_alphanumeric())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
