#![forbid(unsafe_code)]

//! Turns arbitrary display titles into tokens that are safe to embed in file
//! names. Cleanup of superseded artifacts matches on this output, so every
//! title-derived name must go through here.

/// Fallback key used when a title has no word characters at all.
pub const UNTITLED: &str = "untitled";

/// Drops everything except ASCII word characters and whitespace, then
/// collapses each whitespace run into a single underscore.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut in_whitespace = false;
    for c in title.chars() {
        if is_title_space(c) {
            if !in_whitespace {
                out.push('_');
                in_whitespace = true;
            }
        } else if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            in_whitespace = false;
        }
        // Removed characters do not end a whitespace run: "a - b" becomes "a_b".
    }
    out
}

/// The ECMAScript `\s` class, which existing file names were built with.
/// Unlike [`char::is_whitespace`] it includes U+FEFF and leaves out U+0085.
fn is_title_space(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\u{0B}' | '\u{0C}' | '\r' | ' '
            | '\u{A0}'
            | '\u{1680}'
            | '\u{2000}'..='\u{200A}'
            | '\u{2028}'
            | '\u{2029}'
            | '\u{202F}'
            | '\u{205F}'
            | '\u{3000}'
            | '\u{FEFF}'
    )
}

/// Sanitized title used as the artifact grouping key. Never empty.
pub fn title_key(title: &str) -> String {
    let sanitized = sanitize_title(title);
    if sanitized.is_empty() {
        UNTITLED.to_string()
    } else {
        sanitized
    }
}
