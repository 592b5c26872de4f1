//! Input validation for Jot.
//!
//! This module provides validation for note fields at the mutation
//! boundary. All validators return `JotError::Validation` on failure.
//!
//! Content is a rich-text/HTML string produced by the editing surface.
//! The editor is expected to sanitize before handing content over, but
//! this layer strips active markup again so that nothing executable is
//! ever persisted, whichever backend the note lands in.

use crate::error::{JotError, JotResult};

pub const MAX_TITLE_LENGTH: usize = 500;
pub const MAX_CONTENT_LENGTH: usize = 100_000; // 100KB of markup

/// Tags whose entire element (including body) is dropped.
const STRIPPED_ELEMENTS: [&str; 3] = ["script", "iframe", "object"];

/// Validate a note title.
pub fn validate_title(title: &str) -> JotResult<()> {
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(JotError::validation(
            "title",
            format!("must be at most {} characters", MAX_TITLE_LENGTH),
        ));
    }
    Ok(())
}

/// Validate note content length.
pub fn validate_content(content: &str) -> JotResult<()> {
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(JotError::validation(
            "content",
            format!("must be at most {} bytes", MAX_CONTENT_LENGTH),
        ));
    }
    Ok(())
}

/// Strip active markup from rich-text content.
///
/// Removes `<script>`, `<iframe>` and `<object>` elements wholesale and
/// drops inline `on*=` event handler attributes from remaining tags.
/// Formatting markup (`<b>`, `<ul>`, headings and the like) passes
/// through untouched.
pub fn sanitize_content(content: &str) -> String {
    let mut out = strip_elements(content);
    out = strip_event_handlers(&out);
    out
}

fn strip_elements(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let lower = content.to_ascii_lowercase();
    let mut pos = 0;

    'outer: while pos < content.len() {
        for tag in STRIPPED_ELEMENTS {
            let open = format!("<{}", tag);
            if lower[pos..].starts_with(&open) {
                let close = format!("</{}>", tag);
                match lower[pos..].find(&close) {
                    Some(end) => {
                        pos += end + close.len();
                        continue 'outer;
                    }
                    None => {
                        // Unclosed element: drop through end of input.
                        return out;
                    }
                }
            }
        }
        // Advance one character (char-boundary safe).
        let ch_len = content[pos..].chars().next().map(char::len_utf8).unwrap_or(1);
        out.push_str(&content[pos..pos + ch_len]);
        pos += ch_len;
    }

    out
}

fn strip_event_handlers(content: &str) -> String {
    let mut out = String::with_capacity(content.len());

    for (i, segment) in content.split('<').enumerate() {
        if i == 0 {
            out.push_str(segment);
            continue;
        }
        out.push('<');
        match segment.find('>') {
            Some(end) => {
                out.push_str(&strip_handlers_from_tag(&segment[..end]));
                out.push_str(&segment[end..]);
            }
            None => out.push_str(segment),
        }
    }

    out
}

fn strip_handlers_from_tag(tag: &str) -> String {
    split_attributes(tag)
        .into_iter()
        .enumerate()
        .filter(|(i, attr)| {
            // Keep the tag name, drop on*= attributes.
            *i == 0 || !attr.to_ascii_lowercase().starts_with("on")
        })
        .map(|(_, attr)| attr)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a tag interior into attribute tokens. Whitespace inside a
/// quoted value does not end the token, so `alt="a picture"` stays one
/// attribute.
fn split_attributes(tag: &str) -> Vec<&str> {
    let bytes = tag.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }
        let start = pos;
        let mut quote: Option<u8> = None;
        while pos < bytes.len() {
            let b = bytes[pos];
            match quote {
                Some(q) => {
                    if b == q {
                        quote = None;
                    }
                }
                None => {
                    if b == b'"' || b == b'\'' {
                        quote = Some(b);
                    } else if b.is_ascii_whitespace() {
                        break;
                    }
                }
            }
            pos += 1;
        }
        tokens.push(&tag[start..pos]);
    }

    tokens
}
