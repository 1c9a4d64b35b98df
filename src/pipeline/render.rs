//! Render stage
//!
//! Produces canonical line-numbered text from XML/HTML or plain bytes.
//! Binary formats (PDF, DOCX) need an external renderer and route to
//! review; everything downstream consumes only the canonical text.

use super::ReviewRouted;
use anyhow::{anyhow, Result};

/// Render raw document bytes to canonical text. Line numbers are implied by
/// the newline structure, which is stable from here on.
pub fn render_text(bytes: &[u8]) -> Result<String> {
    if bytes.starts_with(b"%PDF") {
        return Err(anyhow!(ReviewRouted(
            "PDF input requires the external renderer".into()
        )));
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return Err(anyhow!(ReviewRouted(
            "DOCX input requires the external renderer".into()
        )));
    }

    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_start();
    let rendered = if trimmed.starts_with('<') {
        strip_markup(&text)
    } else {
        text.to_string()
    };
    Ok(normalize_lines(&rendered))
}

/// Line number (1-based) containing a char offset in canonical text.
pub fn line_of_offset(text: &str, offset: usize) -> usize {
    text.as_bytes()
        .iter()
        .take(offset.min(text.len()))
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

/// Drop tags, keep text content, decode the common entities. A scanner is
/// enough for the feed formats we ingest; malformed markup degrades to
/// text, not an error.
fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len() / 2);
    let mut in_tag = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '<' => {
                in_tag = true;
                // Block-level closers become line breaks so the canonical
                // text keeps paragraph structure.
                let tag: String = chars.clone().take(12).collect();
                let lower = tag.to_ascii_lowercase();
                if lower.starts_with('/')
                    && (lower.starts_with("/p") || lower.starts_with("/div")
                        || lower.starts_with("/tr") || lower.starts_with("/h"))
                    || lower.starts_with("br")
                {
                    out.push('\n');
                }
            }
            '>' => in_tag = false,
            _ if in_tag => {}
            '&' => {
                let entity: String = chars.clone().take(6).collect();
                let (decoded, len) = decode_entity(&entity);
                out.push_str(decoded);
                for _ in 0..len {
                    chars.next();
                }
            }
            c => out.push(c),
        }
    }
    out
}

fn decode_entity(rest: &str) -> (&'static str, usize) {
    for (pat, out) in [
        ("amp;", "&"),
        ("lt;", "<"),
        ("gt;", ">"),
        ("quot;", "\""),
        ("apos;", "'"),
        ("nbsp;", " "),
    ] {
        if rest.starts_with(pat) {
            return (out, pat.len());
        }
    }
    ("&", 0)
}

/// Trim trailing whitespace per line and collapse runs of blank lines to
/// one, so offsets stay stable across refetches of equivalent markup.
fn normalize_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through_normalized() {
        let rendered = render_text(b"line one  \n\n\n\nline two\n").unwrap();
        assert_eq!(rendered, "line one\n\nline two\n");
    }

    #[test]
    fn test_markup_is_stripped_with_paragraph_breaks() {
        let html = b"<html><body><p>HTS 8544.42.90 &amp; others</p><p>25% duty</p></body></html>";
        let rendered = render_text(html).unwrap();
        assert!(rendered.contains("HTS 8544.42.90 & others"));
        assert!(rendered.contains("25% duty"));
        // The two paragraphs land on separate lines.
        let lines: Vec<&str> = rendered.lines().filter(|l| !l.trim().is_empty()).collect();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_binary_formats_route_to_review() {
        let err = render_text(b"%PDF-1.7 ...").unwrap_err();
        assert!(err.downcast_ref::<ReviewRouted>().is_some());
        let err = render_text(b"PK\x03\x04word/document.xml").unwrap_err();
        assert!(err.downcast_ref::<ReviewRouted>().is_some());
    }

    #[test]
    fn test_line_of_offset() {
        let text = "first\nsecond\nthird\n";
        assert_eq!(line_of_offset(text, 0), 1);
        assert_eq!(line_of_offset(text, 6), 2);
        assert_eq!(line_of_offset(text, 13), 3);
    }
}
