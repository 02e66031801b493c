//! # Citation Markers
//!
//! Paragraph text stores each recognised citation wrapped in a positional
//! marker: `<cite id="cit_004">42 U.S.C. § 1983</cite>`. This module converts
//! between marked text and plain text plus spans.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const OPEN_PREFIX: &str = "<cite id=\"";
const OPEN_START: &str = "<cite";
const CLOSE_TAG: &str = "</cite>";

/// A marked span, as byte offsets into the plain text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedSpan {
    pub id: String,
    pub start: usize,
    pub end: usize,
}

/// Paragraph text with markers removed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarkedText {
    pub plain: String,
    pub spans: Vec<MarkedSpan>,
}

impl MarkedText {
    pub fn span(&self, id: &str) -> Option<&MarkedSpan> {
        self.spans.iter().find(|s| s.id == id)
    }

    pub fn span_text(&self, span: &MarkedSpan) -> &str {
        &self.plain[span.start..span.end]
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarkerError {
    #[error("malformed citation marker at byte {offset}")]
    MalformedOpenTag { offset: usize },
    #[error("citation marker at byte {offset} has an empty id")]
    MissingId { offset: usize },
    #[error("citation marker nested inside another marker at byte {offset}")]
    Nested { offset: usize },
    #[error("closing marker without an opening marker at byte {offset}")]
    UnmatchedClose { offset: usize },
    #[error("citation marker {id} is never closed")]
    Unclosed { id: String },
    #[error("citation marker {id} appears more than once")]
    DuplicateId { id: String },
}

enum Next {
    Open(usize),
    Close(usize),
    End,
}

/// Split marked text into plain text and spans
pub fn parse(text: &str) -> Result<MarkedText, MarkerError> {
    let mut plain = String::with_capacity(text.len());
    let mut spans: Vec<MarkedSpan> = Vec::new();
    let mut open: Option<(String, usize)> = None;
    let mut rest = text;
    let mut offset = 0usize;

    loop {
        let next = match (rest.find(OPEN_START), rest.find(CLOSE_TAG)) {
            (None, None) => Next::End,
            (Some(o), Some(c)) if c < o => Next::Close(c),
            (Some(o), _) => Next::Open(o),
            (None, Some(c)) => Next::Close(c),
        };

        match next {
            Next::End => {
                plain.push_str(rest);
                break;
            }
            Next::Open(o) => {
                plain.push_str(&rest[..o]);
                let at = offset + o;
                if open.is_some() {
                    return Err(MarkerError::Nested { offset: at });
                }
                let tag = &rest[o..];
                if !tag.starts_with(OPEN_PREFIX) {
                    return Err(MarkerError::MalformedOpenTag { offset: at });
                }
                let after = &tag[OPEN_PREFIX.len()..];
                let quote = after
                    .find('"')
                    .ok_or(MarkerError::MalformedOpenTag { offset: at })?;
                if !after[quote + 1..].starts_with('>') {
                    return Err(MarkerError::MalformedOpenTag { offset: at });
                }
                let id = after[..quote].trim();
                if id.is_empty() {
                    return Err(MarkerError::MissingId { offset: at });
                }
                if spans.iter().any(|s| s.id == id) {
                    return Err(MarkerError::DuplicateId { id: id.to_string() });
                }
                open = Some((id.to_string(), plain.len()));

                let consumed = o + OPEN_PREFIX.len() + quote + 2;
                offset += consumed;
                rest = &rest[consumed..];
            }
            Next::Close(c) => {
                plain.push_str(&rest[..c]);
                let (id, start) = open
                    .take()
                    .ok_or(MarkerError::UnmatchedClose { offset: offset + c })?;
                spans.push(MarkedSpan {
                    id,
                    start,
                    end: plain.len(),
                });

                let consumed = c + CLOSE_TAG.len();
                offset += consumed;
                rest = &rest[consumed..];
            }
        }
    }

    if let Some((id, _)) = open {
        return Err(MarkerError::Unclosed { id });
    }

    Ok(MarkedText { plain, spans })
}

/// Wrap spans of plain text in markers. Spans must not overlap.
pub fn render(plain: &str, spans: &[MarkedSpan]) -> String {
    let mut ordered: Vec<&MarkedSpan> = spans.iter().collect();
    ordered.sort_by_key(|s| s.start);

    let mut out = String::with_capacity(plain.len() + spans.len() * 24);
    let mut cursor = 0;
    for span in ordered {
        out.push_str(&plain[cursor..span.start]);
        out.push_str(OPEN_PREFIX);
        out.push_str(&span.id);
        out.push_str("\">");
        out.push_str(&plain[span.start..span.end]);
        out.push_str(CLOSE_TAG);
        cursor = span.end;
    }
    out.push_str(&plain[cursor..]);
    out
}

/// Plain text of a stored paragraph. Stored text is always well formed; if it
/// somehow is not, the raw text is returned unchanged.
pub fn strip(text: &str) -> String {
    parse(text).map(|m| m.plain).unwrap_or_else(|_| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let text = "See <cite id=\"cit_001\">42 U.S.C. § 1983</cite> and more.";
        let marked = parse(text).unwrap();

        assert_eq!(marked.plain, "See 42 U.S.C. § 1983 and more.");
        assert_eq!(marked.spans.len(), 1);
        assert_eq!(marked.span_text(&marked.spans[0]), "42 U.S.C. § 1983");
        assert_eq!(render(&marked.plain, &marked.spans), text);
    }

    #[test]
    fn test_plain_text_has_no_spans() {
        let marked = parse("Nothing cited here.").unwrap();
        assert!(marked.spans.is_empty());
        assert_eq!(marked.plain, "Nothing cited here.");
    }

    #[test]
    fn test_malformed_markers_are_rejected() {
        assert!(matches!(
            parse("a <cite id=\"cit_001\">x"),
            Err(MarkerError::Unclosed { .. })
        ));
        assert!(matches!(
            parse("a </cite> b"),
            Err(MarkerError::UnmatchedClose { .. })
        ));
        assert!(matches!(
            parse("<cite id=\"\">x</cite>"),
            Err(MarkerError::MissingId { .. })
        ));
        assert!(matches!(
            parse("<cite id=\"a\"><cite id=\"b\">x</cite></cite>"),
            Err(MarkerError::Nested { .. })
        ));
        assert!(matches!(
            parse("<cite foo>x</cite>"),
            Err(MarkerError::MalformedOpenTag { .. })
        ));
        assert!(matches!(
            parse("<cite id=\"a\">x</cite> <cite id=\"a\">y</cite>"),
            Err(MarkerError::DuplicateId { .. })
        ));
    }

    #[test]
    fn test_strip_is_lenient() {
        assert_eq!(strip("<cite id=\"c\">x</cite>!"), "x!");
        assert_eq!(strip("broken </cite>"), "broken </cite>");
    }
}
