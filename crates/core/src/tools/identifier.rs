//! # Citation Identifier
//!
//! Rule-based extraction of raw citation spans (Tier 1). Each rule is a regex
//! for one citation family; overlapping hits are resolved in favour of the
//! earliest, longest span so a full case citation is never split into a bare
//! reporter reference.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Citation family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CitationType {
    Case,
    Statute,
    Regulation,
    Rule,
    #[default]
    Unknown,
}

/// Structural pieces pulled out of a citation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CitationComponents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parties: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_cite: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub court: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// A citation found in plain text; offsets are bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCitation {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub citation_type: CitationType,
    pub components: CitationComponents,
}

/// Words that introduce a citation but are not part of it
const SIGNALS: &[&str] = &[
    "See", "In", "The", "Under", "As", "Accord", "Cf.", "But", "Also", "Compare", "E.g.",
    "Contra", "Following", "Citing",
];

const PARTY: &str = r"[A-Z][A-Za-z0-9.'&\-]*(?:,\s+(?:Inc\.|LLC|Co\.|Corp\.|Ltd\.|N\.A\.|L\.P\.)|\s+(?:[A-Z][A-Za-z0-9.'&\-]*|of|the|and|for|ex|rel\.|&)){0,8}";
const SECTION: &str = r"\d+(?:[.\-]\d+)*[A-Za-z]*(?:\([A-Za-z0-9]+\))*";
const REPORTERS: &str = r"U\.\s?S\.|S\.\s?Ct\.|L\.\s?Ed\.(?:\s?2d)?|F\.(?:\s?Supp\.)?(?:\s?(?:2d|3d|4th))?|F\.\s?App'x|[A-Z][a-z]*\.(?:\s?[A-Z][a-z]*\.)?\s?(?:2d|3d|4th)";

fn rules() -> &'static [(CitationType, Regex)] {
    static RULES: OnceLock<Vec<(CitationType, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        let sources = [
            (
                CitationType::Case,
                format!(
                    r"(?P<p1>{party})\s+v\.\s+(?P<p2>{party}),\s+(?P<volume>\d{{1,4}})\s+(?P<reporter>[A-Z][A-Za-z0-9.\s']{{0,20}}?)\s+(?P<page>\d{{1,5}})\b(?:,\s*(?P<pin>\d{{1,5}}(?:[-–]\d{{1,5}})?))?(?:\s+\((?P<court>[^()]*?)\s*(?P<year>\d{{4}})\))?",
                    party = PARTY
                ),
            ),
            (
                CitationType::Statute,
                format!(
                    r"(?P<title>\d{{1,3}})\s+(?P<code>U\.\s?S\.\s?C\.(?:\s?A\.)?)\s+§§?\s*(?P<section>{section})",
                    section = SECTION
                ),
            ),
            (
                CitationType::Statute,
                format!(
                    r"(?P<code>(?:[A-Z][A-Za-z.]*\s+){{1,4}}(?:Code|Stat\.|Ann\.))\s+§§?\s*(?P<section>{section})",
                    section = SECTION
                ),
            ),
            (
                CitationType::Regulation,
                format!(
                    r"(?P<title>\d{{1,3}})\s+(?P<code>C\.\s?F\.\s?R\.)\s+(?:§§?\s*|[Pp]art\s+)?(?P<section>{section})",
                    section = SECTION
                ),
            ),
            (
                CitationType::Regulation,
                r"(?P<title>\d{1,3})\s+(?P<code>Fed\.\s?Reg\.)\s+(?P<section>\d[\d,]*)".to_string(),
            ),
            (
                CitationType::Rule,
                format!(
                    r"(?P<code>Fed\.\s?R\.\s?(?:Civ\.|Crim\.|App\.|Bankr\.)?\s?(?:P\.|Evid\.))\s+(?P<section>{section})",
                    section = SECTION
                ),
            ),
            (
                CitationType::Unknown,
                format!(
                    r"\b(?P<volume>\d{{1,4}})\s+(?P<reporter>{reporters})\s+(?P<page>\d{{1,5}})\b",
                    reporters = REPORTERS
                ),
            ),
        ];

        sources
            .into_iter()
            .filter_map(|(kind, pattern)| match Regex::new(&pattern) {
                Ok(re) => Some((kind, re)),
                Err(e) => {
                    tracing::error!("Invalid {:?} citation pattern: {}", kind, e);
                    None
                }
            })
            .collect()
    })
}

/// Stateless citation extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct CitationIdentifier;

impl CitationIdentifier {
    pub fn new() -> Self {
        Self
    }

    /// Find every citation in `text`, in order of appearance, non-overlapping
    pub fn identify(&self, text: &str) -> Vec<DetectedCitation> {
        let mut found = Vec::new();
        for (kind, re) in rules() {
            for caps in re.captures_iter(text) {
                if let Some(citation) = detect(text, *kind, &caps) {
                    found.push(citation);
                }
            }
        }

        found.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let mut kept: Vec<DetectedCitation> = Vec::with_capacity(found.len());
        for citation in found {
            if kept.last().map_or(true, |last| citation.start >= last.end) {
                kept.push(citation);
            }
        }
        kept
    }
}

fn detect(text: &str, kind: CitationType, caps: &Captures) -> Option<DetectedCitation> {
    let whole = caps.get(0)?;
    let start = skip_signals(text, whole.start(), whole.end());
    let end = trim_trailing(text, start, whole.end());
    if start >= end {
        return None;
    }

    let group = |name: &str| {
        caps.name(name)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let mut components = CitationComponents {
        volume: group("volume"),
        reporter: group("reporter"),
        page: group("page"),
        pin_cite: group("pin"),
        court: group("court"),
        year: group("year"),
        title: group("title"),
        code: group("code"),
        section: group("section")
            .map(|s| s.trim_end_matches(|c| c == ',' || c == '.').to_string()),
        ..Default::default()
    };

    if let (Some(p1), Some(p2)) = (caps.name("p1"), caps.name("p2")) {
        let first = text.get(start.max(p1.start())..p1.end()).unwrap_or("").trim();
        components.parties = Some(format!("{} v. {}", first, p2.as_str().trim()));
    }
    if kind == CitationType::Statute && components.title.is_none() {
        components.code = Some(text[start..end].split('§').next()?.trim().to_string());
    }

    Some(DetectedCitation {
        text: text[start..end].to_string(),
        start,
        end,
        citation_type: kind,
        components,
    })
}

/// Advance past leading signal words ("See", "In", ...)
fn skip_signals(text: &str, mut start: usize, end: usize) -> usize {
    loop {
        let rest = &text[start..end];
        let word_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let word = rest[..word_len].trim_end_matches(',');
        if word_len == rest.len() || !SIGNALS.contains(&word) {
            return start;
        }
        let after = &rest[word_len..];
        start += word_len + (after.len() - after.trim_start().len());
    }
}

fn trim_trailing(text: &str, start: usize, mut end: usize) -> usize {
    while end > start && text[..end].ends_with([',', ';', ' ']) {
        end -= 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identify(text: &str) -> Vec<DetectedCitation> {
        CitationIdentifier::new().identify(text)
    }

    #[test]
    fn test_all_rules_compile() {
        assert_eq!(rules().len(), 7);
    }

    #[test]
    fn test_case_citation_with_signal() {
        let text = "In Brown v. Board of Education, 347 U.S. 483 (1954), the Court held otherwise.";
        let found = identify(text);

        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.citation_type, CitationType::Case);
        assert_eq!(c.text, "Brown v. Board of Education, 347 U.S. 483 (1954)");
        assert_eq!(&text[c.start..c.end], c.text);
        assert_eq!(
            c.components.parties.as_deref(),
            Some("Brown v. Board of Education")
        );
        assert_eq!(c.components.volume.as_deref(), Some("347"));
        assert_eq!(c.components.reporter.as_deref(), Some("U.S."));
        assert_eq!(c.components.page.as_deref(), Some("483"));
        assert_eq!(c.components.year.as_deref(), Some("1954"));
        assert_eq!(c.components.court, None);
    }

    #[test]
    fn test_case_with_pin_and_court() {
        let found = identify("See also Smith v. Jones, 123 F.3d 456, 460 (9th Cir. 1999).");

        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.text, "Smith v. Jones, 123 F.3d 456, 460 (9th Cir. 1999)");
        assert_eq!(c.components.reporter.as_deref(), Some("F.3d"));
        assert_eq!(c.components.pin_cite.as_deref(), Some("460"));
        assert_eq!(c.components.court.as_deref(), Some("9th Cir."));
    }

    #[test]
    fn test_multi_word_reporter() {
        let found = identify("Doe v. Roe, 55 F. Supp. 2d 100 (S.D.N.Y. 1999)");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].components.reporter.as_deref(), Some("F. Supp. 2d"));
        assert_eq!(found[0].components.page.as_deref(), Some("100"));
    }

    #[test]
    fn test_statutes_regulations_and_rules() {
        let text = "Claims under 42 U.S.C. § 1983 and 29 C.F.R. § 1630.2(g) survive \
                    a motion under Fed. R. Civ. P. 12(b)(6); see also Fed. R. Evid. 403.";
        let found = identify(text);
        let kinds: Vec<CitationType> = found.iter().map(|c| c.citation_type).collect();
        assert_eq!(
            kinds,
            vec![
                CitationType::Statute,
                CitationType::Regulation,
                CitationType::Rule,
                CitationType::Rule
            ]
        );

        assert_eq!(found[0].text, "42 U.S.C. § 1983");
        assert_eq!(found[0].components.title.as_deref(), Some("42"));
        assert_eq!(found[0].components.section.as_deref(), Some("1983"));
        assert_eq!(found[1].components.section.as_deref(), Some("1630.2(g)"));
        assert_eq!(found[2].text, "Fed. R. Civ. P. 12(b)(6)");
        assert_eq!(found[3].text, "Fed. R. Evid. 403");
    }

    #[test]
    fn test_state_code() {
        let found = identify("Liability follows under Cal. Civ. Code § 1714(a).");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].citation_type, CitationType::Statute);
        assert_eq!(found[0].text, "Cal. Civ. Code § 1714(a)");
        assert_eq!(found[0].components.code.as_deref(), Some("Cal. Civ. Code"));
    }

    #[test]
    fn test_bare_reporter_is_unknown_and_full_case_wins_overlap() {
        let found = identify("Compare 410 U.S. 113 with Roe v. Wade, 410 U.S. 113 (1973).");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].citation_type, CitationType::Unknown);
        assert_eq!(found[0].text, "410 U.S. 113");
        assert_eq!(found[1].citation_type, CitationType::Case);
        assert!(found[1].start >= found[0].end);
    }

    #[test]
    fn test_no_citations() {
        assert!(identify("").is_empty());
        assert!(identify("The parties met on 12 May and agreed.").is_empty());
    }
}
