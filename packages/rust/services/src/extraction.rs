//! Heuristic credential extraction from plain-text documents.
//!
//! Lines are classified by keyword into certifications, education, and
//! affiliations (checked in that order). Section headers such as
//! `Education:` set the category for the lines that follow them.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use provdir_shared::{PermanentKind, ProvDirError, Result, SourceDocument};

use crate::{DocumentExtractor, Extraction};

const SERVICE: &str = "text-extractor";

/// Confidence attached to keyword-classified values.
const EXTRACTION_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Education,
    Certification,
    Affiliation,
}

fn classify(line: &str) -> Option<Section> {
    static CERT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(board[- ]certified|certif\w*|diplomate|accredited|licensed)\b")
            .expect("valid regex")
    });
    static EDU_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)(\b(university|college|school of|residency|fellowship|internship|degree|graduated|education)\b|\b(m\.?d|d\.?o|ph\.?d|mbbs|b\.?s|m\.?s)\.?(\s|,|$))",
        )
        .expect("valid regex")
    });
    static AFF_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)\b(hospital|medical center|clinic|health system|healthcare|affiliat\w*|staff|member of|practice group)\b",
        )
        .expect("valid regex")
    });

    if CERT_RE.is_match(line) {
        Some(Section::Certification)
    } else if EDU_RE.is_match(line) {
        Some(Section::Education)
    } else if AFF_RE.is_match(line) {
        Some(Section::Affiliation)
    } else {
        None
    }
}

/// A name followed only by post-nominal letters, e.g. `Jane Doe, MD, PhD`.
/// These headline a CV and are not credentials in themselves.
fn is_name_line(line: &str) -> bool {
    static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:Dr\.?\s+)?\p{Lu}[\p{L}.'-]*(?:\s+\p{Lu}[\p{L}.'-]*){1,3}$")
            .expect("valid regex")
    });
    static POSTNOMINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)^(m\.?d|d\.?o|ph\.?d|mbbs|m\.?p\.?h|d\.?n\.?p|n\.?p|r\.?n|pa-c|facp|facs|faap)\.?$",
        )
        .expect("valid regex")
    });

    let Some((name, letters)) = line.split_once(',') else {
        return false;
    };
    let mut tokens = letters
        .split([',', ' '])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .peekable();
    NAME_RE.is_match(name.trim())
        && classify(name).is_none()
        && tokens.peek().is_some()
        && tokens.all(|t| POSTNOMINAL_RE.is_match(t))
}

/// Map a header label to the section it introduces.
fn header_section(label: &str) -> Option<Section> {
    let label = label.trim().to_lowercase();
    match label.as_str() {
        "education" | "training" | "education and training" | "degrees" => {
            Some(Section::Education)
        }
        "certifications" | "certification" | "board certifications" | "licenses"
        | "credentials" => Some(Section::Certification),
        "affiliations" | "hospital affiliations" | "affiliation" | "memberships" => {
            Some(Section::Affiliation)
        }
        _ => None,
    }
}

fn strip_bullet(line: &str) -> &str {
    static BULLET_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s*").expect("valid regex"));
    match BULLET_RE.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        values.push(value.to_string());
    }
}

/// Extract credentials from a document's text.
pub fn extract_text(text: &str) -> Extraction {
    let mut out = Extraction {
        confidence: EXTRACTION_CONFIDENCE,
        ..Extraction::default()
    };
    let mut current: Option<Section> = None;

    for raw in text.lines() {
        let line = strip_bullet(raw).trim();
        if line.is_empty() {
            continue;
        }

        // "Education:" on its own line opens a section.
        if let Some(label) = line.strip_suffix(':') {
            current = header_section(label);
            continue;
        }

        // "Education: Johns Hopkins" carries its section inline.
        let (section, value) = match line.split_once(':') {
            Some((label, rest)) if header_section(label).is_some() && !rest.trim().is_empty() => {
                (header_section(label), rest.trim())
            }
            _ if is_name_line(line) => continue,
            _ => (classify(line).or(current), line),
        };

        let Some(section) = section else {
            continue;
        };
        let bucket = match section {
            Section::Education => &mut out.education,
            Section::Certification => &mut out.certifications,
            Section::Affiliation => &mut out.affiliations,
        };
        push_unique(bucket, value);
    }

    let extracted =
        out.education.len() + out.certifications.len() + out.affiliations.len();
    // U+FFFD marks bytes that could not be decoded.
    out.incomplete = extracted == 0 || text.contains('\u{FFFD}');
    out
}

/// Plain-text [`DocumentExtractor`].
#[derive(Debug, Clone, Default)]
pub struct TextDocumentExtractor;

impl TextDocumentExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentExtractor for TextDocumentExtractor {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn extract(&self, document: &SourceDocument) -> Result<Extraction> {
        if document.text.trim().is_empty() {
            return Err(ProvDirError::permanent(
                SERVICE,
                PermanentKind::InvalidInput,
                format!("document '{}' is empty", document.name),
            ));
        }
        let extraction = extract_text(&document.text);
        debug!(
            document = %document.name,
            education = extraction.education.len(),
            certifications = extraction.certifications.len(),
            affiliations = extraction.affiliations.len(),
            incomplete = extraction.incomplete,
            "document extracted"
        );
        Ok(extraction)
    }
}
