//! Offline contact validation.
//!
//! Checks US phone numbers against the North American Numbering Plan and
//! parses US street addresses into a normalised one-line form. Nothing here
//! leaves the process, so results are format-level evidence only and carry
//! correspondingly capped confidence.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use provdir_shared::{FieldStatus, PermanentKind, ProvDirError, Result};

use crate::{AddressCheck, ContactValidator, PhoneCheck};

const SERVICE: &str = "local-contact";

/// Confidence for a number that is well-formed under NANP rules.
const PHONE_FORMAT_CONFIDENCE: f64 = 0.8;
/// Confidence for a fully parsed street address with a known state.
const ADDRESS_FULL_CONFIDENCE: f64 = 0.85;
/// Confidence for an address where only the state/ZIP tail was recognised.
const ADDRESS_PARTIAL_CONFIDENCE: f64 = 0.45;
/// Confidence for an address whose state code is unknown.
const ADDRESS_BAD_STATE_CONFIDENCE: f64 = 0.3;

const US_STATES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY", "PR", "GU", "VI", "AS", "MP",
];

/// Format-level phone/address validator.
#[derive(Debug, Clone, Default)]
pub struct LocalContactValidator;

impl LocalContactValidator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContactValidator for LocalContactValidator {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn validate_address(&self, address: &str) -> Result<AddressCheck> {
        check_address(address)
    }

    async fn validate_phone(&self, phone: &str) -> Result<PhoneCheck> {
        check_phone(phone)
    }
}

/// Validate a phone number against NANP structure.
pub fn check_phone(phone: &str) -> Result<PhoneCheck> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    let has_letters = phone.chars().any(|c| c.is_ascii_alphabetic() && c != 'x' && c != 'X');

    let national = match digits.len() {
        10 => digits.as_str(),
        11 if digits.starts_with('1') => &digits[1..],
        _ => {
            return Err(ProvDirError::permanent(
                SERVICE,
                PermanentKind::InvalidInput,
                format!("'{phone}' is not a 10-digit NANP number"),
            ));
        }
    };

    if has_letters {
        return Err(ProvDirError::permanent(
            SERVICE,
            PermanentKind::InvalidInput,
            format!("'{phone}' contains letters"),
        ));
    }

    let area = &national[0..3];
    let exchange = &national[3..6];
    let line = &national[6..10];

    // NANP: area code and exchange never start with 0 or 1, and N11 codes
    // are service codes.
    let valid_leading = |s: &str| !s.starts_with('0') && !s.starts_with('1');
    let is_n11 = |s: &str| &s[1..] == "11";
    if !valid_leading(area) || !valid_leading(exchange) || is_n11(area) || is_n11(exchange) {
        debug!(phone, "number violates NANP structure");
        return Ok(PhoneCheck {
            status: FieldStatus::NotFound,
            confidence: 0.0,
            normalized: None,
        });
    }

    Ok(PhoneCheck {
        status: FieldStatus::Verified,
        confidence: PHONE_FORMAT_CONFIDENCE,
        normalized: Some(format!("({area}) {exchange}-{line}")),
    })
}

/// Parse and normalise a one-line US address.
pub fn check_address(address: &str) -> Result<AddressCheck> {
    static FULL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)^\s*(?P<street>\d+[A-Za-z]?\s+[^,]+?)\s*,\s*(?:(?P<unit>(?:suite|ste|apt|unit|#|floor|fl)\b[^,]*?)\s*,\s*)?(?P<city>[A-Za-z .'-]+?)\s*,\s*(?P<state>[A-Za-z]{2})\s+(?P<zip>\d{5})(?:-(?P<plus4>\d{4}))?\s*$",
        )
        .expect("valid regex")
    });
    static TAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(?P<state>[A-Za-z]{2})\s+(?P<zip>\d{5})(?:-\d{4})?\s*$")
            .expect("valid regex")
    });
    static SPACES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(ProvDirError::permanent(
            SERVICE,
            PermanentKind::InvalidInput,
            "empty address",
        ));
    }

    if let Some(caps) = FULL_RE.captures(trimmed) {
        let state = caps["state"].to_ascii_uppercase();
        let collapse = |s: &str| SPACES_RE.replace_all(s.trim(), " ").to_string();

        let mut normalized = title_case(&collapse(&caps["street"]));
        if let Some(unit) = caps.name("unit") {
            normalized.push_str(", ");
            normalized.push_str(&title_case(&collapse(unit.as_str())));
        }
        normalized.push_str(", ");
        normalized.push_str(&title_case(&collapse(&caps["city"])));
        normalized.push_str(&format!(", {state} {}", &caps["zip"]));
        if let Some(plus4) = caps.name("plus4") {
            normalized.push('-');
            normalized.push_str(plus4.as_str());
        }

        let (status, confidence) = if US_STATES.contains(&state.as_str()) {
            (FieldStatus::Verified, ADDRESS_FULL_CONFIDENCE)
        } else {
            (FieldStatus::Mismatch, ADDRESS_BAD_STATE_CONFIDENCE)
        };

        return Ok(AddressCheck {
            status,
            normalized_address: Some(normalized),
            confidence,
        });
    }

    if let Some(caps) = TAIL_RE.captures(trimmed) {
        let state = caps["state"].to_ascii_uppercase();
        if US_STATES.contains(&state.as_str()) {
            debug!(address, "only state/ZIP recognised");
            return Ok(AddressCheck {
                status: FieldStatus::Verified,
                normalized_address: None,
                confidence: ADDRESS_PARTIAL_CONFIDENCE,
            });
        }
    }

    Ok(AddressCheck {
        status: FieldStatus::NotFound,
        normalized_address: None,
        confidence: 0.0,
    })
}

fn title_case(s: &str) -> String {
    const DIRECTIONALS: &[&str] = &["N", "S", "E", "W", "NE", "NW", "SE", "SW"];

    s.split(' ')
        .map(|word| {
            let upper = word.to_ascii_uppercase();
            if DIRECTIONALS.contains(&upper.as_str()) {
                return upper;
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => format!(
                    "{}{}",
                    first.to_ascii_uppercase(),
                    chars.as_str().to_ascii_lowercase()
                ),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
