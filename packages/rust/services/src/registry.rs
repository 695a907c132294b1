//! Provider registry lookups.
//!
//! [`NppesRegistry`] queries the public NPI registry (NPPES) by license
//! number. [`StaticRegistry`] serves the same matching logic from an
//! in-memory snapshot, for offline runs and tests.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use provdir_shared::{
    FieldStatus, LicenseStatus, PermanentKind, ProvDirError, RegistryConfig, Result,
};

use crate::{RegistryLookup, RegistryMatch, RegistryQuery};

/// User-Agent string for registry requests.
const USER_AGENT: &str = concat!("provdir/", env!("CARGO_PKG_VERSION"));

/// Minimum specialty overlap for the registry to count as agreeing.
const SPECIALTY_MATCH_MIN: f64 = 0.5;

/// Name tokens that carry no identity.
const NAME_NOISE: &[&str] = &[
    "dr", "md", "do", "np", "pa", "rn", "phd", "dds", "dmd", "jr", "sr", "ii", "iii", "mr",
    "mrs", "ms", "inc", "llc", "pc", "the",
];

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Lower-cased alphanumeric tokens with honorifics and suffixes removed.
fn name_tokens(name: &str) -> BTreeSet<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !NAME_NOISE.contains(&t.as_str()))
        .collect()
}

/// Whether a claimed name plausibly refers to the registered one.
///
/// Every registered token must appear in the claim, except that a single
/// missing token is tolerated for registered names of three or more tokens
/// (middle names).
fn names_agree(claimed: &str, registered: &str) -> bool {
    let claimed = name_tokens(claimed);
    let registered = name_tokens(registered);
    if claimed.is_empty() || registered.is_empty() {
        return false;
    }
    let missing = registered.difference(&claimed).count();
    missing == 0 || (registered.len() >= 3 && missing == 1)
}

/// Agreement between a claimed specialty and one registered taxonomy, in [0, 1].
fn specialty_overlap(claimed: &str, registered: &str) -> f64 {
    if claimed.trim().eq_ignore_ascii_case(registered.trim()) {
        return 1.0;
    }
    let claimed = name_tokens(claimed);
    let registered = name_tokens(registered);
    if claimed.is_empty() || registered.is_empty() {
        return 0.0;
    }
    let shared = claimed.intersection(&registered).count() as f64;
    shared / claimed.len().max(registered.len()) as f64
}

/// Compare a query against a registry record.
fn match_record(
    query: &RegistryQuery<'_>,
    registered_name: &str,
    specialties: &[String],
    license_status: LicenseStatus,
) -> RegistryMatch {
    let specialty_confidence = query
        .specialty
        .map(|claimed| {
            specialties
                .iter()
                .map(|s| specialty_overlap(claimed, s))
                .fold(0.0_f64, f64::max)
        })
        .unwrap_or(0.0);

    let name_ok = names_agree(query.name, registered_name);
    let specialty_ok = query.specialty.is_none() || specialty_confidence >= SPECIALTY_MATCH_MIN;

    let status = if name_ok && specialty_ok {
        FieldStatus::Verified
    } else {
        debug!(
            license = query.license_id,
            name_ok, specialty_confidence, "registry record disagrees with claim"
        );
        FieldStatus::Mismatch
    };

    RegistryMatch {
        status,
        specialty_confidence,
        license_status,
        registered_name: Some(registered_name.to_string()),
        registered_specialties: specialties.to_vec(),
    }
}

/// Whether `license` is a well-formed NPI: ten digits with a valid Luhn
/// check digit over the `80840` card-issuer prefix.
pub fn is_valid_npi(license: &str) -> bool {
    if license.len() != 10 || !license.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let digits: Vec<u32> = format!("80840{license}")
        .bytes()
        .map(|b| u32::from(b - b'0'))
        .collect();
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

// ---------------------------------------------------------------------------
// NPPES over HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NppesResponse {
    #[serde(default)]
    results: Vec<NppesResult>,
    #[serde(default, rename = "Errors")]
    errors: Vec<NppesError>,
}

#[derive(Debug, Deserialize)]
struct NppesError {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct NppesResult {
    basic: Option<NppesBasic>,
    #[serde(default)]
    taxonomies: Vec<NppesTaxonomy>,
}

#[derive(Debug, Deserialize)]
struct NppesBasic {
    organization_name: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NppesTaxonomy {
    #[serde(default)]
    desc: String,
    #[serde(default)]
    primary: bool,
}

impl NppesBasic {
    fn display_name(&self) -> Option<String> {
        let clean = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(ToOwned::to_owned)
        };
        if let Some(org) = clean(&self.organization_name) {
            return Some(org);
        }
        match (clean(&self.first_name), clean(&self.last_name)) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(only), None) | (None, Some(only)) => Some(only),
            (None, None) => None,
        }
    }

    fn license_status(&self) -> LicenseStatus {
        match self.status.as_deref().map(str::trim) {
            Some("A") => LicenseStatus::Active,
            Some("D") => LicenseStatus::Inactive,
            _ => LicenseStatus::Unknown,
        }
    }
}

/// Whether an HTTP status from the registry is worth retrying.
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// NPI registry client.
#[derive(Debug, Clone)]
pub struct NppesRegistry {
    client: Client,
    base_url: Url,
    api_version: String,
}

impl NppesRegistry {
    const SERVICE: &'static str = "nppes";

    /// Build a client from the `[registry]` config section.
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProvDirError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_version: config.api_version.clone(),
        })
    }

    fn transient(msg: impl Into<String>) -> ProvDirError {
        ProvDirError::transient(Self::SERVICE, msg)
    }

    fn permanent(kind: PermanentKind, msg: impl Into<String>) -> ProvDirError {
        ProvDirError::permanent(Self::SERVICE, kind, msg)
    }
}

#[async_trait]
impl RegistryLookup for NppesRegistry {
    fn name(&self) -> &str {
        Self::SERVICE
    }

    #[instrument(skip_all, fields(license = query.license_id))]
    async fn lookup_provider(&self, query: &RegistryQuery<'_>) -> Result<RegistryMatch> {
        if !is_valid_npi(query.license_id) {
            return Err(Self::permanent(
                PermanentKind::InvalidInput,
                format!("'{}' is not a valid NPI", query.license_id),
            ));
        }

        let response = self
            .client
            .get(self.base_url.clone())
            .query(&[
                ("version", self.api_version.as_str()),
                ("number", query.license_id),
            ])
            .send()
            .await
            .map_err(|e| Self::transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            if is_retryable_status(status) {
                warn!(%status, "registry returned retryable status");
                return Err(Self::transient(format!("HTTP {status}")));
            }
            return Err(Self::permanent(
                PermanentKind::Rejected,
                format!("HTTP {status}"),
            ));
        }

        let body: NppesResponse = response
            .json()
            .await
            .map_err(|e| Self::permanent(PermanentKind::Rejected, format!("invalid JSON: {e}")))?;

        if let Some(err) = body.errors.first() {
            return Err(Self::permanent(
                PermanentKind::InvalidInput,
                err.description.clone(),
            ));
        }

        let Some(result) = body.results.first() else {
            debug!("license not in registry");
            return Ok(RegistryMatch::not_found());
        };

        let Some(basic) = result.basic.as_ref() else {
            return Ok(RegistryMatch::not_found());
        };
        let registered_name = basic.display_name().unwrap_or_default();

        // Primary taxonomy first so it is reported first.
        let mut taxonomies: Vec<&NppesTaxonomy> = result.taxonomies.iter().collect();
        taxonomies.sort_by_key(|t| !t.primary);
        let specialties: Vec<String> = taxonomies
            .into_iter()
            .map(|t| t.desc.clone())
            .filter(|d| !d.is_empty())
            .collect();

        Ok(match_record(
            query,
            &registered_name,
            &specialties,
            basic.license_status(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Static snapshot
// ---------------------------------------------------------------------------

/// One provider in a [`StaticRegistry`] snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub name: String,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// In-memory registry keyed by license number.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    records: HashMap<String, RegistryRecord>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, license_id: impl Into<String>, record: RegistryRecord) {
        self.records.insert(license_id.into(), record);
    }

    /// Load a snapshot from a JSON object mapping license number to record.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ProvDirError::io(path, e))?;
        let records: HashMap<String, RegistryRecord> = serde_json::from_str(&content)
            .map_err(|e| {
                ProvDirError::config(format!("invalid registry snapshot {}: {e}", path.display()))
            })?;
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RegistryLookup for StaticRegistry {
    fn name(&self) -> &str {
        "static-registry"
    }

    async fn lookup_provider(&self, query: &RegistryQuery<'_>) -> Result<RegistryMatch> {
        if !is_valid_npi(query.license_id) {
            return Err(ProvDirError::permanent(
                self.name(),
                PermanentKind::InvalidInput,
                format!("'{}' is not a valid NPI", query.license_id),
            ));
        }
        let Some(record) = self.records.get(query.license_id) else {
            return Ok(RegistryMatch::not_found());
        };
        let license_status = if record.active {
            LicenseStatus::Active
        } else {
            LicenseStatus::Inactive
        };
        Ok(match_record(
            query,
            &record.name,
            &record.specialties,
            license_status,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NPI: &str = "1234567893";

    fn query<'a>(name: &'a str, specialty: Option<&'a str>) -> RegistryQuery<'a> {
        RegistryQuery {
            license_id: NPI,
            name,
            specialty,
        }
    }

    fn registry_for(server: &wiremock::MockServer) -> NppesRegistry {
        let config = RegistryConfig {
            base_url: Url::parse(&format!("{}/api/", server.uri())).unwrap(),
            api_version: "2.1".into(),
            timeout_secs: 5,
        };
        NppesRegistry::new(&config).unwrap()
    }

    fn nppes_body(status: &str, taxonomy: &str) -> serde_json::Value {
        serde_json::json!({
            "result_count": 1,
            "results": [{
                "number": NPI,
                "basic": {
                    "first_name": "JANE",
                    "last_name": "DOE",
                    "status": status
                },
                "taxonomies": [
                    { "desc": "Internal Medicine", "primary": false },
                    { "desc": taxonomy, "primary": true }
                ]
            }]
        })
    }

    #[test]
    fn npi_check_digit() {
        assert!(is_valid_npi("1234567893"));
        assert!(!is_valid_npi("1234567890"));
        assert!(!is_valid_npi("12345"));
        assert!(!is_valid_npi("12345678a3"));
    }

    #[test]
    fn name_agreement_ignores_honorifics() {
        assert!(names_agree("Dr. Jane Doe, MD", "JANE DOE"));
        assert!(names_agree("Jane Doe", "Jane Q Doe"));
        assert!(!names_agree("John Smith", "Jane Doe"));
        assert!(!names_agree("", "Jane Doe"));
    }

    #[test]
    fn specialty_overlap_scores() {
        assert_eq!(specialty_overlap("cardiology", "Cardiology"), 1.0);
        assert_eq!(specialty_overlap("Family Practice", "Family Medicine"), 0.5);
        assert_eq!(
            specialty_overlap("Sports Medicine", "Family Medicine, Sports Medicine"),
            2.0 / 3.0
        );
        assert_eq!(specialty_overlap("Dermatology", "Pediatrics"), 0.0);
    }

    #[tokio::test]
    async fn nppes_verified_match() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/api/"))
            .and(wiremock::matchers::query_param("number", NPI))
            .and(wiremock::matchers::query_param("version", "2.1"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_json(nppes_body("A", "Family Medicine")),
            )
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let found = registry
            .lookup_provider(&query("Dr. Jane Doe", Some("family medicine")))
            .await
            .unwrap();

        assert_eq!(found.status, FieldStatus::Verified);
        assert_eq!(found.specialty_confidence, 1.0);
        assert_eq!(found.license_status, LicenseStatus::Active);
        assert_eq!(found.registered_name.as_deref(), Some("JANE DOE"));
        assert_eq!(found.registered_specialties[0], "Family Medicine");
    }

    #[tokio::test]
    async fn nppes_specialty_disagreement_is_mismatch() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_json(nppes_body("D", "Pediatrics")),
            )
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let found = registry
            .lookup_provider(&query("Jane Doe", Some("Dermatology")))
            .await
            .unwrap();

        assert_eq!(found.status, FieldStatus::Mismatch);
        assert_eq!(found.specialty_confidence, 0.0);
        assert_eq!(found.license_status, LicenseStatus::Inactive);
    }

    #[tokio::test]
    async fn nppes_empty_results_is_not_found() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "result_count": 0, "results": [] })),
            )
            .mount(&server)
            .await;

        let found = registry_for(&server)
            .lookup_provider(&query("Jane Doe", None))
            .await
            .unwrap();
        assert_eq!(found, RegistryMatch::not_found());
    }

    #[tokio::test]
    async fn nppes_status_classification() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let err = registry_for(&server)
            .lookup_provider(&query("Jane Doe", None))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let err = registry_for(&server)
            .lookup_provider(&query("Jane Doe", None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvDirError::PermanentExternal {
                kind: PermanentKind::Rejected,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn nppes_rejects_malformed_npi_without_calling() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = registry_for(&server)
            .lookup_provider(&RegistryQuery {
                license_id: "99",
                name: "Jane Doe",
                specialty: None,
            })
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn static_registry_lookup() {
        let mut registry = StaticRegistry::new();
        registry.insert(
            NPI,
            RegistryRecord {
                name: "Jane Doe".into(),
                specialties: vec!["Cardiology".into()],
                active: true,
            },
        );

        let found = registry
            .lookup_provider(&query("Jane Doe", Some("Cardiology")))
            .await
            .unwrap();
        assert_eq!(found.status, FieldStatus::Verified);
        assert_eq!(found.license_status, LicenseStatus::Active);

        let missing = registry
            .lookup_provider(&RegistryQuery {
                license_id: "1987654328",
                name: "Jane Doe",
                specialty: None,
            })
            .await
            .unwrap();
        assert_eq!(missing.status, FieldStatus::NotFound);
    }

    #[tokio::test]
    async fn registries_reject_the_same_malformed_npi() {
        let mut registry = StaticRegistry::new();
        registry.insert(
            "1234567890",
            RegistryRecord {
                name: "Jane Doe".into(),
                specialties: vec![],
                active: true,
            },
        );

        let err = registry
            .lookup_provider(&RegistryQuery {
                license_id: "1234567890",
                name: "Jane Doe",
                specialty: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvDirError::PermanentExternal {
                kind: PermanentKind::InvalidInput,
                ..
            }
        ));
        assert!(!is_valid_npi("1234567890"));
    }

    #[test]
    fn static_registry_from_json_file() {
        let path = std::env::temp_dir().join(format!(
            "provdir_registry_{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"{ "1234567893": { "name": "Jane Doe", "specialties": ["Cardiology"], "active": false } }"#,
        )
        .unwrap();

        let registry = StaticRegistry::from_json_file(&path).unwrap();
        assert_eq!(registry.len(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
